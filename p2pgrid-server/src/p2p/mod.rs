// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Unstructured peer-to-peer overlay and node lookup.
//!
//! Every peer is an actor ([`P2pService`] is its handle) that keeps a set of
//! acquaintances alive through periodic gossip, and floods node requests
//! issued by lookup sessions ([`LookupRef`]) with a hop budget and duplicate
//! suppression.

mod message_memory;
pub use self::message_memory::MessageMemory;

mod acquaintance_set;
pub use self::acquaintance_set::{AcquaintanceSet, Admission};

mod flooder;
pub use self::flooder::{FloodDecision, OverlayFlooder};

mod message;
pub use self::message::{AskingNodeMsg, ExploringMsg, PeerMessage, PeerRef};

mod node_manager;
pub use self::node_manager::{LocalNodeManager, NodeManager, NodeManagerRef, NodeTags};

mod reservation;
pub use self::reservation::{NodeReservation, ReservationState};

mod lookup;
pub use self::lookup::{LookupMessage, LookupRef, LookupState, NodeAck};

mod peer_state;
pub use self::peer_state::{GossipPhase, P2pState, PeerSnapshot, PeerStats};

mod local_network;
pub use self::local_network::LocalNetwork;

mod first_contact;
pub use self::first_contact::FirstContactReport;

mod peer_actor;

mod p2p_service;
pub use self::p2p_service::P2pService;
