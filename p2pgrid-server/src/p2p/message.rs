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

use crate::p2p::{LookupRef, PeerSnapshot};
use orpc::rpc::{ReplyFuture, ReplySender, RpcEndpoint};
use p2pgrid_common::state::{MessageId, NodeCount, NodeFilter, NodeHandle, PeerAddr};
use p2pgrid_common::GridResult;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Gossip used to grow the overlay.
#[derive(Clone)]
pub struct ExploringMsg {
    pub ttl: u32,
    pub id: Option<MessageId>,
    pub origin: PeerRef,
}

/// Flooded request for free nodes on behalf of a lookup session.
#[derive(Clone)]
pub struct AskingNodeMsg {
    pub ttl: u32,
    pub id: Option<MessageId>,
    pub origin: PeerRef,
    pub count: NodeCount,
    pub lookup: LookupRef,
    pub vn_name: String,
    pub job_id: String,
    pub filter: Option<NodeFilter>,
}

pub enum PeerMessage {
    /// Asks the receiver to add `peer` to its acquaintances.
    Register {
        peer: PeerRef,
        reply: ReplySender<bool>,
    },
    HeartBeat,
    Exploring(ExploringMsg),
    AskingNode(AskingNodeMsg),
    /// The sender dropped the receiver from its acquaintances.
    Remove {
        peer: PeerAddr,
    },
    /// One step of a random walk looking for a single free node.
    GetANode {
        hops: u32,
        vn_name: String,
        job_id: String,
        reply: ReplySender<Option<NodeHandle>>,
    },
    AcquaintanceList {
        reply: ReplySender<Vec<PeerAddr>>,
    },
    /// A local lookup session starts waiting for nodes.
    NewLookup(LookupRef),
    Snapshot {
        reply: ReplySender<PeerSnapshot>,
    },
    Stop,
}

impl PeerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Register { .. } => "register",
            PeerMessage::HeartBeat => "heart_beat",
            PeerMessage::Exploring(_) => "exploring",
            PeerMessage::AskingNode(_) => "asking_node",
            PeerMessage::Remove { .. } => "remove",
            PeerMessage::GetANode { .. } => "get_a_node",
            PeerMessage::AcquaintanceList { .. } => "acquaintance_list",
            PeerMessage::NewLookup(_) => "new_lookup",
            PeerMessage::Snapshot { .. } => "snapshot",
            PeerMessage::Stop => "stop",
        }
    }

    pub fn is_asking_node(&self) -> bool {
        matches!(self, PeerMessage::AskingNode(_))
    }
}

/// Remote reference to a peer: its address plus the endpoint of its mailbox.
#[derive(Clone)]
pub struct PeerRef {
    addr: PeerAddr,
    endpoint: RpcEndpoint<PeerMessage>,
}

impl PeerRef {
    pub fn new(addr: PeerAddr, endpoint: RpcEndpoint<PeerMessage>) -> Self {
        Self { addr, endpoint }
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub fn endpoint(&self) -> &RpcEndpoint<PeerMessage> {
        &self.endpoint
    }

    /// Cheap reachability probe.
    pub fn is_alive(&self) -> bool {
        self.endpoint.is_alive()
    }

    pub fn tell(&self, msg: PeerMessage) -> GridResult<()> {
        self.endpoint.tell(msg)?;
        Ok(())
    }

    pub fn register(&self, peer: PeerRef) -> GridResult<ReplyFuture<bool>> {
        let future = self
            .endpoint
            .ask(|reply| PeerMessage::Register { peer, reply })?;
        Ok(future)
    }

    pub fn heart_beat(&self) -> GridResult<()> {
        self.tell(PeerMessage::HeartBeat)
    }

    pub fn exploring(&self, msg: ExploringMsg) -> GridResult<()> {
        self.tell(PeerMessage::Exploring(msg))
    }

    pub fn asking_node(&self, msg: AskingNodeMsg) -> GridResult<()> {
        self.tell(PeerMessage::AskingNode(msg))
    }

    pub fn remove(&self, peer: PeerAddr) -> GridResult<()> {
        self.tell(PeerMessage::Remove { peer })
    }

    pub fn acquaintance_list(&self) -> GridResult<ReplyFuture<Vec<PeerAddr>>> {
        let future = self
            .endpoint
            .ask(|reply| PeerMessage::AcquaintanceList { reply })?;
        Ok(future)
    }

    pub fn snapshot(&self) -> GridResult<ReplyFuture<PeerSnapshot>> {
        let future = self.endpoint.ask(|reply| PeerMessage::Snapshot { reply })?;
        Ok(future)
    }
}

impl PartialEq for PeerRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for PeerRef {}

impl Hash for PeerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state)
    }
}

impl fmt::Debug for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRef")
            .field("addr", &self.addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
