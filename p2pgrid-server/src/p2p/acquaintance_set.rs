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

use crate::p2p::PeerRef;
use indexmap::IndexMap;
use log::{debug, info, warn};
use orpc::sync::RwLockExt;
use p2pgrid_common::state::PeerAddr;
use rand::Rng;
use std::sync::RwLock;

/// Outcome of an exploring message seen by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    AlreadyKnown,
    Accepted,
    AcceptedByChance,
    Rejected,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted | Admission::AcceptedByChance)
    }

    /// Known peers are rejected, a peer below `noa` acquaintances accepts,
    /// a full peer accepts with probability `percent / 100`.
    pub fn decide<R: Rng + ?Sized>(
        known: bool,
        size: usize,
        noa: usize,
        percent: u8,
        rng: &mut R,
    ) -> Admission {
        if known {
            Admission::AlreadyKnown
        } else if size < noa {
            Admission::Accepted
        } else if rng.gen_range(0..100u32) < percent as u32 {
            Admission::AcceptedByChance
        } else {
            Admission::Rejected
        }
    }
}

/// The peers the local peer currently keeps links with.
///
/// Never contains the local peer and never contains the same address twice.
/// The peer actor is the only writer; the service handle reads it directly.
pub struct AcquaintanceSet {
    local: PeerAddr,
    peers: RwLock<IndexMap<PeerAddr, PeerRef>>,
}

impl AcquaintanceSet {
    pub fn new(local: PeerAddr) -> Self {
        Self {
            local,
            peers: RwLock::new(IndexMap::new()),
        }
    }

    pub fn local(&self) -> &PeerAddr {
        &self.local
    }

    /// Adds `peer` after probing it. Returns true only if it was inserted.
    pub fn add(&self, peer: PeerRef) -> bool {
        if peer.addr() == &self.local {
            debug!("Ignore self registration of {}", self.local);
            return false;
        }

        if !peer.is_alive() {
            warn!("Peer {} is unreachable, not added to {}", peer, self.local);
            self.remove(peer.addr());
            return false;
        }

        let mut peers = self.peers.write_safe();
        if peers.contains_key(peer.addr()) {
            debug!("Peer {} already an acquaintance of {}", peer, self.local);
            return false;
        }
        info!("Acquaintance {} added to {}", peer, self.local);
        peers.insert(peer.addr().clone(), peer);
        true
    }

    pub fn remove(&self, addr: &PeerAddr) -> bool {
        let removed = self.peers.write_safe().shift_remove(addr).is_some();
        if removed {
            info!("Acquaintance {} removed from {}", addr, self.local);
        }
        removed
    }

    pub fn size(&self) -> usize {
        self.peers.read_safe().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.peers.read_safe().contains_key(addr)
    }

    pub fn get(&self, addr: &PeerAddr) -> Option<PeerRef> {
        self.peers.read_safe().get(addr).cloned()
    }

    pub fn random_peer<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<PeerRef> {
        let peers = self.peers.read_safe();
        if peers.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..peers.len());
        peers.get_index(index).map(|(_, peer)| peer.clone())
    }

    /// Copy of the current members, safe to iterate while the set changes.
    pub fn snapshot(&self) -> Vec<PeerRef> {
        self.peers.read_safe().values().cloned().collect()
    }

    pub fn addrs(&self) -> Vec<PeerAddr> {
        self.peers.read_safe().keys().cloned().collect()
    }
}
