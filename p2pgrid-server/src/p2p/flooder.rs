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

use crate::p2p::{MessageMemory, PeerRef};
use log::debug;
use p2pgrid_common::state::{MessageId, PeerAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodDecision {
    /// Process locally and forward to the acquaintances.
    Forward,
    /// Process locally, do not forward.
    Drop,
    /// Seen already, ignore entirely.
    Duplicate,
}

impl FloodDecision {
    pub fn is_forward(&self) -> bool {
        matches!(self, FloodDecision::Forward)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, FloodDecision::Duplicate)
    }
}

/// Forwarding decision for one kind of flooded message. Each message kind
/// owns its flooder so that ids of different kinds never collide.
pub struct OverlayFlooder {
    local: PeerAddr,
    memory: MessageMemory,
    duplicates: u64,
}

impl OverlayFlooder {
    pub fn new(local: PeerAddr, msg_memory: usize) -> Self {
        Self {
            local,
            memory: MessageMemory::new(msg_memory),
            duplicates: 0,
        }
    }

    /// Checks, in order: duplicate id, reachable origin, own message, hop budget.
    /// `ttl` is the value after the receiving hop was counted.
    pub fn should_forward(
        &mut self,
        ttl: u32,
        id: Option<&MessageId>,
        origin: &PeerRef,
    ) -> FloodDecision {
        if !self.memory.is_new(id) {
            self.duplicates += 1;
            if let Some(id) = id {
                debug!("{} drops duplicate message {}", self.local, id);
            }
            return FloodDecision::Duplicate;
        }

        if !origin.is_alive() {
            debug!("{} cannot reach origin {}, ignoring message", self.local, origin);
            return FloodDecision::Duplicate;
        }

        if origin.addr() == &self.local {
            return FloodDecision::Duplicate;
        }

        if ttl > 0 {
            FloodDecision::Forward
        } else {
            FloodDecision::Drop
        }
    }

    /// Records an id minted locally before the message leaves this peer.
    pub fn remember(&mut self, id: MessageId) {
        self.memory.is_new(Some(&id));
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn memory(&self) -> &MessageMemory {
        &self.memory
    }
}
