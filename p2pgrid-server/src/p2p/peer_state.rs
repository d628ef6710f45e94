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

use p2pgrid_common::state::PeerAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Phase of the periodic gossip loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipPhase {
    Idle = 0,
    Heartbeating = 1,
    Exploring = 2,
    Waiting = 3,
}

impl From<u8> for GossipPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => GossipPhase::Heartbeating,
            2 => GossipPhase::Exploring,
            3 => GossipPhase::Waiting,
            _ => GossipPhase::Idle,
        }
    }
}

/// Lifecycle of a P2P service.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum P2pState {
    Init = 0,
    Running = 1,
    Stopped = 2,
}

impl From<u8> for P2pState {
    fn from(value: u8) -> Self {
        match value {
            1 => P2pState::Running,
            2 => P2pState::Stopped,
            _ => P2pState::Init,
        }
    }
}

/// Counters published by the peer actor and read by the service handle.
#[derive(Debug, Default)]
pub struct PeerStats {
    phase: AtomicU8,
    duplicates: AtomicU64,
    gossip_rounds: AtomicU64,
    last_gossip_ms: AtomicU64,
    waiting_lookups: AtomicUsize,
}

impl PeerStats {
    pub fn phase(&self) -> GossipPhase {
        GossipPhase::from(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_phase(&self, phase: GossipPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn set_duplicates(&self, n: u64) {
        self.duplicates.store(n, Ordering::Relaxed);
    }

    pub fn gossip_rounds(&self) -> u64 {
        self.gossip_rounds.load(Ordering::Relaxed)
    }

    pub fn gossip_started(&self, now_ms: u64) {
        self.gossip_rounds.fetch_add(1, Ordering::Relaxed);
        self.last_gossip_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Wall clock time of the latest gossip round, 0 before the first one.
    pub fn last_gossip_ms(&self) -> u64 {
        self.last_gossip_ms.load(Ordering::Relaxed)
    }

    pub fn waiting_lookups(&self) -> usize {
        self.waiting_lookups.load(Ordering::Relaxed)
    }

    pub fn set_waiting_lookups(&self, n: usize) {
        self.waiting_lookups.store(n, Ordering::Relaxed);
    }
}

/// Point in time view of a peer.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub addr: PeerAddr,
    pub acquaintances: Vec<PeerAddr>,
    pub phase: GossipPhase,
    pub duplicates: u64,
    pub gossip_rounds: u64,
    pub waiting_lookups: usize,
    pub last_gossip_ms: u64,
}
