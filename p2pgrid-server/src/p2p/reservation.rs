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

use crate::p2p::NodeManagerRef;
use p2pgrid_common::state::NodeHandle;
use p2pgrid_common::GridResult;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    PendingAck = 0,
    Acknowledged = 1,
    Released = 2,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::PendingAck => "pending_ack",
            ReservationState::Acknowledged => "acknowledged",
            ReservationState::Released => "released",
        }
    }
}

/// A node booked on `manager` for one lookup session.
pub struct NodeReservation {
    node: NodeHandle,
    manager: NodeManagerRef,
    deadline: Instant,
    state: ReservationState,
}

impl NodeReservation {
    /// A freshly booked node waiting for the consumer's answer.
    pub fn pending(node: NodeHandle, manager: NodeManagerRef, ack_timeout: Duration) -> Self {
        Self {
            node,
            manager,
            deadline: Instant::now() + ack_timeout,
            state: ReservationState::PendingAck,
        }
    }

    /// A node the consumer side accepted.
    pub fn acknowledged(node: NodeHandle, manager: NodeManagerRef) -> Self {
        Self {
            node,
            manager,
            deadline: Instant::now(),
            state: ReservationState::Acknowledged,
        }
    }

    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    pub fn manager(&self) -> &NodeManagerRef {
        &self.manager
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn is_expired(&self) -> bool {
        self.state == ReservationState::PendingAck && Instant::now() >= self.deadline
    }

    pub fn acknowledge(&mut self) -> bool {
        if self.state == ReservationState::PendingAck {
            self.state = ReservationState::Acknowledged;
            true
        } else {
            false
        }
    }

    /// Gives the node back to its manager. Releasing twice is a no-op.
    pub fn release(&mut self) -> GridResult<()> {
        if self.state == ReservationState::Released {
            return Ok(());
        }
        self.state = ReservationState::Released;
        self.manager.release(&self.node)
    }
}

impl fmt::Debug for NodeReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeReservation")
            .field("node", &self.node)
            .field("manager", &self.manager.id())
            .field("state", &self.state.as_str())
            .finish()
    }
}
