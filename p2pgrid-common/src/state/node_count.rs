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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of nodes asked by a lookup. `Max` means every free node reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCount {
    Exact(usize),
    Max,
}

impl NodeCount {
    pub fn is_max(&self) -> bool {
        matches!(self, NodeCount::Max)
    }

    /// True when nothing is left to ask for.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, NodeCount::Exact(0))
    }

    /// One node was handed out along the way.
    pub fn decrement(self) -> Self {
        match self {
            NodeCount::Exact(n) => NodeCount::Exact(n.saturating_sub(1)),
            NodeCount::Max => NodeCount::Max,
        }
    }

    /// What is still missing once `acquired` nodes were collected.
    pub fn remaining(self, acquired: usize) -> Self {
        match self {
            NodeCount::Exact(n) => NodeCount::Exact(n.saturating_sub(acquired)),
            NodeCount::Max => NodeCount::Max,
        }
    }

    pub fn is_reached(&self, acquired: usize) -> bool {
        match self {
            NodeCount::Exact(n) => acquired >= *n,
            NodeCount::Max => false,
        }
    }
}

impl fmt::Display for NodeCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeCount::Exact(n) => write!(f, "{}", n),
            NodeCount::Max => write!(f, "MAX"),
        }
    }
}

/// Capacity of a virtual node or of one provider contract.
/// `Unbounded` means greedy: take whatever is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    Limited(u64),
    Unbounded,
}

impl Capacity {
    pub fn is_greedy(&self) -> bool {
        matches!(self, Capacity::Unbounded)
    }

    pub fn is_full(&self, current: u64) -> bool {
        match self {
            Capacity::Limited(n) => current >= *n,
            Capacity::Unbounded => false,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Capacity::Limited(n) => Some(*n),
            Capacity::Unbounded => None,
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Limited(n) => write!(f, "{}", n),
            Capacity::Unbounded => write!(f, "greedy"),
        }
    }
}
