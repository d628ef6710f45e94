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

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("endpoint {0} is closed")]
    Closed(String),

    #[error("mailbox of {0} is full")]
    Full(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("reply dropped by {0}")]
    Dropped(String),
}

impl RpcError {
    /// True when the remote side can no longer be reached at all.
    pub fn is_closed(&self) -> bool {
        matches!(self, RpcError::Closed(_))
    }
}
