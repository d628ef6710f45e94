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

use orpc::rpc::RpcError;
use orpc::CommonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    /// A remote peer, session or node manager could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("contract query on {name} failed: {msg}")]
    ContractQuery { name: String, msg: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("config error: {0}")]
    Config(String),

    /// The local service was stopped.
    #[error("{0} is closed")]
    Closed(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl GridError {
    pub fn unreachable<T: Into<String>>(who: T) -> Self {
        GridError::Unreachable(who.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        GridError::InvalidArgument(msg.into())
    }

    pub fn contract<N: Into<String>, M: ToString>(name: N, msg: M) -> Self {
        GridError::ContractQuery {
            name: name.into(),
            msg: msg.to_string(),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, GridError::Unreachable(_))
    }
}

impl From<RpcError> for GridError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Timeout(d) => GridError::Timeout(format!("no reply within {:?}", d)),
            other => GridError::Unreachable(other.to_string()),
        }
    }
}

impl From<regex::Error> for GridError {
    fn from(value: regex::Error) -> Self {
        GridError::InvalidArgument(value.to_string())
    }
}

impl From<toml::de::Error> for GridError {
    fn from(value: toml::de::Error) -> Self {
        GridError::Config(value.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(value: std::io::Error) -> Self {
        GridError::Common(CommonError::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rpc_error_mapping() {
        let err: GridError = RpcError::Closed("peer-a".to_string()).into();
        assert!(err.is_unreachable());

        let err: GridError = RpcError::Timeout(Duration::from_millis(10)).into();
        assert!(matches!(err, GridError::Timeout(_)));

        let err: GridError = orpc::err_msg!("bad {}", 1).into();
        assert_eq!(err.to_string(), "bad 1");
    }
}
