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

use crate::rpc::RpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("{0}")]
    Msg(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<String> for CommonError {
    fn from(value: String) -> Self {
        CommonError::Msg(value)
    }
}

impl From<&str> for CommonError {
    fn from(value: &str) -> Self {
        CommonError::Msg(value.to_string())
    }
}

/// Builds a `CommonError::Msg` from format arguments.
#[macro_export]
macro_rules! err_msg {
    ($($arg:tt)*) => {
        $crate::CommonError::Msg(format!($($arg)*))
    };
}

/// Returns `Err(..)` wrapping a formatted message, converted into the caller's error type.
#[macro_export]
macro_rules! err_box {
    ($($arg:tt)*) => {
        Err($crate::err_msg!($($arg)*).into())
    };
}

#[cfg(test)]
mod tests {
    use crate::{CommonError, CommonResult};

    fn fail(id: u32) -> CommonResult<()> {
        err_box!("Node {} not exist", id)
    }

    #[test]
    fn err_box_formats_message() {
        let err = fail(7).unwrap_err();
        assert_eq!(err.to_string(), "Node 7 not exist");
        assert!(matches!(err, CommonError::Msg(_)));
    }
}
