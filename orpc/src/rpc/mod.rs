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

//! In-process actor messaging.
//!
//! An actor owns a [`Mailbox`] and hands out cloneable [`RpcEndpoint`]s.
//! One-way messages use [`RpcEndpoint::tell`]; request/response messages
//! carry a [`ReplySender`] and the caller keeps the matching [`ReplyFuture`],
//! which can be polled without blocking so that the caller stays free to
//! serve its own mailbox while the answer is pending.

mod endpoint;
pub use self::endpoint::{Mailbox, RpcEndpoint};

mod reply;
pub use self::reply::{ReplyFuture, ReplySender};

mod rpc_error;
pub use self::rpc_error::RpcError;
