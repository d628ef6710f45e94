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

use crate::rpc::{ReplyFuture, ReplySender, RpcError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

pub struct RpcEndpoint<M> {
    name: Arc<str>,
    sender: mpsc::Sender<M>,
}

impl<M> Clone for RpcEndpoint<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<M> fmt::Debug for RpcEndpoint<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEndpoint")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<M> RpcEndpoint<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// An endpoint is alive as long as its actor still owns the mailbox.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn same_endpoint(&self, other: &RpcEndpoint<M>) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl<M: Send + 'static> RpcEndpoint<M> {
    /// Fire and forget. Never waits for mailbox space.
    pub fn tell(&self, msg: M) -> Result<(), RpcError> {
        match self.sender.try_send(msg) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RpcError::Full(self.name.to_string())),
            Err(TrySendError::Closed(_)) => Err(RpcError::Closed(self.name.to_string())),
        }
    }

    /// Sends a request built around a fresh reply slot and returns the
    /// pending reply without waiting for it.
    pub fn ask<T, F>(&self, build: F) -> Result<ReplyFuture<T>, RpcError>
    where
        F: FnOnce(ReplySender<T>) -> M,
    {
        let (sender, future) = ReplyFuture::pair(self.name.clone());
        self.tell(build(sender))?;
        Ok(future)
    }

    pub async fn call<T, F>(&self, build: F, timeout: Duration) -> Result<T, RpcError>
    where
        F: FnOnce(ReplySender<T>) -> M,
    {
        self.ask(build)?.wait(timeout).await
    }
}

pub struct Mailbox<M> {
    name: Arc<str>,
    receiver: mpsc::Receiver<M>,
}

impl<M: Send + 'static> Mailbox<M> {
    pub fn channel<T: AsRef<str>>(name: T, capacity: usize) -> (RpcEndpoint<M>, Mailbox<M>) {
        let name: Arc<str> = Arc::from(name.as_ref());
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let endpoint = RpcEndpoint {
            name: name.clone(),
            sender,
        };
        (endpoint, Mailbox { name, receiver })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel safe: a message is never lost if the returned future is dropped.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<M> {
        self.receiver.try_recv().ok()
    }

    /// Stops accepting new messages. Already queued messages can still be drained.
    pub fn close(&mut self) {
        self.receiver.close()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
