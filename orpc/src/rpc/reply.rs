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
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};

pub struct ReplySender<T> {
    inner: oneshot::Sender<T>,
}

impl<T> ReplySender<T> {
    /// Returns false when the asking side already gave up.
    pub fn send(self, value: T) -> bool {
        self.inner.send(value).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> fmt::Debug for ReplySender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplySender(closed={})", self.is_closed())
    }
}

/// The asking side of a request. It can be checked without blocking
/// through [`ReplyFuture::is_awaited`] or awaited through [`ReplyFuture::resolved`].
pub struct ReplyFuture<T> {
    from: Arc<str>,
    receiver: oneshot::Receiver<T>,
    value: Option<T>,
    // The slot is gone: dropped by the replier or already consumed.
    dropped: bool,
}

impl<T> ReplyFuture<T> {
    pub(crate) fn pair(from: Arc<str>) -> (ReplySender<T>, ReplyFuture<T>) {
        let (tx, rx) = oneshot::channel();
        let future = ReplyFuture {
            from,
            receiver: rx,
            value: None,
            dropped: false,
        };
        (ReplySender { inner: tx }, future)
    }

    /// A reply that is already known, used when a request is answered locally.
    pub fn ready(value: T) -> Self {
        let (_tx, rx) = oneshot::channel();
        Self {
            from: Arc::from("local"),
            receiver: rx,
            value: Some(value),
            dropped: false,
        }
    }

    fn poll_now(&mut self) {
        if self.value.is_some() || self.dropped {
            return;
        }
        match self.receiver.try_recv() {
            Ok(v) => self.value = Some(v),
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Closed) => self.dropped = true,
        }
    }

    /// True while no answer arrived and the replying side still holds the slot.
    pub fn is_awaited(&mut self) -> bool {
        self.poll_now();
        self.value.is_none() && !self.dropped
    }

    pub fn try_take(&mut self) -> Option<Result<T, RpcError>> {
        self.poll_now();
        if let Some(v) = self.value.take() {
            Some(Ok(v))
        } else if self.dropped {
            Some(Err(RpcError::Dropped(self.from.to_string())))
        } else {
            None
        }
    }

    /// Stops waiting: once closed, the replying side can no longer send.
    /// A value that arrived before the call is still returned.
    pub fn close(&mut self) -> Option<T> {
        self.receiver.close();
        self.poll_now();
        self.value.take()
    }

    /// Waits for the answer. Cancel safe, it can be used as a `select!` branch
    /// and polled again later.
    pub async fn resolved(&mut self) -> Result<T, RpcError> {
        if let Some(v) = self.value.take() {
            return Ok(v);
        }
        if self.dropped {
            return Err(RpcError::Dropped(self.from.to_string()));
        }
        // A completed receiver must not be polled again.
        match (&mut self.receiver).await {
            Ok(v) => {
                self.dropped = true;
                Ok(v)
            }
            Err(_) => {
                self.dropped = true;
                Err(RpcError::Dropped(self.from.to_string()))
            }
        }
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<T, RpcError> {
        match tokio::time::timeout(timeout, self.resolved()).await {
            Ok(res) => res,
            Err(_) => Err(RpcError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_and_timeout() {
        let (tx, mut fut) = ReplyFuture::<u8>::pair(Arc::from("peer"));
        drop(tx);
        assert!(!fut.is_awaited());
        assert!(matches!(fut.try_take(), Some(Err(RpcError::Dropped(_)))));

        let (_tx, fut) = ReplyFuture::<u8>::pair(Arc::from("peer"));
        let res = fut.wait(Duration::from_millis(20)).await;
        assert!(matches!(res, Err(RpcError::Timeout(_))));

        let (tx, mut fut) = ReplyFuture::<u8>::pair(Arc::from("peer"));
        assert!(fut.close().is_none());
        assert!(!tx.send(1));

        let (tx, mut fut) = ReplyFuture::<u8>::pair(Arc::from("peer"));
        assert!(tx.send(9));
        assert_eq!(fut.close(), Some(9));

        let mut ready = ReplyFuture::ready(3u8);
        assert!(!ready.is_awaited());
        assert_eq!(ready.resolved().await.unwrap(), 3);
    }
}
