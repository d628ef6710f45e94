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

use crate::CommonResult;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::{Builder, Handle};
use tokio::task::JoinHandle;

/// Named multi-thread tokio runtime shared by every service of a process.
pub struct Runtime {
    name: String,
    io_threads: usize,
    worker_threads: usize,
    inner: tokio::runtime::Runtime,
}

impl Runtime {
    /// # Panics
    /// Panics if the operating system refuses to create the worker threads.
    pub fn new<T: Into<String>>(name: T, io_threads: usize, worker_threads: usize) -> Self {
        let name = name.into();
        match Self::try_new(name.clone(), io_threads, worker_threads) {
            Ok(rt) => rt,
            Err(e) => panic!("Failed to create runtime {}: {}", name, e),
        }
    }

    pub fn try_new<T: Into<String>>(
        name: T,
        io_threads: usize,
        worker_threads: usize,
    ) -> CommonResult<Self> {
        let name = name.into();
        let io_threads = io_threads.max(1);
        let worker_threads = worker_threads.max(1);

        let thread_name = name.clone();
        let seq = AtomicUsize::new(0);
        let inner = Builder::new_multi_thread()
            .worker_threads(io_threads)
            .max_blocking_threads(worker_threads)
            .thread_name_fn(move || {
                let id = seq.fetch_add(1, Ordering::Relaxed);
                format!("{}-{}", thread_name, id)
            })
            .enable_all()
            .build()?;

        Ok(Self {
            name,
            io_threads,
            worker_threads,
            inner,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn io_threads(&self) -> usize {
        self.io_threads
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn handle(&self) -> &Handle {
        self.inner.handle()
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.spawn(task)
    }

    pub fn spawn_blocking<F, R>(&self, task: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.spawn_blocking(task)
    }

    pub fn block_on<F: Future>(&self, task: F) -> F::Output {
        self.inner.block_on(task)
    }
}

#[cfg(test)]
mod tests {
    use super::Runtime;

    #[test]
    fn spawn_and_block_on() {
        let rt = Runtime::new("rt-test", 2, 2);
        assert_eq!(rt.name(), "rt-test");
        let handle = rt.spawn(async { 40 + 2 });
        let v = rt.block_on(handle).unwrap();
        assert_eq!(v, 42);
    }
}
