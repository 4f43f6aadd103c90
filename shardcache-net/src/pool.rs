//  Copyright 2026 shardcache-rs contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! `ConnPool`: per-node connection pooling.
//!
//! Kept as a small hand-rolled bounded pool rather than pulling in a
//! general-purpose pooling crate: the logic needed here — bound per node,
//! dial-on-miss, drop-on-error — does not need a generic
//! `Manager`/`RecycleResult` abstraction.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shardcache_common::Result;

#[async_trait]
pub trait Dial<C>: Send + Sync + 'static {
    async fn dial(&self) -> Result<C>;
}

/// A bounded pool of connections to one peer node. `put` silently drops a
/// connection once the pool is at capacity rather than blocking the
/// caller or growing unboundedly.
pub struct ConnPool<C, D> {
    dialer: D,
    idle: Mutex<VecDeque<C>>,
    max_idle: usize,
}

impl<C, D> ConnPool<C, D>
where
    C: Send + 'static,
    D: Dial<C>,
{
    pub fn new(dialer: D, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            dialer,
            idle: Mutex::new(VecDeque::with_capacity(max_idle)),
            max_idle,
        })
    }

    /// Returns a pooled connection if one is idle, otherwise dials a new
    /// one.
    pub async fn get(&self) -> Result<C> {
        if let Some(conn) = self.idle.lock().pop_front() {
            return Ok(conn);
        }
        self.dialer.dial().await
    }

    /// Returns `conn` to the pool. Must never be called with a connection
    /// still registered with an `IoMux` (see [`crate::mux`]).
    pub fn put(&self, conn: C) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push_back(conn);
        }
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDialer;

    #[async_trait]
    impl Dial<u32> for CountingDialer {
        async fn dial(&self) -> Result<u32> {
            Ok(42)
        }
    }

    #[tokio::test]
    async fn test_get_dials_when_empty() {
        let pool = ConnPool::new(CountingDialer, 4);
        assert_eq!(pool.get().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_put_then_get_reuses() {
        let pool = ConnPool::new(CountingDialer, 4);
        pool.put(7);
        assert_eq!(pool.get().await.unwrap(), 7);
        assert_eq!(pool.idle_len(), 0);
    }

    #[tokio::test]
    async fn test_put_drops_beyond_capacity() {
        let pool = ConnPool::new(CountingDialer, 1);
        pool.put(1);
        pool.put(2);
        assert_eq!(pool.idle_len(), 1);
    }
}
