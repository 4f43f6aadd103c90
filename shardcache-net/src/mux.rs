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

//! `IoMux`: the async connection multiplexer contract.
//!
//! The fd handoff between multiplexer and pool is the trickiest
//! invariant here: a connection is either in the pool, in the mux, or
//! held by a handler frame, and transitions must be explicit and
//! single-writer. [`MuxToken`] makes "in mux" a type-level state: it can
//! only be produced by [`IoMux::register`] and only consumed by
//! [`IoMux::deregister`], so a connection cannot be returned to
//! [`crate::ConnPool`] while still registered — there is no method that
//! accepts both a live `MuxToken` and hands the underlying connection back
//! to the pool.

use async_trait::async_trait;
use shardcache_common::Result;

/// A linear capability proving its connection is currently registered
/// with an `IoMux`. Holding a `MuxToken` is the only way to later
/// deregister; dropping it without deregistering leaks the registration
/// (callers are expected to always route through `deregister`).
#[derive(Debug)]
pub struct MuxToken(u64);

impl MuxToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Registers connections for async readiness notification and delivers
/// their completions. `C` is the connection type (e.g. `TcpStream`).
#[async_trait]
pub trait IoMux<C>: Send + Sync + 'static
where
    C: Send + 'static,
{
    /// Registers `conn` for async I/O, returning the token that proves
    /// registration and the connection itself (still owned by the caller;
    /// the mux only watches it).
    async fn register(&self, conn: C) -> Result<(MuxToken, C)>;

    /// Waits for `token`'s connection to become readable/writable and
    /// drives one read-or-write step, returning the number of bytes moved.
    async fn poll(&self, token: &MuxToken, conn: &mut C) -> Result<usize>;

    /// Consumes `token`, deregistering its connection. Only after this
    /// call returns may `conn` be handed to `ConnPool::put`.
    async fn deregister(&self, token: MuxToken, conn: C) -> Result<C>;
}
