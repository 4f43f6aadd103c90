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

//! `Router`: the cache-instance-local half of peer/node resolution
//! consulted by `FetchCoordinator` — distinct from `shardcache-client`'s
//! `ClientRouter`, which is the caller-facing multi-node client.

use std::net::SocketAddr;

/// A node's identity: its label on the consistent-hash ring and the
/// address `PeerFetchDriver` dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub label: String,
    pub address: SocketAddr,
}

#[derive(Debug, Clone)]
pub enum Ownership {
    Local,
    Remote(Owner),
}

#[derive(Debug, Clone)]
pub enum MigrationOwnership {
    /// The migration ring names the current node as the new owner.
    Local,
    /// Retry against this owner under the migration ring.
    Remote(Owner),
    /// No migration is in progress, or the migration ring could not
    /// resolve an owner either — treated as a fatal error for this
    /// request, never a silent fallback.
    Unknown,
}

/// Resolves key ownership against the primary ring and, during a
/// migration window, the provisional ring.
pub trait Router: Send + Sync + 'static {
    fn owns_locally(&self, key: &[u8]) -> Ownership;

    fn owns_in_migration(&self, key: &[u8]) -> MigrationOwnership;

    /// `true` when the configured `Storage` is declared global: a global
    /// store is consulted locally even for keys this node does not own,
    /// short-circuiting further peer retries.
    fn storage_is_global(&self) -> bool {
        false
    }
}
