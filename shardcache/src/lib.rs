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

//! A distributed, sharded, in-memory cache with consistent-hashing
//! routing, single-flight fetch coordination, and a peer wire protocol.
//!
//! This crate is the facade that glues `shardcache-memory`'s cache core,
//! `shardcache-storage`'s pluggable backends, and `shardcache-net`'s wire
//! protocol into one runnable node: [`cache::Cache`] is the local
//! instance, [`router::RingRouter`] resolves ownership against a
//! consistent-hash ring, and [`server::PeerServer`] answers other nodes'
//! requests over TCP. Reach for `shardcache-client` instead when only the
//! caller-facing multi-node client is needed.

pub mod cache;
pub mod router;
pub mod server;

pub mod prelude {
    pub use crate::cache::{Cache, CacheBuilder};
    pub use crate::router::RingRouter;
    pub use crate::server::PeerServer;
    pub use shardcache_client::{Client, Node};
    pub use shardcache_common::{Config, Error, Outcome, Result};
    pub use shardcache_memory::{AsyncPeerFetchDriver, PeerFetchDriver, SyncPeerFetchDriver};
}
