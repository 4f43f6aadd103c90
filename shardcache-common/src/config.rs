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

//! Runtime configuration.
//!
//! A single `serde`-derived struct, round-trippable for config files and
//! CLI overrides alike, rather than scattering bare constructor arguments
//! through every component.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds until a volatile entry expires; `0` disables expiration.
    pub expire_time_secs: u32,

    /// If true, do not arm the expirer proactively; evict only on demand
    /// (a `GET` that observes a stale entry removes it lazily).
    pub lazy_expiration: bool,

    /// If true, disables the 1-in-10 admission filter: every remote fetch
    /// is kept.
    pub force_caching: bool,

    /// If false, only `VolatileStore` is consulted locally; the `Storage`
    /// contract is never queried.
    pub use_persistent_storage: bool,

    /// Applied by the connection pool to every peer dial/read.
    pub tcp_timeout: Duration,

    /// Bound on outstanding async fetch work; new async fetches beyond
    /// this depth are rejected with `Error::Cancelled` rather than queued
    /// unboundedly.
    pub async_queue_depth: usize,

    /// Number of virtual nodes per physical node on the consistent-hash
    /// ring, required to construct a `ClientRouter`.
    pub ring_replicas: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expire_time_secs: 0,
            lazy_expiration: false,
            force_caching: false,
            use_persistent_storage: true,
            tcp_timeout: Duration::from_millis(500),
            async_queue_depth: 1024,
            ring_replicas: 200,
        }
    }
}
