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

//! The in-memory cache core: per-key entries, single-flight fetch
//! coordination, the peer fetch driver, probabilistic admission, and the
//! replacement-cache contract.
//!
//! `ClientRouter` — the caller-facing, multi-node client — lives in
//! `shardcache-client`; this crate only needs the cache-instance-local
//! `Router` (see [`router`]) to decide local-vs-remote for a single key.

pub mod admission;
pub mod coordinator;
pub mod driver;
pub mod entry;
pub mod replacement;
pub mod router;

pub use admission::AdmissionPolicy;
pub use coordinator::{FetchCoordinator, FetchOutcome};
pub use driver::{AsyncPeerFetchDriver, PeerFetchDriver, SyncPeerFetchDriver};
pub use entry::{CacheEntry, EntryError, EntryFlags, Listener, ListenerAction, ListenerEvent};
pub use replacement::{LruReplacementCache, ReplacementCache};
pub use router::{MigrationOwnership, Owner, Ownership, Router};
