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

//! Key/value trait bounds used throughout the workspace.
//!
//! Blanket supertraits over the bounds every component needs (shared across
//! threads, hashable, byte-addressable for the wire protocol) rather than a
//! bespoke trait per crate.

use std::fmt::Debug;
use std::hash::Hash;

/// A cache key: hashable, orderable for the consistent-hash ring, and cheap
/// to clone since it is held by both the entry and every in-flight listener
/// registration.
pub trait Key: Clone + Debug + Eq + Hash + Send + Sync + 'static {
    /// Raw bytes used for hashing onto the ring and for wire framing.
    fn as_bytes(&self) -> &[u8];
}

/// A cached value: cheap to clone (cache entries are shared via `Arc`, but
/// callers still receive owned copies from `get`), and byte-addressable for
/// the wire protocol and for computing its on-wire size.
pub trait Value: Clone + Debug + Send + Sync + 'static {
    /// Raw bytes for wire framing and for `CacheEntry::update_size`.
    fn as_bytes(&self) -> &[u8];

    /// Size in bytes, used for the replacement cache's charge accounting.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Key for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Value for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Key for bytes::Bytes {
    fn as_bytes(&self) -> &[u8] {
        self.as_ref()
    }
}

impl Value for bytes::Bytes {
    fn as_bytes(&self) -> &[u8] {
        self.as_ref()
    }
}
