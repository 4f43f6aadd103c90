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

//! The `ReplacementCache` contract and a reference adapter.
//!
//! The trait shape follows the usual push/pop/access/remove eviction
//! interface, generalized to an admission-aware contract
//! (`get_or_create`/`update_size`/`remove`). [`LruReplacementCache`] uses
//! the `lru` crate rather than an intrusive handle arena: defining a new
//! replacement policy is out of scope here, so the reference adapter stays
//! a thin, safe wrapper instead of inventing one.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use shardcache_common::Value;

use crate::entry::CacheEntry;

/// The outer admission/eviction policy component. Core components depend
/// only on this trait, never on a concrete policy.
pub trait ReplacementCache<K, V>: Send + Sync + 'static
where
    V: Value,
{
    /// Returns the existing entry for `key`, or creates and indexes a new
    /// one.
    fn get_or_create(self: Arc<Self>, key: K, is_async: bool) -> Arc<CacheEntry<K, V>>;

    fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>>;

    /// Records the final materialized size for `key`'s entry, for charge
    /// accounting; called with the total length delivered to listeners.
    fn update_size(&self, key: &K, size: usize);

    /// Removes `key` immediately, e.g. after an admission-policy drop or a
    /// propagated `DEL`.
    fn remove(&self, key: &K);
}

struct Shard<K, V>
where
    V: Value,
{
    lru: LruCache<K, Arc<CacheEntry<K, V>>>,
}

/// A sharded, mutex-per-shard LRU [`ReplacementCache`]. Shard selection is
/// by `ahash` of the key — a simple sharded-by-hash design rather than a
/// full intrusive handle/indexer arena.
pub struct LruReplacementCache<K, V>
where
    V: Value,
{
    shards: Vec<Mutex<Shard<K, V>>>,
}

fn shard_index<K: Hash>(key: &K, shard_count: usize) -> usize {
    use std::hash::BuildHasher;
    let hasher = ahash::RandomState::with_seeds(0, 0, 0, 0);
    (hasher.hash_one(key) as usize) % shard_count
}

impl<K, V> LruReplacementCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Value,
{
    pub fn new(capacity_per_shard: usize, shard_count: usize) -> Arc<Self> {
        let cap = NonZeroUsize::new(capacity_per_shard.max(1)).unwrap();
        let shards = (0..shard_count.max(1))
            .map(|_| {
                Mutex::new(Shard {
                    lru: LruCache::new(cap),
                })
            })
            .collect();
        Arc::new(Self { shards })
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        &self.shards[shard_index(key, self.shards.len())]
    }
}

impl<K, V> ReplacementCache<K, V> for LruReplacementCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Value,
{
    fn get_or_create(self: Arc<Self>, key: K, is_async: bool) -> Arc<CacheEntry<K, V>> {
        let mut shard = self.shard(&key).lock();
        if let Some(entry) = shard.lru.get(&key) {
            return entry.clone();
        }
        let entry = CacheEntry::create(key.clone(), is_async);
        let weak_self: std::sync::Weak<dyn ReplacementCache<K, V>> = Arc::downgrade(&self) as _;
        entry.set_replacement_cache(weak_self);
        shard.lru.put(key, entry.clone());
        entry
    }

    fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.shard(key).lock().lru.get(key).cloned()
    }

    fn update_size(&self, _key: &K, _size: usize) {
        // Charge accounting is delegated to the `lru` crate's own
        // capacity-based eviction; this adapter does not track byte-level
        // charges.
    }

    fn remove(&self, key: &K) {
        self.shard(key).lock().lru.pop(key);
    }
}
