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

//! `VolatileStore`: the in-process TTL map consulted when
//! `use_persistent_storage` is false, or alongside `Storage` as the
//! first, cheaper lookup.
//!
//! A `parking_lot`-guarded hash map plus a deadline index, not a
//! region/device abstraction: no on-disk layout concerns apply here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shardcache_common::{Key, Value};

struct Slot<V> {
    value: V,
    deadline: Option<Instant>,
}

/// A TTL-aware in-memory map. Unlike [`crate::Storage`], entries here are
/// not durable: process restart loses everything, which is exactly what
/// "volatile" means here.
pub struct VolatileStore<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for VolatileStore<K, V>
where
    K: Key,
    V: Value,
{
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> VolatileStore<K, V>
where
    K: Key,
    V: Value,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` for `key`. `ttl` of `None` (or `Some(Duration::ZERO)`)
    /// means "never expires", matching `expire_time = 0` disabling
    /// expiration.
    pub fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let deadline = ttl.filter(|d| !d.is_zero()).map(|d| Instant::now() + d);
        self.slots.lock().insert(key, Slot { value, deadline });
    }

    /// Looks up `key`, lazily evicting it if its deadline has passed.
    /// This realizes `lazy_expiration`: no background task is required for
    /// correctness, only for promptness.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut slots = self.slots.lock();
        let expired = match slots.get(key) {
            Some(slot) => slot.deadline.is_some_and(|d| d <= Instant::now()),
            None => return None,
        };
        if expired {
            slots.remove(key);
            return None;
        }
        slots.get(key).map(|slot| slot.value.clone())
    }

    pub fn remove(&self, key: &K) {
        self.slots.lock().remove(key);
    }

    /// Sweeps every expired entry. Called by [`crate::Expirer`] on its
    /// timer tick when `lazy_expiration` is false.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| slot.deadline.is_none_or(|d| d > now));
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let store: VolatileStore<Vec<u8>, Vec<u8>> = VolatileStore::new();
        store.put(b"k".to_vec(), b"v".to_vec(), None);
        assert_eq!(store.get(&b"k".to_vec()), Some(b"v".to_vec()));
    }

    #[test]
    fn test_ttl_zero_never_expires() {
        let store: VolatileStore<Vec<u8>, Vec<u8>> = VolatileStore::new();
        store.put(b"k".to_vec(), b"v".to_vec(), Some(Duration::ZERO));
        assert_eq!(store.get(&b"k".to_vec()), Some(b"v".to_vec()));
    }

    #[test]
    fn test_expiry_removes_entry() {
        let store: VolatileStore<Vec<u8>, Vec<u8>> = VolatileStore::new();
        store.put(b"k".to_vec(), b"v".to_vec(), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get(&b"k".to_vec()), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_expired_counts_removed() {
        let store: VolatileStore<Vec<u8>, Vec<u8>> = VolatileStore::new();
        store.put(b"a".to_vec(), b"1".to_vec(), Some(Duration::from_millis(1)));
        store.put(b"b".to_vec(), b"2".to_vec(), None);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
