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

//! [`Cache`]: wires the memory, storage, and router layers into the
//! single object a node's wire-server ([`crate::server`]) and a local
//! embedder both drive.

use std::sync::Arc;

use shardcache_common::{Config, Error, Outcome, Result};
use shardcache_memory::{
    EntryFlags, FetchCoordinator, FetchOutcome, Listener, ListenerAction, ListenerEvent, LruReplacementCache,
    PeerFetchDriver, ReplacementCache, Router,
};
use shardcache_storage::{ExpirationScheduler, ScheduledExpirer, Storage, VolatileStore};

use shardcache_common::metrics::Counters;

/// A single node's whole cache core, generic over the [`PeerFetchDriver`]
/// concretization the embedder supplies (a `shardcache-net` TCP driver in
/// production, a stub in tests).
pub struct Cache<D>
where
    D: PeerFetchDriver<Vec<u8>, Vec<u8>>,
{
    replacement: Arc<LruReplacementCache<Vec<u8>, Vec<u8>>>,
    coordinator: Arc<FetchCoordinator<Vec<u8>, Vec<u8>, D>>,
    volatile: Option<Arc<VolatileStore<Vec<u8>, Vec<u8>>>>,
    storage: Option<Arc<dyn Storage<Vec<u8>, Vec<u8>>>>,
    counters: Arc<Counters>,
}

/// Tunables for constructing a [`Cache`] beyond the peer-fetch wiring:
/// the runtime `Config`, plus the replacement cache's own capacity knobs.
pub struct CacheBuilder<D> {
    router: Arc<dyn Router>,
    driver: Arc<D>,
    volatile: Option<Arc<VolatileStore<Vec<u8>, Vec<u8>>>>,
    storage: Option<Arc<dyn Storage<Vec<u8>, Vec<u8>>>>,
    expirer: Option<Arc<dyn ExpirationScheduler<Vec<u8>>>>,
    config: Config,
    capacity_per_shard: usize,
    shards: usize,
}

impl<D> CacheBuilder<D>
where
    D: PeerFetchDriver<Vec<u8>, Vec<u8>>,
{
    pub fn new(router: Arc<dyn Router>, driver: Arc<D>) -> Self {
        Self {
            router,
            driver,
            volatile: Some(Arc::new(VolatileStore::new())),
            storage: None,
            expirer: None,
            config: Config::default(),
            capacity_per_shard: 1024,
            shards: 16,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage<Vec<u8>, Vec<u8>>>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn expirer(mut self, expirer: Arc<dyn ExpirationScheduler<Vec<u8>>>) -> Self {
        self.expirer = Some(expirer);
        self
    }

    pub fn capacity(mut self, capacity_per_shard: usize, shards: usize) -> Self {
        self.capacity_per_shard = capacity_per_shard;
        self.shards = shards;
        self
    }

    pub fn build(self) -> Arc<Cache<D>> {
        let counters = Arc::new(Counters::default());
        let replacement = LruReplacementCache::new(self.capacity_per_shard, self.shards);

        // Arms proactive per-key expiration when the embedder configured a
        // TTL but didn't bring their own `ExpirationScheduler`. Without
        // this, `expire_time_secs` only reaches `VolatileStore`'s own lazy
        // deadline check, never the entry itself.
        let expirer = self.expirer.or_else(|| {
            if self.config.lazy_expiration || self.config.expire_time_secs == 0 {
                return None;
            }
            let replacement_for_expiry = replacement.clone();
            let scheduler: Arc<dyn ExpirationScheduler<Vec<u8>>> =
                ScheduledExpirer::new(move |key: &Vec<u8>| replacement_for_expiry.remove(key));
            Some(scheduler)
        });

        let coordinator = Arc::new(FetchCoordinator::new(
            self.router,
            self.driver,
            self.volatile.clone(),
            self.storage.clone(),
            expirer,
            self.config,
            counters.clone(),
        ));
        Arc::new(Cache {
            replacement,
            coordinator,
            volatile: self.volatile,
            storage: self.storage,
            counters,
        })
    }
}

impl<D> Cache<D>
where
    D: PeerFetchDriver<Vec<u8>, Vec<u8>>,
{
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Number of live entries in the volatile map, for the `INDEX`
    /// diagnostic op. `0` when no volatile store is configured.
    pub fn volatile_len(&self) -> usize {
        self.volatile.as_ref().map_or(0, |v| v.len())
    }

    /// Materializes `key`'s value: a warm, already-complete entry is
    /// reported as a direct cache hit without touching the coordinator;
    /// anything else goes through `FetchCoordinator::fetch`, with a
    /// one-shot listener collecting the chunks it streams.
    #[fastrace::trace(name = "shardcache::cache::get")]
    pub async fn get(&self, key: Vec<u8>) -> Result<Outcome<Vec<u8>>> {
        if let Some(entry) = self.replacement.get(&key) {
            if entry.flags().contains(EntryFlags::COMPLETE) && !entry.is_empty_data() {
                self.counters.incr_cache_hits();
                let bytes = entry.snapshot().into_iter().flatten().collect();
                return Ok(Outcome::Found(bytes));
            }
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
        let collected: Arc<parking_lot::Mutex<Vec<u8>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let collected_cb = collected.clone();
        let tx_complete = tx.clone();
        let tx_error = tx;
        let listener: Listener<Vec<u8>> = Box::new(move |event| match event {
            ListenerEvent::Chunk(chunk) => {
                collected_cb.lock().extend(chunk);
                ListenerAction::Keep
            }
            ListenerEvent::Complete { .. } => {
                if let Some(tx) = tx_complete.lock().take() {
                    let _ = tx.send(Ok(()));
                }
                ListenerAction::Remove
            }
            ListenerEvent::Error(message) => {
                if let Some(tx) = tx_error.lock().take() {
                    let _ = tx.send(Err(message));
                }
                ListenerAction::Remove
            }
        });

        let entry = self.replacement.clone().get_or_create(key.clone(), true);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = self.replacement.clone();
        let (_, outcome) = self.coordinator.fetch(&entry, &reply_cache, Some(listener)).await?;
        if outcome == FetchOutcome::Error {
            return Err(Error::Cancelled(format!("fetch of key failed (len={})", key.len())));
        }

        match rx.await {
            Ok(Ok(())) => {
                let bytes = std::mem::take(&mut *collected.lock());
                if bytes.is_empty() {
                    Ok(Outcome::NotFound)
                } else {
                    Ok(Outcome::Found(bytes))
                }
            }
            Ok(Err(message)) => Err(Error::StorageFailed(message)),
            Err(_) => Err(Error::Cancelled("fetch listener never resolved".into())),
        }
    }

    #[fastrace::trace(name = "shardcache::cache::set")]
    pub async fn set(&self, key: Vec<u8>, value: Vec<u8>, expire_secs: u32) -> Result<()> {
        let ttl = (expire_secs > 0).then(|| std::time::Duration::from_secs(expire_secs as u64));
        if let Some(volatile) = &self.volatile {
            volatile.put(key.clone(), value.clone(), ttl);
        }
        if let Some(storage) = &self.storage {
            storage.put(key, value).map_err(|e| Error::StorageFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Writes `value` only if `key` is not already present, matching
    /// `shardcache-client`'s `add` wire semantics.
    pub async fn add(&self, key: Vec<u8>, value: Vec<u8>, expire_secs: u32) -> Result<bool> {
        if self.exists(&key).await? {
            return Ok(false);
        }
        self.set(key, value, expire_secs).await?;
        Ok(true)
    }

    #[fastrace::trace(name = "shardcache::cache::del")]
    pub async fn del(&self, key: &[u8]) -> Result<()> {
        let key = key.to_vec();
        if let Some(volatile) = &self.volatile {
            volatile.remove(&key);
        }
        if let Some(storage) = &self.storage {
            storage.remove(&key).map_err(|e| Error::StorageFailed(e.to_string()))?;
        }
        self.replacement.remove(&key);
        Ok(())
    }

    /// Evicts `key` from the replacement cache without touching the
    /// durable/volatile backends — distinct from `DEL`: an eviction is a
    /// cache-tier decision, not a data deletion.
    pub async fn evict(&self, key: &[u8]) -> Result<()> {
        let key = key.to_vec();
        if let Some(entry) = self.replacement.get(&key) {
            entry.evict();
        }
        self.replacement.remove(&key);
        Ok(())
    }

    pub async fn exists(&self, key: &[u8]) -> Result<bool> {
        let key = key.to_vec();
        if let Some(volatile) = &self.volatile {
            if volatile.get(&key).is_some() {
                return Ok(true);
            }
        }
        if let Some(storage) = &self.storage {
            return storage.exists(&key).map_err(|e| Error::StorageFailed(e.to_string()));
        }
        Ok(false)
    }

    /// Re-inserts the current value with a new expiry, the simplest
    /// faithful `TOUCH` realization over a plain TTL map (there is no
    /// separate deadline-only update path on `VolatileStore`).
    pub async fn touch(&self, key: &[u8], expire_secs: u32) -> Result<()> {
        let key = key.to_vec();
        let Some(volatile) = &self.volatile else {
            return Ok(());
        };
        if let Some(value) = volatile.get(&key) {
            let ttl = (expire_secs > 0).then(|| std::time::Duration::from_secs(expire_secs as u64));
            volatile.put(key, value, ttl);
        }
        Ok(())
    }

    pub async fn offset(&self, key: &[u8], offset: u32, len: u32) -> Result<Vec<u8>> {
        let outcome = self.get(key.to_vec()).await?;
        let data = outcome.into_option().unwrap_or_default();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use shardcache_memory::CacheEntry;

    use super::*;
    use crate::router::RingRouter;

    /// Every test below configures a single-node `RingRouter`, so every
    /// key resolves `Ownership::Local` and this driver is never invoked.
    struct NeverCalledDriver;

    #[async_trait]
    impl PeerFetchDriver<Vec<u8>, Vec<u8>> for NeverCalledDriver {
        async fn fetch(
            &self,
            _entry: &Arc<CacheEntry<Vec<u8>, Vec<u8>>>,
            _owner: &shardcache_memory::Owner,
            _cache: &Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>>,
        ) -> Result<()> {
            panic!("single-node router should never delegate to a peer driver");
        }
    }

    fn cache() -> Arc<Cache<NeverCalledDriver>> {
        let router: Arc<dyn Router> = RingRouter::new("local", vec![], false);
        CacheBuilder::new(router, Arc::new(NeverCalledDriver)).build()
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let cache = cache();
        cache.set(b"k".to_vec(), b"value".to_vec(), 0).await.unwrap();
        let outcome = cache.get(b"k".to_vec()).await.unwrap();
        assert_eq!(outcome, Outcome::Found(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let cache = cache();
        let outcome = cache.get(b"missing".to_vec()).await.unwrap();
        assert_eq!(outcome, Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_warm_read_does_not_repeat_coordinator_fetch() {
        let cache = cache();
        cache.set(b"k".to_vec(), b"value".to_vec(), 0).await.unwrap();
        // First `get` drives the coordinator and flips the entry COMPLETE;
        // the second must be served directly from the entry snapshot.
        assert_eq!(cache.get(b"k".to_vec()).await.unwrap(), Outcome::Found(b"value".to_vec()));
        assert_eq!(cache.get(b"k".to_vec()).await.unwrap(), Outcome::Found(b"value".to_vec()));
        assert_eq!(cache.counters().cache_hits(), 1);
    }

    #[tokio::test]
    async fn test_del_removes_from_volatile_and_replacement() {
        let cache = cache();
        cache.set(b"k".to_vec(), b"value".to_vec(), 0).await.unwrap();
        cache.del(b"k").await.unwrap();
        assert_eq!(cache.get(b"k".to_vec()).await.unwrap(), Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_add_rejects_existing_key() {
        let cache = cache();
        assert!(cache.add(b"k".to_vec(), b"first".to_vec(), 0).await.unwrap());
        assert!(!cache.add(b"k".to_vec(), b"second".to_vec(), 0).await.unwrap());
        assert_eq!(cache.get(b"k".to_vec()).await.unwrap(), Outcome::Found(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_offset_returns_requested_slice() {
        let cache = cache();
        cache.set(b"k".to_vec(), b"0123456789".to_vec(), 0).await.unwrap();
        let slice = cache.offset(b"k", 2, 4).await.unwrap();
        assert_eq!(slice, b"2345".to_vec());
    }

    #[tokio::test]
    async fn test_exists_reflects_volatile_store() {
        let cache = cache();
        assert!(!cache.exists(b"k").await.unwrap());
        cache.set(b"k".to_vec(), b"value".to_vec(), 0).await.unwrap();
        assert!(cache.exists(b"k").await.unwrap());
    }
}
