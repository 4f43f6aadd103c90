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

//! `FetchCoordinator`: single-flight fetch, local/remote routing and
//! migration fallback.
//!
//! The single-flight waiter list lives on the entry itself rather than in
//! a shard-level map, so there is no separate in-flight registry to keep
//! in sync with the entry's own state.

use std::sync::Arc;

use shardcache_common::metrics::Counters;
use shardcache_common::{Config, Key, Result, Value};
use shardcache_storage::{ExpirationScheduler, Storage, VolatileStore};

use crate::entry::{CacheEntry, EntryFlags, Listener};
use crate::driver::PeerFetchDriver;
use crate::replacement::ReplacementCache;
use crate::router::{MigrationOwnership, Ownership, Router};

/// Outcome of a single `fetch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The entry now holds a materialized, non-empty value.
    Resident,
    /// The entry held a non-empty value, but the admission policy (or a
    /// peer-level `DROP`) caused it to be removed from the replacement
    /// cache right after its size was reported.
    DropAfterRead,
    /// The key does not exist anywhere it was looked for. Not an error:
    /// distinguished purely for counters.
    NotFound,
    /// A fatal, non-retryable failure. Any registered listeners have
    /// already been notified with an error.
    Error,
}

enum FetchDecision {
    /// Either already materialized, or another leader's fetch is in
    /// flight and we registered as a listener to piggyback on it.
    Piggyback,
    /// We are the sole fetcher for this key; flags were already flipped
    /// to `FETCHING` under the same critical section, closing the race
    /// between the has-data check and the flag flip.
    Leading,
}

/// Coordinates single-flight materialization of a [`CacheEntry`]: decides
/// local vs. remote, drives the configured [`PeerFetchDriver`], falls back
/// through a migration ring on remote failure, and reconciles flags/
/// counters/expiration once the leader's fetch concludes.
pub struct FetchCoordinator<K, V, D>
where
    V: Value,
    D: PeerFetchDriver<K, V>,
{
    router: Arc<dyn Router>,
    driver: Arc<D>,
    volatile: Option<Arc<VolatileStore<K, V>>>,
    storage: Option<Arc<dyn Storage<K, V>>>,
    expirer: Option<Arc<dyn ExpirationScheduler<K>>>,
    config: Config,
    counters: Arc<Counters>,
}

impl<K, V, D> FetchCoordinator<K, V, D>
where
    K: Key,
    V: Value,
    D: PeerFetchDriver<K, V>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<dyn Router>,
        driver: Arc<D>,
        volatile: Option<Arc<VolatileStore<K, V>>>,
        storage: Option<Arc<dyn Storage<K, V>>>,
        expirer: Option<Arc<dyn ExpirationScheduler<K>>>,
        config: Config,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            router,
            driver,
            volatile,
            storage,
            expirer,
            config,
            counters,
        }
    }

    /// Materializes `entry`, optionally registering `listener` for
    /// streaming notification if a fetch is already underway or about to
    /// begin. Returns the entry's final byte length alongside the
    /// outcome.
    pub async fn fetch(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
        cache: &Arc<dyn ReplacementCache<K, V>>,
        listener: Option<Listener<V>>,
    ) -> Result<(usize, FetchOutcome)> {
        self.counters.incr_cache_misses();

        let decision = entry.with_lock(move |guard| {
            let mut listener = listener;
            if guard.has_data() {
                if let Some(cb) = listener.take() {
                    let _ = guard.register_listener(cb);
                }
                return FetchDecision::Piggyback;
            }
            // Only an in-flight async fetch piggybacks; concurrent
            // synchronous callers without a live fetch each become their
            // own leader.
            let following = guard
                .flags()
                .contains(EntryFlags::ASYNC | EntryFlags::FETCHING);
            if let Some(cb) = listener.take() {
                let _ = guard.register_listener(cb);
            }
            if following {
                FetchDecision::Piggyback
            } else {
                guard.remove_flags(EntryFlags::EVICTED);
                guard.insert_flags(EntryFlags::FETCHING);
                FetchDecision::Leading
            }
        });

        let outcome = match decision {
            FetchDecision::Piggyback => FetchOutcome::Resident,
            FetchDecision::Leading => self.fetch_leader(entry, cache).await?,
        };
        Ok((entry.total_len(), outcome))
    }

    async fn fetch_leader(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
        cache: &Arc<dyn ReplacementCache<K, V>>,
    ) -> Result<FetchOutcome> {
        match self.router.owns_locally(entry.key.as_bytes()) {
            Ownership::Local => {
                self.counters.incr_fetch_local();
                self.fetch_local(entry, cache).await
            }
            Ownership::Remote(owner) => {
                // Counted once per fetch_leader() call, not per attempt:
                // the migration-ring retry below is part of the same
                // logical remote fetch.
                self.counters.incr_fetch_remote();
                if self.driver.fetch(entry, &owner, cache).await.is_ok() {
                    return Ok(self.finish(entry, cache));
                }
                // Primary owner failed: retry once against the migration
                // ring's owner if it names one.
                match self.router.owns_in_migration(entry.key.as_bytes()) {
                    MigrationOwnership::Remote(migration_owner) => {
                        if self.driver.fetch(entry, &migration_owner, cache).await.is_ok() {
                            return Ok(self.finish(entry, cache));
                        }
                        self.fall_back_or_fail(entry, cache).await
                    }
                    MigrationOwnership::Local => {
                        self.counters.incr_fetch_local();
                        self.fetch_local(entry, cache).await
                    }
                    MigrationOwnership::Unknown => self.fall_back_or_fail(entry, cache).await,
                }
            }
        }
    }

    /// Falls through to the local path when the migration ring names this
    /// node as the new owner or the configured storage is global;
    /// otherwise an unresolved owner is fatal for this request.
    async fn fall_back_or_fail(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
        cache: &Arc<dyn ReplacementCache<K, V>>,
    ) -> Result<FetchOutcome> {
        if self.router.storage_is_global() {
            self.counters.incr_fetch_local();
            return self.fetch_local(entry, cache).await;
        }
        self.counters.incr_errors();
        self.mark_failed(entry);
        Ok(FetchOutcome::Error)
    }

    async fn fetch_local(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
        cache: &Arc<dyn ReplacementCache<K, V>>,
    ) -> Result<FetchOutcome> {
        let key = entry.key.clone();

        let from_volatile = self.volatile.as_ref().and_then(|v| v.get(&key));
        let value = match from_volatile {
            Some(v) => Some(v),
            None if self.config.use_persistent_storage => match &self.storage {
                Some(storage) => match storage.get(&key) {
                    Ok(v) => v,
                    Err(e) => {
                        self.counters.incr_errors();
                        entry.notify_error(e.to_string());
                        self.mark_failed(entry);
                        return Ok(FetchOutcome::Error);
                    }
                },
                None => None,
            },
            None => None,
        };

        let found = value.is_some();
        if let Some(v) = value {
            entry.notify_chunk(v);
        }
        entry.notify_complete();
        // `update_size` is never invoked on a NotFound miss.
        if found {
            cache.update_size(&key, entry.total_len());
        }
        Ok(self.finish(entry, cache))
    }

    /// Common tail of a successful leader fetch, shared by the local and
    /// remote branches: reconciles `FETCHING`/`COMPLETE`, drains a deferred
    /// `EVICT`, arms expiration, and picks the final [`FetchOutcome`].
    fn finish(&self, entry: &Arc<CacheEntry<K, V>>, cache: &Arc<dyn ReplacementCache<K, V>>) -> FetchOutcome {
        entry.with_lock(|guard| {
            guard.remove_flags(EntryFlags::FETCHING);
            guard.insert_flags(EntryFlags::COMPLETE);
        });

        let was_evicted = entry.flags().contains(EntryFlags::EVICT);
        entry.drain_deferred_evict();
        if was_evicted && entry.flags().contains(EntryFlags::EVICTED) {
            self.counters.incr_evicts();
        }

        if entry.is_empty_data() {
            self.counters.incr_not_found();
            return FetchOutcome::NotFound;
        }

        if !self.config.lazy_expiration && self.config.expire_time_secs > 0 {
            if let Some(expirer) = &self.expirer {
                expirer.schedule(entry.key.clone(), self.config.expire_time_secs);
            }
        }

        if cache.get(&entry.key).is_none() {
            // Distinct from an explicit `Arc.evict()` mid-fetch, already
            // counted above: this is the admission policy (or a remote
            // peer's own `DROP`) removing the entry right after delivery.
            if !(was_evicted && entry.flags().contains(EntryFlags::EVICTED)) {
                self.counters.incr_admission_drops();
            }
            return FetchOutcome::DropAfterRead;
        }
        FetchOutcome::Resident
    }

    /// Transitions a leader that hit a fatal error out of `FETCHING`
    /// (listeners were already notified of the error by the caller before
    /// this runs). The entry is evicted immediately since its data, if
    /// any, is not trustworthy.
    fn mark_failed(&self, entry: &Arc<CacheEntry<K, V>>) {
        entry.with_lock(|guard| {
            guard.remove_flags(EntryFlags::FETCHING);
        });
        entry.evict();
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use shardcache_common::Error;
    use shardcache_storage::NoneStore;

    use super::*;
    use crate::replacement::LruReplacementCache;
    use crate::router::Owner;

    fn addr() -> SocketAddr {
        "127.0.0.1:11211".parse().unwrap()
    }

    struct LocalRouter;
    impl Router for LocalRouter {
        fn owns_locally(&self, _key: &[u8]) -> Ownership {
            Ownership::Local
        }
        fn owns_in_migration(&self, _key: &[u8]) -> MigrationOwnership {
            MigrationOwnership::Unknown
        }
    }

    struct RemoteRouter;
    impl Router for RemoteRouter {
        fn owns_locally(&self, _key: &[u8]) -> Ownership {
            Ownership::Remote(Owner {
                label: "peer-a".into(),
                address: addr(),
            })
        }
        fn owns_in_migration(&self, _key: &[u8]) -> MigrationOwnership {
            MigrationOwnership::Unknown
        }
    }

    struct FailingThenMigratedRouter;
    impl Router for FailingThenMigratedRouter {
        fn owns_locally(&self, _key: &[u8]) -> Ownership {
            Ownership::Remote(Owner {
                label: "peer-a".into(),
                address: addr(),
            })
        }
        fn owns_in_migration(&self, _key: &[u8]) -> MigrationOwnership {
            MigrationOwnership::Local
        }
    }

    struct FailingThenRemoteMigratedRouter;
    impl Router for FailingThenRemoteMigratedRouter {
        fn owns_locally(&self, _key: &[u8]) -> Ownership {
            Ownership::Remote(Owner {
                label: "peer-a".into(),
                address: addr(),
            })
        }
        fn owns_in_migration(&self, _key: &[u8]) -> MigrationOwnership {
            MigrationOwnership::Remote(Owner {
                label: "peer-b".into(),
                address: addr(),
            })
        }
    }

    /// A `PeerFetchDriver` stub that always fails, for exercising the
    /// migration-fallback and fatal-error paths without any real network.
    struct AlwaysFailDriver;
    #[async_trait]
    impl PeerFetchDriver<Vec<u8>, Vec<u8>> for AlwaysFailDriver {
        async fn fetch(
            &self,
            entry: &Arc<CacheEntry<Vec<u8>, Vec<u8>>>,
            _owner: &Owner,
            _cache: &Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>>,
        ) -> Result<()> {
            entry.notify_error("peer unreachable");
            Err(Error::NetworkUnavailable(std::io::Error::other("down")))
        }
    }

    /// A `PeerFetchDriver` stub that succeeds with a fixed payload,
    /// counting invocations to assert single-flight dedup.
    struct CountingSuccessDriver {
        calls: AtomicUsize,
        payload: Vec<u8>,
    }
    #[async_trait]
    impl PeerFetchDriver<Vec<u8>, Vec<u8>> for CountingSuccessDriver {
        async fn fetch(
            &self,
            entry: &Arc<CacheEntry<Vec<u8>, Vec<u8>>>,
            _owner: &Owner,
            cache: &Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>>,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            entry.notify_chunk(self.payload.clone());
            entry.notify_complete();
            cache.update_size(&entry.key, entry.total_len());
            Ok(())
        }
    }

    fn cache() -> Arc<LruReplacementCache<Vec<u8>, Vec<u8>>> {
        LruReplacementCache::new(64, 1)
    }

    #[tokio::test]
    async fn test_local_hit_from_volatile_store() {
        let volatile = Arc::new(VolatileStore::<Vec<u8>, Vec<u8>>::new());
        volatile.put(b"k".to_vec(), b"value".to_vec(), None);
        let coordinator = FetchCoordinator::new(
            Arc::new(LocalRouter),
            Arc::new(CountingSuccessDriver {
                calls: AtomicUsize::new(0),
                payload: vec![],
            }),
            Some(volatile),
            Some(Arc::new(NoneStore::<Vec<u8>, Vec<u8>>::default())),
            None,
            Config::default(),
            Arc::new(Counters::default()),
        );
        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;
        let (size, outcome) = coordinator.fetch(&entry, &reply_cache, None).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(outcome, FetchOutcome::Resident);
    }

    #[tokio::test]
    async fn test_not_found_does_not_invoke_update_size() {
        let storage = Arc::new(NoneStore::<Vec<u8>, Vec<u8>>::default());
        let counters = Arc::new(Counters::default());
        let coordinator = FetchCoordinator::new(
            Arc::new(LocalRouter),
            Arc::new(CountingSuccessDriver {
                calls: AtomicUsize::new(0),
                payload: vec![],
            }),
            None,
            Some(storage),
            None,
            Config::default(),
            counters.clone(),
        );
        let cache = cache();
        let entry = cache.clone().get_or_create(b"missing".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;
        let (size, outcome) = coordinator.fetch(&entry, &reply_cache, None).await.unwrap();
        assert_eq!(size, 0);
        assert_eq!(outcome, FetchOutcome::NotFound);
        assert_eq!(counters.not_found.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_single_flight_dedupes_concurrent_leaders() {
        let driver = Arc::new(CountingSuccessDriver {
            calls: AtomicUsize::new(0),
            payload: b"xyz".to_vec(),
        });
        let coordinator = Arc::new(FetchCoordinator::new(
            Arc::new(RemoteRouter),
            driver.clone(),
            None,
            None,
            None,
            Config::default(),
            Arc::new(Counters::default()),
        ));
        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), true);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;

        // Flip the entry straight to FETCHING as a real leader would, then
        // have every "caller" in this test go through the follower path.
        entry.with_lock(|g| g.insert_flags(EntryFlags::FETCHING));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let entry = entry.clone();
            let reply_cache = reply_cache.clone();
            handles.push(tokio::spawn(async move {
                coordinator.fetch(&entry, &reply_cache, None).await.unwrap()
            }));
        }
        for h in handles {
            let (_, outcome) = h.await.unwrap();
            assert_eq!(outcome, FetchOutcome::Resident);
        }
        // No leader ever ran (we pre-set FETCHING ourselves), so the
        // driver must never have been invoked.
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_migration_fallback_to_local_after_remote_failure() {
        let volatile = Arc::new(VolatileStore::<Vec<u8>, Vec<u8>>::new());
        volatile.put(b"k".to_vec(), b"local-value".to_vec(), None);
        let counters = Arc::new(Counters::default());
        let coordinator = FetchCoordinator::new(
            Arc::new(FailingThenMigratedRouter),
            Arc::new(AlwaysFailDriver),
            Some(volatile),
            None,
            None,
            Config::default(),
            counters.clone(),
        );
        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;
        let (size, outcome) = coordinator.fetch(&entry, &reply_cache, None).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Resident);
        assert_eq!(size, b"local-value".len());
        assert_eq!(counters.fetch_local.load(Ordering::Relaxed), 1);
        assert_eq!(counters.fetch_remote.load(Ordering::Relaxed), 1);
    }

    /// A `PeerFetchDriver` stub that fails against the primary owner and
    /// succeeds against the migration-ring owner, for asserting
    /// `fetch_remote` counts the whole retry sequence once.
    struct FailPrimarySucceedMigrationDriver {
        payload: Vec<u8>,
    }
    #[async_trait]
    impl PeerFetchDriver<Vec<u8>, Vec<u8>> for FailPrimarySucceedMigrationDriver {
        async fn fetch(
            &self,
            entry: &Arc<CacheEntry<Vec<u8>, Vec<u8>>>,
            owner: &Owner,
            cache: &Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>>,
        ) -> Result<()> {
            if owner.label == "peer-a" {
                entry.notify_error("peer unreachable");
                return Err(Error::NetworkUnavailable(std::io::Error::other("down")));
            }
            entry.notify_chunk(self.payload.clone());
            entry.notify_complete();
            cache.update_size(&entry.key, entry.total_len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fetch_remote_counted_once_across_migration_retry() {
        let counters = Arc::new(Counters::default());
        let coordinator = FetchCoordinator::new(
            Arc::new(FailingThenRemoteMigratedRouter),
            Arc::new(FailPrimarySucceedMigrationDriver {
                payload: b"migrated-value".to_vec(),
            }),
            None,
            None,
            None,
            Config::default(),
            counters.clone(),
        );
        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;
        let (size, outcome) = coordinator.fetch(&entry, &reply_cache, None).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Resident);
        assert_eq!(size, b"migrated-value".len());
        assert_eq!(counters.fetch_remote.load(Ordering::Relaxed), 1);
    }

    /// A `PeerFetchDriver` stub that delivers a value then removes it from
    /// the replacement cache, the same way `driver.rs`'s admission-policy
    /// rejection does after a successful remote fetch.
    struct DropAfterDeliveryDriver {
        payload: Vec<u8>,
    }
    #[async_trait]
    impl PeerFetchDriver<Vec<u8>, Vec<u8>> for DropAfterDeliveryDriver {
        async fn fetch(
            &self,
            entry: &Arc<CacheEntry<Vec<u8>, Vec<u8>>>,
            _owner: &Owner,
            cache: &Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>>,
        ) -> Result<()> {
            entry.notify_chunk(self.payload.clone());
            entry.notify_complete();
            cache.update_size(&entry.key, entry.total_len());
            cache.remove(&entry.key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_admission_drop_reports_drop_after_read_and_counts() {
        let counters = Arc::new(Counters::default());
        let coordinator = FetchCoordinator::new(
            Arc::new(RemoteRouter),
            Arc::new(DropAfterDeliveryDriver {
                payload: b"cold-value".to_vec(),
            }),
            None,
            None,
            None,
            Config::default(),
            counters.clone(),
        );
        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;
        let (size, outcome) = coordinator.fetch(&entry, &reply_cache, None).await.unwrap();
        assert_eq!(outcome, FetchOutcome::DropAfterRead);
        assert_eq!(size, b"cold-value".len());
        assert_eq!(counters.admission_drops.load(Ordering::Relaxed), 1);
        assert_eq!(counters.evicts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_unresolved_owner_is_fatal() {
        let counters = Arc::new(Counters::default());
        let coordinator = FetchCoordinator::new(
            Arc::new(RemoteRouter),
            Arc::new(AlwaysFailDriver),
            None,
            None,
            None,
            Config::default(),
            counters.clone(),
        );
        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;
        let (_, outcome) = coordinator.fetch(&entry, &reply_cache, None).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Error);
        assert_eq!(counters.errors.load(Ordering::Relaxed), 1);
        assert_eq!(counters.fetch_remote.load(Ordering::Relaxed), 1);
        assert!(entry.flags().contains(EntryFlags::EVICTED));
    }
}
