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

//! The `Expirer` contract covers two surfaces: `schedule(key,
//! seconds)`/`unschedule(key)` for arming a single key's proactive
//! expiration, plus a background sweep of the volatile map, required by
//! `VolatileStore`'s own TTL bookkeeping.
//!
//! Both the per-key scheduler and the sweeper are single spawned `tokio`
//! tasks, stopped by dropping their handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shardcache_common::{Key, Value};
use tokio::task::JoinHandle;

use crate::volatile::VolatileStore;

/// The per-key half of the `Expirer` contract: `FetchCoordinator` calls
/// `schedule` after a non-lazy, non-evicted materialization.
pub trait ExpirationScheduler<K>: Send + Sync + 'static {
    fn schedule(&self, key: K, seconds: u32);
    fn unschedule(&self, key: &K);
}

/// Schedules one deferred callback per key, cancelling and replacing any
/// prior schedule for the same key. `seconds == 0` is a no-op:
/// `expire_time = 0` means "expiration disabled".
pub struct ScheduledExpirer<K> {
    tasks: Mutex<HashMap<K, JoinHandle<()>>>,
    on_expire: Arc<dyn Fn(&K) + Send + Sync>,
}

impl<K> ScheduledExpirer<K>
where
    K: Key,
{
    pub fn new(on_expire: impl Fn(&K) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            on_expire: Arc::new(on_expire),
        })
    }
}

impl<K> ExpirationScheduler<K> for ScheduledExpirer<K>
where
    K: Key,
{
    fn schedule(&self, key: K, seconds: u32) {
        if seconds == 0 {
            return;
        }
        let on_expire = self.on_expire.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds as u64)).await;
            (on_expire)(&task_key);
        });
        if let Some(previous) = self.tasks.lock().insert(key, handle) {
            previous.abort();
        }
    }

    fn unschedule(&self, key: &K) {
        if let Some(handle) = self.tasks.lock().remove(key) {
            handle.abort();
        }
    }
}

impl<K> Drop for ScheduledExpirer<K> {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

/// Periodically sweeps expired entries out of a [`VolatileStore`].
/// Dropping the `Expirer` aborts the background task; it carries no other
/// cleanup responsibility.
pub struct Expirer {
    handle: JoinHandle<()>,
}

impl Expirer {
    /// Spawns a background sweep loop ticking every `interval`. A caller
    /// configuring `lazy_expiration = true` simply never constructs an
    /// `Expirer`; expiration still happens lazily inside
    /// `VolatileStore::get`.
    pub fn spawn<K, V>(store: Arc<VolatileStore<K, V>>, interval: Duration) -> Self
    where
        K: Key,
        V: Value,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "expirer swept expired entries");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Expirer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
