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

//! The `Storage` contract: the persistent backend consulted by durable
//! lookups when `use_persistent_storage` is enabled.
//!
//! A plain synchronous get/put/remove contract — this crate has no
//! on-disk layout of its own, only a pluggable backend trait.

use shardcache_common::{Key, Result, Value};

/// A durable key/value backend. Implementations are expected to be cheap
/// to clone (e.g. an `Arc`-wrapped handle) since they are shared across
/// every shard of the cache.
pub trait Storage<K, V>: Send + Sync + 'static
where
    K: Key,
    V: Value,
{
    fn get(&self, key: &K) -> Result<Option<V>>;

    fn put(&self, key: K, value: V) -> Result<()>;

    fn remove(&self, key: &K) -> Result<()>;

    fn exists(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
