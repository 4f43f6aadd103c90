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

//! An always-miss `Storage`. Used when `use_persistent_storage` is false
//! or no backend is configured.

use std::marker::PhantomData;

use shardcache_common::{Key, Result, Value};

use crate::storage::Storage;

#[derive(Debug)]
pub struct NoneStore<K, V>(PhantomData<(K, V)>);

impl<K, V> Default for NoneStore<K, V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K, V> Clone for NoneStore<K, V> {
    fn clone(&self) -> Self {
        Self(PhantomData)
    }
}

impl<K, V> Storage<K, V> for NoneStore<K, V>
where
    K: Key,
    V: Value,
{
    fn get(&self, _key: &K) -> Result<Option<V>> {
        Ok(None)
    }

    fn put(&self, _key: K, _value: V) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &K) -> Result<()> {
        Ok(())
    }

    fn exists(&self, _key: &K) -> Result<bool> {
        Ok(false)
    }
}
