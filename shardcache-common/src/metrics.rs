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

//! Counter registration, layered over the `metrics` crate for hit/miss and
//! fetch counters.
//!
//! Plain relaxed atomics are enough here: no counter gates correctness, only
//! observability. `Counters` holds the atomics as the source of truth and
//! mirrors every increment into the global `metrics` recorder so the numbers
//! are both assertable in tests and scrapeable in production.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

#[derive(Debug, Default)]
pub struct Counters {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub fetch_remote: AtomicU64,
    pub fetch_local: AtomicU64,
    pub not_found: AtomicU64,
    pub admission_drops: AtomicU64,
    pub evicts: AtomicU64,
    pub errors: AtomicU64,
}

macro_rules! counter_method {
    ($incr:ident, $field:ident, $metric:literal) => {
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            counter!($metric).increment(1);
        }
    };
}

impl Counters {
    counter_method!(incr_cache_hits, cache_hits, "shardcache_cache_hits");
    counter_method!(incr_cache_misses, cache_misses, "shardcache_cache_misses");
    counter_method!(incr_fetch_remote, fetch_remote, "shardcache_fetch_remote");
    counter_method!(incr_fetch_local, fetch_local, "shardcache_fetch_local");
    counter_method!(incr_not_found, not_found, "shardcache_not_found");
    counter_method!(
        incr_admission_drops,
        admission_drops,
        "shardcache_admission_drops"
    );
    counter_method!(incr_evicts, evicts, "shardcache_evicts");
    counter_method!(incr_errors, errors, "shardcache_errors");

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = Counters::default();
        assert_eq!(counters.cache_hits(), 0);
        assert_eq!(counters.errors.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_incr_methods_update_their_own_field_only() {
        let counters = Counters::default();
        counters.incr_cache_hits();
        counters.incr_cache_hits();
        counters.incr_evicts();
        assert_eq!(counters.cache_hits(), 2);
        assert_eq!(counters.evicts.load(Ordering::Relaxed), 1);
        assert_eq!(counters.cache_misses.load(Ordering::Relaxed), 0);
    }
}
