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

//! `AdmissionPolicy`: decides whether a remotely-fetched value is worth
//! keeping locally.

use rand::Rng;

/// After a successful remote fetch, `should_keep` is consulted with
/// `force_caching` from config. `false` means the entry should be marked
/// `DROP` and removed once its size has been reported.
pub struct AdmissionPolicy {
    force_caching: bool,
}

impl AdmissionPolicy {
    pub fn new(force_caching: bool) -> Self {
        Self { force_caching }
    }

    /// Keep with probability 1/10 unless `force_caching` disables the
    /// filter entirely.
    pub fn should_keep(&self, rng: &mut impl Rng) -> bool {
        self.force_caching || rng.gen_range(0..10) == 0
    }
}
