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

//! [`RingRouter`]: the facade's concrete [`shardcache_memory::Router`],
//! adapting `shardcache-client`'s [`HashRing`] to the cache-instance-local
//! ownership questions `FetchCoordinator` asks. A node with no configured
//! peers owns every key locally, covering the single-node deployment case.

use std::sync::Arc;

use parking_lot::RwLock;
use shardcache_client::{HashRing, Node};
use shardcache_memory::{MigrationOwnership, Owner, Ownership, Router};

const DEFAULT_RING_REPLICAS: u32 = 200;

pub struct RingRouter {
    local_label: String,
    ring: RwLock<HashRing>,
    migration_ring: RwLock<Option<HashRing>>,
    global_storage: bool,
}

impl RingRouter {
    pub fn new(local_label: impl Into<String>, peers: Vec<Node>, global_storage: bool) -> Arc<Self> {
        Arc::new(Self {
            local_label: local_label.into(),
            ring: RwLock::new(HashRing::new(peers, DEFAULT_RING_REPLICAS)),
            migration_ring: RwLock::new(None),
            global_storage,
        })
    }

    /// Installs (or clears, with `None`) the provisional migration-ring
    /// topology, mirroring `shardcache-client`'s `migration_begin`/
    /// `migration_abort` on the peer side.
    pub fn set_migration_ring(&self, peers: Option<Vec<Node>>) {
        *self.migration_ring.write() = peers.map(|p| HashRing::new(p, DEFAULT_RING_REPLICAS));
    }

    pub fn set_peers(&self, peers: Vec<Node>) {
        *self.ring.write() = HashRing::new(peers, DEFAULT_RING_REPLICAS);
    }

    fn owner_of(&self, node: &Node) -> Owner {
        Owner {
            label: node.label.clone(),
            address: node.address,
        }
    }
}

impl Router for RingRouter {
    fn owns_locally(&self, key: &[u8]) -> Ownership {
        let ring = self.ring.read();
        match ring.lookup(key) {
            None => Ownership::Local,
            Some(node) if node.label == self.local_label => Ownership::Local,
            Some(node) => Ownership::Remote(self.owner_of(node)),
        }
    }

    fn owns_in_migration(&self, key: &[u8]) -> MigrationOwnership {
        let migration = self.migration_ring.read();
        let Some(ring) = migration.as_ref() else {
            return MigrationOwnership::Unknown;
        };
        match ring.lookup(key) {
            None => MigrationOwnership::Unknown,
            Some(node) if node.label == self.local_label => MigrationOwnership::Local,
            Some(node) => MigrationOwnership::Remote(self.owner_of(node)),
        }
    }

    fn storage_is_global(&self) -> bool {
        self.global_storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(label: &str, port: u16) -> Node {
        Node {
            label: label.to_string(),
            address: format!("127.0.0.1:{port}").parse().unwrap(),
        }
    }

    #[test]
    fn test_single_node_always_owns_locally() {
        let router = RingRouter::new("a", vec![], false);
        assert!(matches!(router.owns_locally(b"k"), Ownership::Local));
    }

    #[test]
    fn test_migration_ring_starts_unknown() {
        let router = RingRouter::new("a", vec![node("a", 1), node("b", 2)], false);
        assert!(matches!(router.owns_in_migration(b"k"), MigrationOwnership::Unknown));
    }

    #[test]
    fn test_migration_ring_resolves_after_begin() {
        let router = RingRouter::new("a", vec![node("a", 1)], false);
        router.set_migration_ring(Some(vec![node("b", 2)]));
        assert!(matches!(router.owns_in_migration(b"anything"), MigrationOwnership::Remote(_)));
        router.set_migration_ring(None);
        assert!(matches!(router.owns_in_migration(b"anything"), MigrationOwnership::Unknown));
    }
}
