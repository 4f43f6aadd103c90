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

//! Consistent-hash ring with virtual replicas (200 per real node by
//! default), realized with a `BTreeMap<u64, usize>` ring rather than a
//! sorted array plus binary search.

use std::collections::BTreeMap;
use std::net::SocketAddr;

/// A physical peer node: its label on the ring and the address dialed to
/// reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub label: String,
    pub address: SocketAddr,
}

fn ring_hash(bytes: &[u8]) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let mut hasher = ahash::RandomState::with_seeds(0xC0FFEE, 0xFACE, 0xD00D, 0xBEEF).build_hasher();
    hasher.write(bytes);
    hasher.finish()
}

/// A consistent-hash ring over a set of [`Node`]s, built from a
/// per-node set of virtual replicas.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    replicas: u32,
    ring: BTreeMap<u64, usize>,
    nodes: Vec<Node>,
}

impl HashRing {
    pub fn new(nodes: Vec<Node>, replicas: u32) -> Self {
        let mut ring = HashRing {
            replicas,
            ring: BTreeMap::new(),
            nodes,
        };
        ring.rebuild();
        ring
    }

    fn rebuild(&mut self) {
        self.ring.clear();
        for (idx, node) in self.nodes.iter().enumerate() {
            for replica in 0..self.replicas {
                let vnode_key = format!("{}-{replica}", node.label);
                self.ring.insert(ring_hash(vnode_key.as_bytes()), idx);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Maps `key` to the node owning it, walking clockwise from the key's
    /// hash to the first ring entry at or past it (wrapping to the first
    /// entry if the key's hash is past every vnode).
    pub fn lookup(&self, key: &[u8]) -> Option<&Node> {
        if self.ring.is_empty() {
            return None;
        }
        let h = ring_hash(key);
        let idx = self
            .ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, idx)| *idx)?;
        self.nodes.get(idx)
    }

    /// Returns a uniformly random node, for `use_random_node` pinning.
    pub fn random_node(&self, rng: &mut impl rand::Rng) -> Option<&Node> {
        if self.nodes.is_empty() {
            return None;
        }
        self.nodes.get(rng.gen_range(0..self.nodes.len()))
    }

    pub fn find_by_label(&self, label: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(label: &str) -> Node {
        Node {
            label: label.to_string(),
            address: "127.0.0.1:11211".parse().unwrap(),
        }
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let ring = HashRing::new(vec![node("a"), node("b"), node("c")], 200);
        let first = ring.lookup(b"some-key").unwrap().label.clone();
        for _ in 0..100 {
            assert_eq!(ring.lookup(b"some-key").unwrap().label, first);
        }
    }

    #[test]
    fn test_distribution_uses_every_node() {
        let ring = HashRing::new(vec![node("a"), node("b"), node("c")], 200);
        let mut seen = std::collections::HashSet::new();
        for i in 0..2000 {
            let key = format!("key-{i}");
            seen.insert(ring.lookup(key.as_bytes()).unwrap().label.clone());
        }
        assert_eq!(seen.len(), 3, "expected all three nodes to own at least one key");
    }

    #[test]
    fn test_empty_ring_returns_none() {
        let ring = HashRing::new(vec![], 200);
        assert!(ring.lookup(b"k").is_none());
    }
}
