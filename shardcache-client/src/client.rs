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

//! `Client` / `ClientRouter`: node selection over the consistent-hash
//! ring, a pooled connection per peer, and the single-key operation
//! surface, including a pinned-random retry-3-times failover mode.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use shardcache_common::{Error, Result};
use shardcache_net::tcp::{TcpDialer, TcpPeerProtocol};
use shardcache_net::{ConnPool, Dial, Frame, Opcode, PeerProtocol};

use crate::ring::{HashRing, Node};

/// Default virtual replicas per physical node.
pub const DEFAULT_RING_REPLICAS: u32 = 200;

/// Client-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    Args,
    Network,
    Node,
}

struct PeerDialer {
    addr: SocketAddr,
    timeout: Duration,
    secret: Option<Vec<u8>>,
}

#[async_trait]
impl Dial<TcpPeerProtocol> for PeerDialer {
    async fn dial(&self) -> Result<TcpPeerProtocol> {
        let stream = TcpDialer {
            addr: self.addr,
            timeout: self.timeout,
        }
        .dial()
        .await?;
        Ok(TcpPeerProtocol::new(stream, self.secret.clone()))
    }
}

pub(crate) type PeerPool = ConnPool<TcpPeerProtocol, PeerDialer>;

pub(crate) async fn roundtrip(pool: &Arc<PeerPool>, frame: &Frame) -> Result<Frame> {
    let mut conn = pool.get().await?;
    let result = async {
        conn.send_frame(frame).await?;
        conn.recv_frame().await
    }
    .await;
    match result {
        Ok(resp) => {
            pool.put(conn);
            Ok(resp)
        }
        // A connection that faulted mid-roundtrip is never returned to
        // the pool: it is simply dropped here.
        Err(e) => Err(e),
    }
}

pub(crate) fn response_payload(frame: Frame) -> Option<Vec<u8>> {
    let data: Vec<u8> = frame.records.into_iter().flatten().collect();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

pub(crate) fn status_ok(frame: &Frame) -> bool {
    frame.records.first().and_then(|r| r.first()).copied() == Some(1)
}

fn encode_topology(nodes: &[Node]) -> Bytes {
    let joined = nodes
        .iter()
        .map(|n| format!("{}@{}", n.label, n.address))
        .collect::<Vec<_>>()
        .join(";");
    Bytes::from(joined.into_bytes())
}

/// The caller-facing, multi-node cache client. Distinct from
/// [`crate::ring`]-internal node selection: this is the whole per-client
/// object, owning a connection pool per peer plus mutable state for the
/// last error code/message and a pin-to-one-random-node mode.
pub struct Client {
    ring: RwLock<HashRing>,
    migration_ring: RwLock<Option<HashRing>>,
    pools: RwLock<HashMap<String, Arc<PeerPool>>>,
    secret: Option<Vec<u8>>,
    tcp_timeout: Mutex<Duration>,
    use_random_node: AtomicBool,
    last_error: Mutex<(ErrorCode, String)>,
}

impl Client {
    /// Builds the ring over `nodes` with the default 200 virtual replicas
    /// and an empty connection pool set.
    pub fn create(nodes: Vec<Node>, auth: Option<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            ring: RwLock::new(HashRing::new(nodes, DEFAULT_RING_REPLICAS)),
            migration_ring: RwLock::new(None),
            pools: RwLock::new(HashMap::new()),
            secret: auth,
            tcp_timeout: Mutex::new(Duration::from_millis(500)),
            use_random_node: AtomicBool::new(false),
            last_error: Mutex::new((ErrorCode::Ok, String::new())),
        })
    }

    /// No separate teardown is required: dropping the last `Arc` drops
    /// every pooled connection and any in-flight migration state with it.
    pub fn destroy(self: Arc<Self>) {}

    pub fn tcp_timeout(&self, timeout: Duration) {
        *self.tcp_timeout.lock() = timeout;
    }

    /// Enables or disables pinned-random node selection, returning the
    /// previous value.
    pub fn use_random_node(&self, enabled: bool) -> bool {
        self.use_random_node.swap(enabled, Ordering::Relaxed)
    }

    pub fn errno(&self) -> ErrorCode {
        self.last_error.lock().0
    }

    pub fn errstr(&self) -> String {
        self.last_error.lock().1.clone()
    }

    /// `true` while a `migration_begin` topology is in effect and has
    /// not yet been aborted.
    pub fn migration_in_progress(&self) -> bool {
        self.migration_ring.read().is_some()
    }

    fn record_ok(&self) {
        *self.last_error.lock() = (ErrorCode::Ok, String::new());
    }

    fn record_error(&self, err: &Error) {
        let code = match err {
            Error::ArgumentInvalid(_) => ErrorCode::Args,
            Error::NetworkUnavailable(_) | Error::Cancelled(_) | Error::Protocol(_) => ErrorCode::Network,
            Error::PeerRefused(_) | Error::StorageFailed(_) => ErrorCode::Node,
        };
        *self.last_error.lock() = (code, err.to_string());
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.record_ok(),
            Err(e) => self.record_error(e),
        }
        result
    }

    pub(crate) fn pool_for(&self, node: &Node) -> Arc<PeerPool> {
        if let Some(pool) = self.pools.read().get(&node.label) {
            return pool.clone();
        }
        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(&node.label) {
            return pool.clone();
        }
        let dialer = PeerDialer {
            addr: node.address,
            timeout: *self.tcp_timeout.lock(),
            secret: self.secret.clone(),
        };
        let pool = ConnPool::new(dialer, 8);
        pools.insert(node.label.clone(), pool.clone());
        pool
    }

    pub(crate) fn node_for_key(&self, key: &[u8]) -> Result<Node> {
        let ring = self.ring.read();
        ring.lookup(key)
            .cloned()
            .ok_or_else(|| Error::ArgumentInvalid("no nodes configured".into()))
    }

    fn node_by_label(&self, label: &str) -> Result<Node> {
        self.ring
            .read()
            .find_by_label(label)
            .cloned()
            .ok_or_else(|| Error::ArgumentInvalid(format!("unknown node {label}")))
    }

    /// Dispatches `frame` to the node owning `key`. Under pinned-random
    /// mode, retries up to 3 times against a freshly chosen node, never
    /// repeating the immediately prior pick.
    pub(crate) async fn dispatch(&self, key: &[u8], frame: Frame) -> Result<Frame> {
        if !self.use_random_node.load(Ordering::Relaxed) {
            let node = self.node_for_key(key)?;
            let pool = self.pool_for(&node);
            return roundtrip(&pool, &frame).await;
        }

        let mut excluded: Option<String> = None;
        let mut last_err: Option<Error> = None;
        for _ in 0..3 {
            let node = {
                let ring = self.ring.read();
                if ring.is_empty() {
                    return Err(Error::ArgumentInvalid("no nodes configured".into()));
                }
                let mut rng = rand::thread_rng();
                let mut candidate = ring.random_node(&mut rng).cloned();
                if ring.nodes().len() > 1 {
                    while candidate.as_ref().map(|n| &n.label) == excluded.as_ref() {
                        candidate = ring.random_node(&mut rng).cloned();
                    }
                }
                candidate
            };
            let Some(node) = node else {
                return Err(Error::ArgumentInvalid("no nodes configured".into()));
            };
            excluded = Some(node.label.clone());
            let pool = self.pool_for(&node);
            match roundtrip(&pool, &frame).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NetworkUnavailable(std::io::Error::other("no nodes reachable"))))
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let frame = Frame::new(Opcode::Get, vec![Bytes::copy_from_slice(key)]);
        let resp = self.track(self.dispatch(key, frame).await)?;
        Ok(response_payload(resp))
    }

    /// Spawns the fetch and invokes `cb` on completion, without blocking
    /// the caller.
    pub fn get_async<F>(self: &Arc<Self>, key: Vec<u8>, cb: F)
    where
        F: FnOnce(Result<Option<Vec<u8>>>) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            let result = client.get(&key).await;
            cb(result);
        });
    }

    pub async fn offset(&self, key: &[u8], offset: u32, len: u32) -> Result<Vec<u8>> {
        let frame = Frame::new(
            Opcode::Offset,
            vec![
                Bytes::copy_from_slice(key),
                Bytes::copy_from_slice(&offset.to_be_bytes()),
                Bytes::copy_from_slice(&len.to_be_bytes()),
            ],
        );
        let resp = self.track(self.dispatch(key, frame).await)?;
        Ok(response_payload(resp).unwrap_or_default())
    }

    pub async fn exists(&self, key: &[u8]) -> Result<bool> {
        let frame = Frame::new(Opcode::Exists, vec![Bytes::copy_from_slice(key)]);
        let resp = self.track(self.dispatch(key, frame).await)?;
        Ok(status_ok(&resp))
    }

    pub async fn touch(&self, key: &[u8], expire_secs: u32) -> Result<()> {
        let frame = Frame::new(
            Opcode::Touch,
            vec![Bytes::copy_from_slice(key), Bytes::copy_from_slice(&expire_secs.to_be_bytes())],
        );
        self.track(self.dispatch(key, frame).await)?;
        Ok(())
    }

    pub async fn set(&self, key: &[u8], value: &[u8], expire_secs: u32) -> Result<()> {
        let frame = Frame::new(
            Opcode::Set,
            vec![
                Bytes::copy_from_slice(key),
                Bytes::copy_from_slice(value),
                Bytes::copy_from_slice(&expire_secs.to_be_bytes()),
            ],
        );
        self.track(self.dispatch(key, frame).await)?;
        Ok(())
    }

    /// Returns `true` iff the peer accepted the value (the key did not
    /// already exist).
    pub async fn add(&self, key: &[u8], value: &[u8], expire_secs: u32) -> Result<bool> {
        let frame = Frame::new(
            Opcode::Add,
            vec![
                Bytes::copy_from_slice(key),
                Bytes::copy_from_slice(value),
                Bytes::copy_from_slice(&expire_secs.to_be_bytes()),
            ],
        );
        let resp = self.track(self.dispatch(key, frame).await)?;
        Ok(status_ok(&resp))
    }

    pub async fn del(&self, key: &[u8]) -> Result<()> {
        let frame = Frame::new(Opcode::Del, vec![Bytes::copy_from_slice(key)]);
        self.track(self.dispatch(key, frame).await)?;
        Ok(())
    }

    pub async fn evict(&self, key: &[u8]) -> Result<()> {
        let frame = Frame::new(Opcode::Evict, vec![Bytes::copy_from_slice(key)]);
        self.track(self.dispatch(key, frame).await)?;
        Ok(())
    }

    pub async fn stats(&self, node_label: &str) -> Result<Vec<u8>> {
        let node = self.track(self.node_by_label(node_label))?;
        let pool = self.pool_for(&node);
        let frame = Frame::new(Opcode::Stats, vec![]);
        let resp = self.track(roundtrip(&pool, &frame).await)?;
        Ok(response_payload(resp).unwrap_or_default())
    }

    pub async fn check(&self, node_label: &str) -> Result<bool> {
        let node = self.track(self.node_by_label(node_label))?;
        let pool = self.pool_for(&node);
        let frame = Frame::new(Opcode::Check, vec![]);
        let resp = self.track(roundtrip(&pool, &frame).await)?;
        Ok(status_ok(&resp))
    }

    pub async fn index(&self, node_label: &str) -> Result<Vec<u8>> {
        let node = self.track(self.node_by_label(node_label))?;
        let pool = self.pool_for(&node);
        let frame = Frame::new(Opcode::Index, vec![]);
        let resp = self.track(roundtrip(&pool, &frame).await)?;
        Ok(response_payload(resp).unwrap_or_default())
    }

    /// Broadcasts `MIGRATE_BEGIN` (carrying the new topology) to every
    /// currently-known node, then swaps in the provisional ring so
    /// `migration-aware` callers can consult it.
    pub async fn migration_begin(&self, nodes: Vec<Node>) -> Result<()> {
        let current: Vec<Node> = self.ring.read().nodes().to_vec();
        let frame = Frame::new(Opcode::MigrationBegin, vec![encode_topology(&nodes)]);
        let mut last_err = None;
        for node in &current {
            let pool = self.pool_for(node);
            if let Err(e) = roundtrip(&pool, &frame).await {
                last_err = Some(e);
            }
        }
        *self.migration_ring.write() = Some(HashRing::new(nodes, DEFAULT_RING_REPLICAS));
        match last_err {
            Some(e) => self.track(Err(e)),
            None => self.track(Ok(())),
        }
    }

    pub async fn migration_abort(&self) -> Result<()> {
        let current: Vec<Node> = self.ring.read().nodes().to_vec();
        let frame = Frame::new(Opcode::MigrationAbort, vec![]);
        let mut last_err = None;
        for node in &current {
            let pool = self.pool_for(node);
            if let Err(e) = roundtrip(&pool, &frame).await {
                last_err = Some(e);
            }
        }
        *self.migration_ring.write() = None;
        match last_err {
            Some(e) => self.track(Err(e)),
            None => self.track(Ok(())),
        }
    }
}
