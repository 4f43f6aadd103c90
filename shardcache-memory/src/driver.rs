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

//! `PeerFetchDriver`: fetches a key from its owning peer.
//!
//! Synchronous and asynchronous fetch modes are unified behind one trait:
//! callers never need to know which concrete driver backs a cache
//! instance, only that `fetch` drives the entry's listener notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use shardcache_common::{Error, Key, Result, Value};
use shardcache_net::{ConnPool, Dial, Frame, IoMux, Opcode, PeerProtocol};

use crate::admission::AdmissionPolicy;
use crate::entry::CacheEntry;
use crate::replacement::ReplacementCache;
use crate::router::Owner;

/// Builds a fresh per-owner dialer. A `ConnPool` is bound to one dialer at
/// construction, so reaching more than one remote peer — the
/// migration-fallback retry against a different owner — requires a pool
/// per owner label rather than one pool shared by every `fetch` call.
type DialerFactory<P, D> = dyn Fn(&Owner) -> D + Send + Sync;

fn pool_for<P, D>(
    pools: &RwLock<HashMap<String, Arc<ConnPool<P, D>>>>,
    dialer_factory: &DialerFactory<P, D>,
    pool_capacity: usize,
    owner: &Owner,
) -> Arc<ConnPool<P, D>>
where
    P: PeerProtocol,
    D: Dial<P>,
{
    if let Some(pool) = pools.read().get(&owner.label) {
        return pool.clone();
    }
    let mut pools = pools.write();
    if let Some(pool) = pools.get(&owner.label) {
        return pool.clone();
    }
    let pool = ConnPool::new(dialer_factory(owner), pool_capacity);
    pools.insert(owner.label.clone(), pool.clone());
    pool
}

#[async_trait]
pub trait PeerFetchDriver<K, V>: Send + Sync + 'static
where
    V: Value,
{
    /// Fetches `entry.key` from `owner`, driving the entry's listener
    /// notifications directly (`notify_chunk`/`notify_complete`/
    /// `notify_error`) so single-flight followers see identical streams
    /// regardless of which mode served the leader.
    async fn fetch(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
        owner: &Owner,
        cache: &Arc<dyn ReplacementCache<K, V>>,
    ) -> Result<()>;
}

fn decode_key(key: &[u8]) -> Bytes {
    Bytes::copy_from_slice(key)
}

/// Synchronous mode: borrow a connection, send one `GET`, read the full
/// response into an accumulating buffer, deliver it as a single chunk
/// plus completion.
pub struct SyncPeerFetchDriver<P, D> {
    pools: RwLock<HashMap<String, Arc<ConnPool<P, D>>>>,
    dialer_factory: Arc<DialerFactory<P, D>>,
    pool_capacity: usize,
    admission: AdmissionPolicy,
    secret: Option<Vec<u8>>,
}

impl<P, D> SyncPeerFetchDriver<P, D> {
    /// `dialer_factory` builds a fresh `D` for a given owner; each owner
    /// label gets its own lazily-created pool of `pool_capacity` idle
    /// connections (see `pool_for` above).
    pub fn new(
        dialer_factory: impl Fn(&Owner) -> D + Send + Sync + 'static,
        pool_capacity: usize,
        admission: AdmissionPolicy,
        secret: Option<Vec<u8>>,
    ) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            dialer_factory: Arc::new(dialer_factory),
            pool_capacity,
            admission,
            secret,
        }
    }
}

#[async_trait]
impl<K, P, D> PeerFetchDriver<K, Vec<u8>> for SyncPeerFetchDriver<P, D>
where
    K: Key,
    P: PeerProtocol,
    D: Dial<P>,
{
    async fn fetch(
        &self,
        entry: &Arc<CacheEntry<K, Vec<u8>>>,
        owner: &Owner,
        cache: &Arc<dyn ReplacementCache<K, Vec<u8>>>,
    ) -> Result<()> {
        let key_bytes = entry.key.as_bytes().to_vec();
        let pool = pool_for(&self.pools, &*self.dialer_factory, self.pool_capacity, owner);
        let mut conn = pool
            .get()
            .await
            .map_err(|e| Error::NetworkUnavailable(to_io_error(e)))?;

        let request = build_request(&self.secret, Opcode::Get, vec![decode_key(&key_bytes)]);
        let result: Result<Vec<u8>> = async {
            conn.send_frame(&request).await?;
            let response = conn.recv_frame().await?;
            Ok(response.records.into_iter().flatten().collect())
        }
        .await;

        match result {
            Ok(data) => {
                pool.put(conn);
                deliver_and_admit(entry, cache, data, &self.admission);
                Ok(())
            }
            Err(e) => {
                // A failed connection is never returned to the pool.
                entry.notify_error(e.to_string());
                Err(e)
            }
        }
    }
}

/// Asynchronous mode: register the connection with the `IoMux`, stream
/// chunks as they arrive, deregister **before** returning the connection
/// to the pool.
pub struct AsyncPeerFetchDriver<P, D, M>
where
    M: IoMux<P>,
{
    pools: RwLock<HashMap<String, Arc<ConnPool<P, D>>>>,
    dialer_factory: Arc<DialerFactory<P, D>>,
    pool_capacity: usize,
    mux: Arc<M>,
    admission: AdmissionPolicy,
    secret: Option<Vec<u8>>,
}

impl<P, D, M> AsyncPeerFetchDriver<P, D, M>
where
    M: IoMux<P>,
{
    pub fn new(
        dialer_factory: impl Fn(&Owner) -> D + Send + Sync + 'static,
        pool_capacity: usize,
        mux: Arc<M>,
        admission: AdmissionPolicy,
        secret: Option<Vec<u8>>,
    ) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            dialer_factory: Arc::new(dialer_factory),
            pool_capacity,
            mux,
            admission,
            secret,
        }
    }
}

#[async_trait]
impl<K, P, D, M> PeerFetchDriver<K, Vec<u8>> for AsyncPeerFetchDriver<P, D, M>
where
    K: Key,
    P: PeerProtocol,
    D: Dial<P>,
    M: IoMux<P>,
{
    async fn fetch(
        &self,
        entry: &Arc<CacheEntry<K, Vec<u8>>>,
        owner: &Owner,
        cache: &Arc<dyn ReplacementCache<K, Vec<u8>>>,
    ) -> Result<()> {
        let key_bytes = entry.key.as_bytes().to_vec();
        let pool = pool_for(&self.pools, &*self.dialer_factory, self.pool_capacity, owner);
        let conn = pool
            .get()
            .await
            .map_err(|e| Error::NetworkUnavailable(to_io_error(e)))?;

        // Registration makes "in mux" a type-level state (see
        // shardcache_net::mux); the token is consumed exactly once, by
        // deregister, before the connection can reach `pool.put`.
        let (token, mut conn) = self.mux.register(conn).await?;
        let failed = AtomicBool::new(false);

        let request = build_request(&self.secret, Opcode::Get, vec![decode_key(&key_bytes)]);
        // The request must be on the wire before the mux is polled for a
        // reply: polling first blocks on readability that a send hasn't
        // yet provoked.
        let send_result: Result<()> = async {
            conn.send_frame(&request).await?;
            self.mux.poll(&token, &mut conn).await?;
            Ok(())
        }
        .await;

        let mut data = Vec::new();
        if send_result.is_ok() {
            loop {
                match conn.recv_frame().await {
                    Ok(frame) if frame.opcode == Opcode::Response => {
                        let chunk: Vec<u8> = frame.records.into_iter().flatten().collect();
                        if chunk.is_empty() {
                            break;
                        }
                        data.extend_from_slice(&chunk);
                        entry.notify_chunk(chunk);
                    }
                    Ok(_) => break,
                    Err(_) => {
                        failed.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        } else {
            failed.store(true, Ordering::Relaxed);
        }

        // fd handoff: deregister from the mux before the connection can
        // be returned to the pool. `deregister` must tolerate being
        // called on an already-removed registration; this concrete mux's
        // `deregister` is a no-op that always succeeds.
        let conn = self.mux.deregister(token, conn).await?;

        if failed.load(Ordering::Relaxed) || send_result.is_err() {
            entry.notify_error("peer fetch failed");
            return Err(Error::PeerRefused(format!("fetch from {} failed", owner.label)));
        }

        pool.put(conn);
        entry.notify_complete();
        if !data.is_empty() {
            cache.update_size(&entry.key, entry.total_len());
            let admit = self.admission.should_keep(&mut rand::thread_rng());
            if !admit {
                cache.remove(&entry.key);
            }
        }
        Ok(())
    }
}

fn deliver_and_admit<K>(
    entry: &Arc<CacheEntry<K, Vec<u8>>>,
    cache: &Arc<dyn ReplacementCache<K, Vec<u8>>>,
    data: Vec<u8>,
    admission: &AdmissionPolicy,
) where
    K: Key,
{
    let found = !data.is_empty();
    if found {
        entry.notify_chunk(data);
    }
    entry.notify_complete();
    // Only a found value has a size worth charging or admitting on;
    // `update_size` is not invoked on a NotFound miss.
    if found {
        cache.update_size(&entry.key, entry.total_len());
        let admit = admission.should_keep(&mut rand::thread_rng());
        if !admit {
            cache.remove(&entry.key);
        }
    }
}

fn build_request(secret: &Option<Vec<u8>>, opcode: Opcode, records: Vec<Bytes>) -> Frame {
    let frame = Frame::new(opcode, records);
    match secret {
        Some(s) => frame.sign(s),
        None => frame,
    }
}

fn to_io_error(e: Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::SocketAddr;

    use parking_lot::Mutex as PMutex;
    use shardcache_net::MuxToken;

    use super::*;
    use crate::replacement::LruReplacementCache;

    fn addr() -> SocketAddr {
        "127.0.0.1:11211".parse().unwrap()
    }

    fn owner() -> Owner {
        Owner {
            label: "peer-a".into(),
            address: addr(),
        }
    }

    /// A stub connection preloaded with a queue of responses, recording
    /// every frame it was asked to send.
    struct FakeConn {
        sent: Arc<PMutex<Vec<Frame>>>,
        responses: VecDeque<Result<Frame>>,
    }

    #[async_trait]
    impl PeerProtocol for FakeConn {
        async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
            self.sent.lock().push(frame.clone());
            Ok(())
        }

        async fn recv_frame(&mut self) -> Result<Frame> {
            self.responses
                .pop_front()
                .unwrap_or_else(|| Err(Error::Protocol("no more responses queued".into())))
        }
    }

    struct FakeDialer {
        sent: Arc<PMutex<Vec<Frame>>>,
        responses: Arc<PMutex<VecDeque<Result<Frame>>>>,
        fail_dial: bool,
    }

    #[async_trait]
    impl Dial<FakeConn> for FakeDialer {
        async fn dial(&self) -> Result<FakeConn> {
            if self.fail_dial {
                return Err(Error::NetworkUnavailable(std::io::Error::other("refused")));
            }
            Ok(FakeConn {
                sent: self.sent.clone(),
                responses: std::mem::take(&mut *self.responses.lock()),
            })
        }
    }

    struct NoopMux;

    #[async_trait]
    impl IoMux<FakeConn> for NoopMux {
        async fn register(&self, conn: FakeConn) -> Result<(MuxToken, FakeConn)> {
            Ok((MuxToken::new(0), conn))
        }

        async fn poll(&self, _token: &MuxToken, _conn: &mut FakeConn) -> Result<usize> {
            Ok(0)
        }

        async fn deregister(&self, _token: MuxToken, conn: FakeConn) -> Result<FakeConn> {
            Ok(conn)
        }
    }

    fn single_response(records: Vec<Bytes>) -> Result<Frame> {
        Ok(Frame::new(Opcode::Response, records))
    }

    fn cache() -> Arc<LruReplacementCache<Vec<u8>, Vec<u8>>> {
        LruReplacementCache::new(16, 1)
    }

    #[tokio::test]
    async fn test_sync_driver_delivers_single_chunk_and_completes() {
        let sent = Arc::new(PMutex::new(Vec::new()));
        let responses = Arc::new(PMutex::new(VecDeque::from([single_response(vec![Bytes::from_static(
            b"hello",
        )])])));
        let sent_for_dial = sent.clone();
        let driver = SyncPeerFetchDriver::new(
            move |_owner: &Owner| FakeDialer {
                sent: sent_for_dial.clone(),
                responses: responses.clone(),
                fail_dial: false,
            },
            4,
            AdmissionPolicy::new(true),
            None,
        );

        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;

        driver.fetch(&entry, &owner(), &reply_cache).await.unwrap();

        assert_eq!(entry.snapshot(), vec![b"hello".to_vec()]);
        assert_eq!(sent.lock().len(), 1);
        assert_eq!(sent.lock()[0].opcode, Opcode::Get);
    }

    #[tokio::test]
    async fn test_sync_driver_notifies_error_and_propagates_on_dial_failure() {
        let sent = Arc::new(PMutex::new(Vec::new()));
        let driver = SyncPeerFetchDriver::new(
            move |_owner: &Owner| FakeDialer {
                sent: sent.clone(),
                responses: Arc::new(PMutex::new(VecDeque::new())),
                fail_dial: true,
            },
            4,
            AdmissionPolicy::new(true),
            None,
        );

        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), true);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;

        let got_error = Arc::new(PMutex::new(false));
        let got_error2 = got_error.clone();
        entry
            .register_listener(Box::new(move |event| {
                if matches!(event, crate::entry::ListenerEvent::Error(_)) {
                    *got_error2.lock() = true;
                }
                crate::entry::ListenerAction::Keep
            }))
            .unwrap();

        let result = driver.fetch(&entry, &owner(), &reply_cache).await;
        assert!(result.is_err());
        assert!(*got_error.lock());
    }

    #[tokio::test]
    async fn test_sync_driver_force_caching_keeps_entry() {
        let sent = Arc::new(PMutex::new(Vec::new()));
        let responses = Arc::new(PMutex::new(VecDeque::from([single_response(vec![Bytes::from_static(
            b"cold-value",
        )])])));
        // force_caching = false with a rigged admission check is exercised
        // at the AdmissionPolicy level (admission.rs); here we only assert
        // that force_caching=true always keeps, end to end.
        let driver = SyncPeerFetchDriver::new(
            move |_owner: &Owner| FakeDialer {
                sent: sent.clone(),
                responses: responses.clone(),
                fail_dial: false,
            },
            4,
            AdmissionPolicy::new(true),
            None,
        );

        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), false);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;

        driver.fetch(&entry, &owner(), &reply_cache).await.unwrap();
        assert!(reply_cache.get(&b"k".to_vec()).is_some());
    }

    #[tokio::test]
    async fn test_async_driver_streams_chunks_then_completes() {
        let sent = Arc::new(PMutex::new(Vec::new()));
        let responses = Arc::new(PMutex::new(VecDeque::from([
            single_response(vec![Bytes::from_static(b"ab")]),
            single_response(vec![Bytes::from_static(b"cd")]),
            single_response(vec![]),
        ])));
        let sent_for_dial = sent.clone();
        let mux = Arc::new(NoopMux);
        let driver = AsyncPeerFetchDriver::new(
            move |_owner: &Owner| FakeDialer {
                sent: sent_for_dial.clone(),
                responses: responses.clone(),
                fail_dial: false,
            },
            4,
            mux,
            AdmissionPolicy::new(true),
            None,
        );

        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), true);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;

        let chunks = Arc::new(PMutex::new(Vec::new()));
        let chunks2 = chunks.clone();
        entry
            .register_listener(Box::new(move |event| {
                if let crate::entry::ListenerEvent::Chunk(c) = event {
                    chunks2.lock().push(c);
                }
                crate::entry::ListenerAction::Keep
            }))
            .unwrap();

        driver.fetch(&entry, &owner(), &reply_cache).await.unwrap();

        assert_eq!(*chunks.lock(), vec![b"ab".to_vec(), b"cd".to_vec()]);
        assert_eq!(entry.total_len(), 4);
        assert_eq!(sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_async_driver_reports_error_on_recv_failure() {
        let sent = Arc::new(PMutex::new(Vec::new()));
        let responses = Arc::new(PMutex::new(VecDeque::from([Err(Error::NetworkUnavailable(
            std::io::Error::other("reset"),
        ))])));
        let mux = Arc::new(NoopMux);
        let driver = AsyncPeerFetchDriver::new(
            move |_owner: &Owner| FakeDialer {
                sent: sent.clone(),
                responses: responses.clone(),
                fail_dial: false,
            },
            4,
            mux,
            AdmissionPolicy::new(true),
            None,
        );

        let cache = cache();
        let entry = cache.clone().get_or_create(b"k".to_vec(), true);
        let reply_cache: Arc<dyn ReplacementCache<Vec<u8>, Vec<u8>>> = cache;

        let result = driver.fetch(&entry, &owner(), &reply_cache).await;
        assert!(result.is_err());
    }
}
