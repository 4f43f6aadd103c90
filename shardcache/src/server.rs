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

//! [`PeerServer`]: the listener side of the peer wire protocol every
//! shardcache node runs, dispatching inbound `Frame`s against the local
//! [`Cache`] and the [`RingRouter`]'s migration state.
//!
//! Covers the full command surface (`GET`/`SET`/`ADD`/`DEL`/`EVICT`/
//! `TOUCH`/`EXISTS`/`OFFSET`/`STATS`/`CHECK`/`INDEX`/`MIGRATE_BEGIN`/
//! `MIGRATE_ABORT`); the reply shapes mirror what `shardcache-client`'s
//! `status_ok`/`response_payload` helpers expect back.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use shardcache_client::Node;
use shardcache_common::{Error, Outcome, Result};
use shardcache_memory::PeerFetchDriver;
use shardcache_net::{Frame, Opcode, PeerProtocol, TcpPeerProtocol};
use tokio::net::{TcpListener, TcpStream};

use crate::cache::Cache;
use crate::router::RingRouter;

fn record<'a>(frame: &'a Frame, index: usize) -> Result<&'a [u8]> {
    frame
        .records
        .get(index)
        .map(|b| b.as_ref())
        .ok_or_else(|| Error::Protocol(format!("missing record {index} for {:?}", frame.opcode)))
}

fn be_u32(frame: &Frame, index: usize) -> Result<u32> {
    let bytes = record(frame, index)?;
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::Protocol(format!("record {index} is not a u32")))?;
    Ok(u32::from_be_bytes(array))
}

fn status_frame(ok: bool) -> Frame {
    Frame::new(Opcode::Response, vec![Bytes::from(vec![ok as u8])])
}

fn parse_node(entry: &str) -> Result<Node> {
    let (label, addr) = entry
        .split_once('@')
        .ok_or_else(|| Error::Protocol(format!("malformed topology entry {entry:?}")))?;
    let address: SocketAddr = addr
        .parse()
        .map_err(|_| Error::Protocol(format!("bad address in topology entry {entry:?}")))?;
    Ok(Node {
        label: label.to_string(),
        address,
    })
}

fn decode_topology(bytes: &[u8]) -> Result<Vec<Node>> {
    let text = std::str::from_utf8(bytes).map_err(|_| Error::Protocol("topology is not utf8".into()))?;
    text.split(';').filter(|s| !s.is_empty()).map(parse_node).collect()
}

/// A single node's peer-facing TCP listener, generic over the same
/// [`PeerFetchDriver`] concretization as the [`Cache`] it serves.
pub struct PeerServer<D>
where
    D: PeerFetchDriver<Vec<u8>, Vec<u8>>,
{
    cache: Arc<Cache<D>>,
    router: Arc<RingRouter>,
    secret: Option<Vec<u8>>,
}

impl<D> PeerServer<D>
where
    D: PeerFetchDriver<Vec<u8>, Vec<u8>>,
{
    pub fn new(cache: Arc<Cache<D>>, router: Arc<RingRouter>, secret: Option<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self { cache, router, secret })
    }

    /// Binds `addr` and serves connections until the listener errors or
    /// the process shuts down; each connection is handled on its own
    /// spawned task, matching the one-task-per-peer-connection shape
    /// `shardcache-net`'s `ConnPool` assumes on the client side.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "shardcache peer server listening");
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream).await {
                    tracing::debug!(%peer_addr, error = %e, "peer connection closed");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut proto = TcpPeerProtocol::new(stream, self.secret.clone());
        loop {
            let frame = match proto.recv_frame().await {
                Ok(frame) => frame,
                Err(_) => return Ok(()),
            };
            let response = self.handle_frame(frame).await;
            proto.send_frame(&response).await?;
        }
    }

    #[fastrace::trace(name = "shardcache::server::handle_frame")]
    async fn handle_frame(&self, frame: Frame) -> Frame {
        match self.dispatch(frame).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "request failed");
                status_frame(false)
            }
        }
    }

    async fn dispatch(&self, frame: Frame) -> Result<Frame> {
        match frame.opcode {
            Opcode::Get => {
                let key = record(&frame, 0)?.to_vec();
                match self.cache.get(key).await? {
                    Outcome::Found(data) => Ok(Frame::new(Opcode::Response, vec![Bytes::from(data)])),
                    Outcome::NotFound => Ok(Frame::new(Opcode::Response, vec![])),
                }
            }
            Opcode::Set => {
                let key = record(&frame, 0)?.to_vec();
                let value = record(&frame, 1)?.to_vec();
                let expire = be_u32(&frame, 2)?;
                self.cache.set(key, value, expire).await?;
                Ok(status_frame(true))
            }
            Opcode::Add => {
                let key = record(&frame, 0)?.to_vec();
                let value = record(&frame, 1)?.to_vec();
                let expire = be_u32(&frame, 2)?;
                let added = self.cache.add(key, value, expire).await?;
                Ok(status_frame(added))
            }
            Opcode::Del => {
                let key = record(&frame, 0)?;
                self.cache.del(key).await?;
                Ok(status_frame(true))
            }
            Opcode::Evict => {
                let key = record(&frame, 0)?;
                self.cache.evict(key).await?;
                Ok(status_frame(true))
            }
            Opcode::Touch => {
                let key = record(&frame, 0)?;
                let expire = be_u32(&frame, 1)?;
                self.cache.touch(key, expire).await?;
                Ok(status_frame(true))
            }
            Opcode::Exists => {
                let key = record(&frame, 0)?;
                let exists = self.cache.exists(key).await?;
                Ok(status_frame(exists))
            }
            Opcode::Offset => {
                let key = record(&frame, 0)?;
                let offset = be_u32(&frame, 1)?;
                let len = be_u32(&frame, 2)?;
                let data = self.cache.offset(key, offset, len).await?;
                Ok(Frame::new(Opcode::Response, vec![Bytes::from(data)]))
            }
            Opcode::Stats => Ok(Frame::new(Opcode::Response, vec![Bytes::from(self.stats_payload())])),
            Opcode::Check => Ok(status_frame(true)),
            Opcode::Index => Ok(Frame::new(Opcode::Response, vec![Bytes::from(self.index_payload())])),
            Opcode::MigrationBegin => {
                let topology = record(&frame, 0)?;
                self.router.set_migration_ring(Some(decode_topology(topology)?));
                Ok(status_frame(true))
            }
            Opcode::MigrationAbort => {
                self.router.set_migration_ring(None);
                Ok(status_frame(true))
            }
            Opcode::Response => Err(Error::Protocol("clients do not send Response frames".into())),
        }
    }

    /// `key:value,...` counter dump: `STATS` has no fixed wire shape, so
    /// this uses a plain comma-joined form a CLI can parse trivially.
    fn stats_payload(&self) -> Vec<u8> {
        let counters = self.cache.counters();
        format!(
            "cache_hits:{},cache_misses:{},fetch_local:{},fetch_remote:{},not_found:{},admission_drops:{},evicts:{},errors:{}",
            counters.cache_hits.load(std::sync::atomic::Ordering::Relaxed),
            counters.cache_misses.load(std::sync::atomic::Ordering::Relaxed),
            counters.fetch_local.load(std::sync::atomic::Ordering::Relaxed),
            counters.fetch_remote.load(std::sync::atomic::Ordering::Relaxed),
            counters.not_found.load(std::sync::atomic::Ordering::Relaxed),
            counters.admission_drops.load(std::sync::atomic::Ordering::Relaxed),
            counters.evicts.load(std::sync::atomic::Ordering::Relaxed),
            counters.errors.load(std::sync::atomic::Ordering::Relaxed),
        )
        .into_bytes()
    }

    /// This node carries no enumerable on-disk index format; `INDEX`
    /// reports only the volatile map's live key count.
    fn index_payload(&self) -> Vec<u8> {
        self.cache.volatile_len().to_string().into_bytes()
    }
}
