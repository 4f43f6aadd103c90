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

//! The Tokio/TCP concretization of `PeerProtocol`/`ConnPool`/`IoMux`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use shardcache_common::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::mux::{IoMux, MuxToken};
use crate::pool::Dial;
use crate::protocol::{Frame, PeerProtocol};

/// Dials a single peer address with the configured `tcp_timeout`.
pub struct TcpDialer {
    pub addr: SocketAddr,
    pub timeout: Duration,
}

#[async_trait]
impl Dial<TcpStream> for TcpDialer {
    async fn dial(&self) -> Result<TcpStream> {
        tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| Error::NetworkUnavailable(std::io::Error::from(std::io::ErrorKind::TimedOut)))?
            .map_err(Error::from)
    }
}

/// A `PeerProtocol` over a plain `TcpStream`, optionally signing every
/// outbound frame with `secret`.
pub struct TcpPeerProtocol {
    stream: TcpStream,
    secret: Option<Vec<u8>>,
    read_buf: BytesMut,
}

impl TcpPeerProtocol {
    pub fn new(stream: TcpStream, secret: Option<Vec<u8>>) -> Self {
        Self {
            stream,
            secret,
            read_buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

#[async_trait]
impl PeerProtocol for TcpPeerProtocol {
    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let framed = match &self.secret {
            Some(secret) => frame.clone().sign(secret).encode(),
            None => frame.encode(),
        };
        self.stream.write_all(&framed).await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.read_buf, self.secret.as_deref())? {
                return Ok(frame);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::NetworkUnavailable(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// A minimal `IoMux` over Tokio's own readiness polling: registration just
/// hands out a monotonic token id, and `poll` drives one
/// `TcpStream::readable().await` wait. There is no shared reactor state to
/// manage beyond the token counter, since Tokio's runtime already
/// multiplexes socket readiness.
#[derive(Default)]
pub struct TcpIoMux {
    next_id: AtomicU64,
}

impl TcpIoMux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl IoMux<TcpStream> for TcpIoMux {
    async fn register(&self, conn: TcpStream) -> Result<(MuxToken, TcpStream)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok((MuxToken::new(id), conn))
    }

    async fn poll(&self, _token: &MuxToken, conn: &mut TcpStream) -> Result<usize> {
        conn.readable().await?;
        let mut buf = [0u8; 4096];
        match conn.try_read(&mut buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn deregister(&self, _token: MuxToken, conn: TcpStream) -> Result<TcpStream> {
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::Opcode;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, (server, _)) = tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap() });
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn test_send_then_recv_frame_roundtrips_over_tcp() {
        let (client, server) = loopback_pair().await;
        let mut writer = TcpPeerProtocol::new(client, None);
        let mut reader = TcpPeerProtocol::new(server, None);

        let frame = Frame::new(Opcode::Get, vec![Bytes::from_static(b"k")]);
        writer.send_frame(&frame).await.unwrap();
        let received = reader.recv_frame().await.unwrap();
        assert_eq!(received.records, frame.records);
    }

    #[tokio::test]
    async fn test_signed_frame_roundtrips_when_secrets_match() {
        let (client, server) = loopback_pair().await;
        let secret = b"topsecret".to_vec();
        let mut writer = TcpPeerProtocol::new(client, Some(secret.clone()));
        let mut reader = TcpPeerProtocol::new(server, Some(secret));

        let frame = Frame::new(Opcode::Set, vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")]);
        writer.send_frame(&frame).await.unwrap();
        let received = reader.recv_frame().await.unwrap();
        assert_eq!(received.records, frame.records);
    }

    #[tokio::test]
    async fn test_signed_frame_rejected_on_secret_mismatch() {
        let (client, server) = loopback_pair().await;
        let mut writer = TcpPeerProtocol::new(client, Some(b"one".to_vec()));
        let mut reader = TcpPeerProtocol::new(server, Some(b"two".to_vec()));

        let frame = Frame::new(Opcode::Get, vec![Bytes::from_static(b"k")]);
        writer.send_frame(&frame).await.unwrap();
        assert!(reader.recv_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_recv_frame_errors_when_peer_closes_mid_read() {
        let (client, server) = loopback_pair().await;
        drop(client);
        let mut reader = TcpPeerProtocol::new(server, None);
        assert!(reader.recv_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_io_mux_register_then_deregister_hands_back_a_usable_stream() {
        let (client, mut server) = loopback_pair().await;
        let mux = TcpIoMux::new();
        let (token, conn) = mux.register(client).await.unwrap();
        let mut returned = mux.deregister(token, conn).await.unwrap();

        returned.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_io_mux_distinct_registrations_get_distinct_tokens() {
        let (client, server) = loopback_pair().await;
        let mux = TcpIoMux::new();
        let (token_a, _conn_a) = mux.register(client).await.unwrap();
        let (token_b, _conn_b) = mux.register(server).await.unwrap();
        assert_ne!(token_a.id(), token_b.id());
    }

    #[tokio::test]
    async fn test_dialer_connects_to_listening_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialer = TcpDialer {
            addr,
            timeout: Duration::from_millis(500),
        };
        let (dialed, accepted) = tokio::join!(dialer.dial(), async { listener.accept().await.unwrap() });
        assert!(dialed.is_ok());
        drop(accepted);
    }

    #[tokio::test]
    async fn test_dialer_times_out_on_unreachable_address() {
        // 10.255.255.1 is a non-routable address chosen to hang rather than
        // refuse immediately, exercising the timeout path rather than a
        // connection-refused error.
        let dialer = TcpDialer {
            addr: "10.255.255.1:9".parse().unwrap(),
            timeout: Duration::from_millis(50),
        };
        let result = dialer.dial().await;
        assert!(result.is_err());
    }
}
