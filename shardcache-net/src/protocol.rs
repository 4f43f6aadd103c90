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

//! Wire framing:
//!
//! ```text
//! frame := MAGIC(4) sig_header? opcode(1) record* TERMINATOR(1)
//! record := LENGTH(4, BE u32) BYTES(length)
//! sig_header := SIG_TAG(1) HMAC-BLAKE3(16)
//! ```
//!
//! The signature MAC is keyed BLAKE3 rather than SipHash or raw SHA; a
//! single `blake3::Hasher::new_keyed` call covers both speed and the
//! keyed-MAC property this needs.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use shardcache_common::{Error, Result};

pub const MAGIC: [u8; 4] = *b"SHC1";
const TERMINATOR: u8 = 0x00;

const SIG_TAG_NONE: u8 = 0x00;
const SIG_TAG_ONE_SHOT: u8 = 0x01;
const SIG_TAG_STREAMING: u8 = 0x02;
const MAC_LEN: usize = 16;

/// Opcodes exercised by the core wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x01,
    Set = 0x02,
    Add = 0x03,
    Del = 0x04,
    Evict = 0x05,
    Touch = 0x06,
    Exists = 0x07,
    Offset = 0x08,
    Stats = 0x09,
    Check = 0x0a,
    Index = 0x0b,
    MigrationBegin = 0x0c,
    MigrationAbort = 0x0d,
    /// Peer reply carrying a status byte + optional records.
    Response = 0x7f,
}

impl Opcode {
    fn from_byte(b: u8) -> Result<Self> {
        use Opcode::*;
        Ok(match b {
            0x01 => Get,
            0x02 => Set,
            0x03 => Add,
            0x04 => Del,
            0x05 => Evict,
            0x06 => Touch,
            0x07 => Exists,
            0x08 => Offset,
            0x09 => Stats,
            0x0a => Check,
            0x0b => Index,
            0x0c => MigrationBegin,
            0x0d => MigrationAbort,
            0x7f => Response,
            other => return Err(Error::Protocol(format!("unknown opcode {other:#x}"))),
        })
    }
}

/// A decoded or to-be-encoded wire frame: an opcode plus its argument
/// records (key, value, expiration-as-big-endian-u32, ...).
#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: Opcode,
    pub records: Vec<Bytes>,
    /// `Some` iff an auth secret is configured for this connection.
    pub signature: Option<[u8; MAC_LEN]>,
    pub streaming: bool,
}

impl Frame {
    pub fn new(opcode: Opcode, records: Vec<Bytes>) -> Self {
        Self {
            opcode,
            records,
            signature: None,
            streaming: false,
        }
    }

    fn mac(secret: &[u8], opcode: Opcode, records: &[Bytes]) -> [u8; MAC_LEN] {
        let mut hasher = blake3::Hasher::new_keyed(&expand_key(secret));
        hasher.update(&[opcode as u8]);
        for r in records {
            hasher.update(&(r.len() as u32).to_be_bytes());
            hasher.update(r);
        }
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&hasher.finalize().as_bytes()[..MAC_LEN]);
        mac
    }

    /// Signs the frame with `secret`, choosing the streaming vs one-shot
    /// signature tag.
    pub fn sign(mut self, secret: &[u8]) -> Self {
        self.signature = Some(Self::mac(secret, self.opcode, &self.records));
        self
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        match self.signature {
            Some(mac) => {
                buf.put_u8(if self.streaming {
                    SIG_TAG_STREAMING
                } else {
                    SIG_TAG_ONE_SHOT
                });
                buf.put_slice(&mac);
            }
            None => buf.put_u8(SIG_TAG_NONE),
        }
        buf.put_u8(self.opcode as u8);
        buf.put_u8(self.records.len() as u8);
        for record in &self.records {
            buf.put_u32(record.len() as u32);
            buf.put_slice(record);
        }
        buf.put_u8(TERMINATOR);
        buf
    }

    /// Decodes a single frame from `buf`, verifying the signature against
    /// `secret` when present. Returns `Ok(None)` if `buf` does not yet
    /// contain a complete frame (the caller should read more and retry).
    pub fn decode(buf: &mut BytesMut, secret: Option<&[u8]>) -> Result<Option<Self>> {
        let mut cursor = buf.clone();
        if cursor.len() < MAGIC.len() + 1 {
            return Ok(None);
        }
        if cursor[..MAGIC.len()] != MAGIC {
            return Err(Error::Protocol("bad magic".into()));
        }
        cursor.advance(MAGIC.len());

        let sig_tag = cursor[0];
        cursor.advance(1);
        let streaming = match sig_tag {
            SIG_TAG_NONE => false,
            SIG_TAG_ONE_SHOT => false,
            SIG_TAG_STREAMING => true,
            other => return Err(Error::Protocol(format!("unknown sig tag {other:#x}"))),
        };
        let signature = if sig_tag != SIG_TAG_NONE {
            if cursor.len() < MAC_LEN {
                return Ok(None);
            }
            let mut mac = [0u8; MAC_LEN];
            mac.copy_from_slice(&cursor[..MAC_LEN]);
            cursor.advance(MAC_LEN);
            Some(mac)
        } else {
            None
        };

        if cursor.is_empty() {
            return Ok(None);
        }
        let opcode = Opcode::from_byte(cursor[0])?;
        cursor.advance(1);

        if cursor.is_empty() {
            return Ok(None);
        }
        let record_count = cursor[0] as usize;
        cursor.advance(1);

        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            if cursor.len() < 4 {
                return Ok(None);
            }
            let len = u32::from_be_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]) as usize;
            if cursor.len() < 4 + len {
                return Ok(None);
            }
            cursor.advance(4);
            records.push(Bytes::copy_from_slice(&cursor[..len]));
            cursor.advance(len);
        }

        if cursor.is_empty() {
            return Ok(None);
        }
        if cursor[0] != TERMINATOR {
            return Err(Error::Protocol("missing terminator".into()));
        }
        cursor.advance(1);

        let consumed = buf.len() - cursor.len();
        buf.advance(consumed);

        if let (Some(secret), Some(mac)) = (secret, signature) {
            let expected = Self::mac(secret, opcode, &records);
            if expected != mac {
                return Err(Error::Protocol("signature mismatch".into()));
            }
        }

        Ok(Some(Frame {
            opcode,
            records,
            signature,
            streaming,
        }))
    }
}

/// The peer wire protocol: encodes a request `Frame`, writes it to `W`,
/// reads and decodes the response `Frame` from `R`.
///
/// A trait rather than a concrete type so `shardcache-memory`'s
/// `PeerFetchDriver` and `shardcache-client`'s `Client` can share one
/// implementation.
#[async_trait]
pub trait PeerProtocol: Send + Sync + 'static {
    async fn send_frame(&mut self, frame: &Frame) -> Result<()>;
    async fn recv_frame(&mut self) -> Result<Frame>;
}

fn expand_key(secret: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    let hash = blake3::hash(secret);
    key.copy_from_slice(hash.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let frame = Frame::new(
            Opcode::Set,
            vec![Bytes::from_static(b"key"), Bytes::from_static(b"value")],
        );
        let mut encoded = frame.encode();
        let decoded = Frame::decode(&mut encoded, None).unwrap().unwrap();
        assert_eq!(decoded.opcode, Opcode::Set);
        assert_eq!(decoded.records, frame.records);
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_partial_frame_returns_none() {
        let frame = Frame::new(Opcode::Get, vec![Bytes::from_static(b"key")]);
        let mut encoded = frame.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(Frame::decode(&mut encoded, None).unwrap().is_none());
    }

    #[test]
    fn test_signed_frame_verifies() {
        let secret = b"sekrit";
        let frame = Frame::new(Opcode::Get, vec![Bytes::from_static(b"key")]).sign(secret);
        let mut encoded = frame.encode();
        let decoded = Frame::decode(&mut encoded, Some(secret)).unwrap().unwrap();
        assert_eq!(decoded.opcode, Opcode::Get);
    }

    #[test]
    fn test_signed_frame_rejects_tampered_secret() {
        let frame = Frame::new(Opcode::Get, vec![Bytes::from_static(b"key")]).sign(b"sekrit");
        let mut encoded = frame.encode();
        assert!(Frame::decode(&mut encoded, Some(b"wrong")).is_err());
    }
}
