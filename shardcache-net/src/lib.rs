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

//! The peer wire protocol (`PeerProtocol`), connection pooling
//! (`ConnPool`), and async I/O multiplexing (`IoMux`) contracts, plus a
//! Tokio/TCP concretization of all three.

pub mod mux;
pub mod pool;
pub mod protocol;
pub mod tcp;

pub use mux::{IoMux, MuxToken};
pub use pool::{ConnPool, Dial};
pub use protocol::{Frame, Opcode, PeerProtocol};
pub use tcp::{TcpDialer, TcpIoMux, TcpPeerProtocol};
