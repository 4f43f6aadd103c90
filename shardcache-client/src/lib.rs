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

//! The caller-facing client: consistent-hash node routing, a connection
//! pool per peer, the single-key operation surface, and multi-key
//! batching.

pub mod client;
pub mod multi;
pub mod ring;

pub use client::{Client, ErrorCode, DEFAULT_RING_REPLICAS};
pub use multi::{get_multi, set_multi};
pub use ring::{HashRing, Node};
