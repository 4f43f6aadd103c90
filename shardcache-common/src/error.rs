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

//! The error taxonomy shared by every component.
//!
//! One variant per failure class, `#[from]` conversions wired up at the
//! actual I/O boundaries so callers mostly see `?` propagate without
//! manual wrapping.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connect or read failure while talking to a peer.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(#[source] io::Error),

    /// The peer replied with a non-OK status.
    #[error("peer refused the request: {0}")]
    PeerRefused(String),

    /// The pluggable `Storage`/`VolatileStore` backend failed.
    #[error("storage failed: {0}")]
    StorageFailed(String),

    /// An unknown node was named in a client call, or an owner for a key
    /// could not be resolved on either ring.
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),

    /// A fetch or batch item was cancelled: a timeout fired, a migration
    /// reshuffle invalidated the request, or `destroy` ran with listeners
    /// still registered.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A wire frame failed to parse or its signature did not verify.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::NetworkUnavailable(e)
    }
}

/// `NotFound` is deliberately *not* a variant of [`Error`]: an empty
/// result is not an error, only a distinguishable outcome kept for
/// counters. Operations that can miss return `Result<Outcome<T>>` instead
/// of folding the miss into the error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Found(T),
    NotFound,
}

impl<T> Outcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Found(v) => Some(v),
            Outcome::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(_))
    }
}
