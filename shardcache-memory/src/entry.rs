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

//! `CacheEntry`: the per-key materialization record.
//!
//! Held exclusively behind `Arc<CacheEntry>`: whoever needs the entry to
//! outlive a critical section just clones the `Arc`. The async driver keeps
//! only a `Weak`, upgrading it at the top of each callback; a failed
//! upgrade is reported as [`EntryError::ResourceGone`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use parking_lot::Mutex;
use shardcache_common::Value;

use crate::replacement::ReplacementCache;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// Entry participates in the async fetch path (has a listener list).
        const ASYNC   = 0b0000_0001;
        /// A fetch is currently in flight.
        const FETCHING = 0b0000_0010;
        /// `data` holds a fully materialized value (possibly empty = not found).
        const COMPLETE = 0b0000_0100;
        /// Evict once `listeners` drains.
        const EVICT    = 0b0000_1000;
        /// Fully evicted: `data`/`listeners` are empty, entry is inert.
        const EVICTED  = 0b0001_0000;
        /// Admission policy decided to discard this value after delivery.
        const DROP     = 0b0010_0000;
    }
}

/// Outcome of a single listener notification, modeling the C "return 0 to
/// drop" convention without its ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    Keep,
    Remove,
}

/// Events delivered to a registered listener: zero or more `Chunk`s, then
/// exactly one of `Complete`/`Error`.
#[derive(Debug, Clone)]
pub enum ListenerEvent<V> {
    Chunk(V),
    Complete { total_len: usize, timestamp: u64 },
    Error(String),
}

/// A listener is an owned callback with private captured state: a boxed
/// `FnMut` closure, not a trait object hierarchy.
pub type Listener<V> = Box<dyn FnMut(ListenerEvent<V>) -> ListenerAction + Send>;

#[derive(Debug)]
pub enum EntryError {
    Evicted,
    ResourceGone,
}

struct Inner<V> {
    data: Vec<V>,
    flags: EntryFlags,
    listeners: Vec<Listener<V>>,
    timestamp: u64,
}

/// The per-key materialization record. `key` is immutable after
/// construction; every other field lives behind `lock`.
pub struct CacheEntry<K, V> {
    pub key: K,
    lock: Mutex<Inner<V>>,
    /// Non-owning back-pointer to the replacement cache, used to report
    /// size updates and trigger removal. Never a strong `Arc`, to avoid an
    /// ownership cycle.
    arc: Mutex<Option<Weak<dyn ReplacementCache<K, V>>>>,
    total_len: AtomicU64,
}

impl<K, V> CacheEntry<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Value,
{
    pub fn create(key: K, is_async: bool) -> Arc<Self> {
        let mut flags = EntryFlags::empty();
        if is_async {
            flags |= EntryFlags::ASYNC;
        }
        Arc::new(Self {
            key,
            lock: Mutex::new(Inner {
                data: Vec::new(),
                flags,
                listeners: Vec::new(),
                timestamp: 0,
            }),
            arc: Mutex::new(None),
            total_len: AtomicU64::new(0),
        })
    }

    pub fn set_replacement_cache(&self, arc: Weak<dyn ReplacementCache<K, V>>) {
        *self.arc.lock() = Some(arc);
    }

    pub fn replacement_cache(&self) -> Option<Arc<dyn ReplacementCache<K, V>>> {
        self.arc.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn flags(&self) -> EntryFlags {
        self.lock.lock().flags
    }

    pub fn is_empty_data(&self) -> bool {
        self.lock.lock().data.is_empty()
    }

    /// Clones the currently materialized chunks without going through the
    /// listener pipeline, for warm reads of an already-`COMPLETE` entry
    /// (re-running `notify_complete` would not replay past `notify_chunk`
    /// calls, so a direct snapshot is the only correct way to read one back).
    pub fn snapshot(&self) -> Vec<V> {
        self.lock.lock().data.clone()
    }

    pub fn total_len(&self) -> usize {
        self.total_len.load(Ordering::Relaxed) as usize
    }

    /// Appends `cb` to the listener list under `lock`, iff `EVICTED` is
    /// unset.
    pub fn register_listener(&self, cb: Listener<V>) -> Result<(), EntryError> {
        let mut inner = self.lock.lock();
        if inner.flags.contains(EntryFlags::EVICTED) {
            return Err(EntryError::Evicted);
        }
        inner.listeners.push(cb);
        Ok(())
    }

    /// Runs `f` with the entry locked, for coordinator-level
    /// check-and-register-in-one-critical-section logic (see
    /// `FetchCoordinator::fetch`, which closes the single-flight
    /// registration race this way).
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce(&mut EntryGuard<'_, V>) -> R) -> R {
        let mut inner = self.lock.lock();
        let mut guard = EntryGuard { inner: &mut inner };
        f(&mut guard)
    }

    /// Invokes each listener's data callback with `chunk`; listeners that
    /// return `Remove` are dropped.
    pub fn notify_chunk(&self, chunk: V) {
        let mut inner = self.lock.lock();
        inner.data.push(chunk.clone());
        retain_listeners(&mut inner.listeners, ListenerEvent::Chunk(chunk));
    }

    /// Invokes each listener's completion callback then clears the list.
    pub fn notify_complete(&self) {
        let mut inner = self.lock.lock();
        let total_len: usize = inner.data.iter().map(Value::len).sum();
        self.total_len.store(total_len as u64, Ordering::Relaxed);
        let timestamp = now_unix();
        inner.timestamp = timestamp;
        let mut listeners = std::mem::take(&mut inner.listeners);
        drop(inner);
        for cb in listeners.iter_mut() {
            cb(ListenerEvent::Complete {
                total_len,
                timestamp,
            });
        }
    }

    /// Invokes each listener with an error signal then clears the list.
    pub fn notify_error(&self, message: impl Into<String> + Clone) {
        let mut inner = self.lock.lock();
        let mut listeners = std::mem::take(&mut inner.listeners);
        drop(inner);
        for cb in listeners.iter_mut() {
            cb(ListenerEvent::Error(message.clone().into()));
        }
    }

    /// If listeners are pending, defer eviction; otherwise free data
    /// immediately and mark `EVICTED`.
    pub fn evict(&self) {
        let mut inner = self.lock.lock();
        if !inner.listeners.is_empty() {
            inner.flags |= EntryFlags::EVICT;
            return;
        }
        inner.data.clear();
        inner.flags = EntryFlags::EVICTED;
    }

    /// Called after the last listener drains for an entry with a deferred
    /// `EVICT`, completing the EVICT-pending -> EVICTED transition.
    pub fn drain_deferred_evict(&self) {
        let mut inner = self.lock.lock();
        if inner.flags.contains(EntryFlags::EVICT) && inner.listeners.is_empty() {
            inner.data.clear();
            inner.flags = EntryFlags::EVICTED;
        }
    }

    /// Safety-net destructor notification: notifies any leftover listeners
    /// with a cancellation error.
    pub fn destroy(&self) {
        self.notify_error("cancelled: cache entry destroyed with listeners still registered");
    }
}

/// A view onto the entry's locked state, handed to coordinator logic that
/// needs to inspect-and-mutate atomically (e.g. the single-flight
/// leader/follower decision).
pub struct EntryGuard<'a, V> {
    inner: &'a mut Inner<V>,
}

impl<'a, V> EntryGuard<'a, V>
where
    V: Value,
{
    pub fn flags(&self) -> EntryFlags {
        self.inner.flags
    }

    pub fn has_data(&self) -> bool {
        !self.inner.data.is_empty()
    }

    pub fn set_flags(&mut self, flags: EntryFlags) {
        self.inner.flags = flags;
    }

    pub fn insert_flags(&mut self, flags: EntryFlags) {
        self.inner.flags |= flags;
    }

    pub fn remove_flags(&mut self, flags: EntryFlags) {
        self.inner.flags.remove(flags);
    }

    pub fn register_listener(&mut self, cb: Listener<V>) -> Result<(), EntryError> {
        if self.inner.flags.contains(EntryFlags::EVICTED) {
            return Err(EntryError::Evicted);
        }
        self.inner.listeners.push(cb);
        Ok(())
    }

    pub fn total_len(&self) -> usize {
        self.inner.data.iter().map(Value::len).sum()
    }
}

fn retain_listeners<V>(listeners: &mut Vec<Listener<V>>, event: ListenerEvent<V>)
where
    V: Clone,
{
    listeners.retain_mut(|cb| cb(event.clone()) == ListenerAction::Keep);
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
