#![forbid(unsafe_code)]
//! Reference-counted, capacity-bounded cache shared by the page cache and the
//! DataItem cache.
//!
//! Every `get` pins the entry and returns a [`Pinned`] handle; dropping the
//! handle releases the pin. When the last pin goes away the entry is either
//! kept around as an idle candidate for LRU eviction or handed straight to the
//! source's `evict` hook, depending on [`CachePolicy::retain_idle`]. An entry
//! whose `evict` hook fails stays resident, so dirty state is never dropped.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::types::{KestrelError, Result};

/// Backing store that materializes values on a miss and receives them on eviction.
pub trait CacheSource: Send + Sync + 'static {
    /// Value type held by the cache.
    type Value: Send + Sync + 'static;

    /// Loads the value for `key` from the backing store.
    fn load(&self, key: u64) -> Result<Self::Value>;

    /// Called before `value` leaves the cache. Returning an error keeps it resident.
    fn evict(&self, key: u64, value: &Self::Value) -> Result<()>;
}

/// Sizing and retention rules for a [`RefCache`].
#[derive(Clone, Copy, Debug)]
pub struct CachePolicy {
    /// Maximum resident entries; zero means unbounded.
    pub capacity: usize,
    /// Keep unpinned entries resident until capacity pressure evicts them.
    pub retain_idle: bool,
}

impl CachePolicy {
    /// Bounded cache that keeps idle entries around in LRU order.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity,
            retain_idle: true,
        }
    }

    /// Unbounded cache that evicts an entry as soon as its last pin is released.
    pub fn release_on_idle() -> Self {
        Self {
            capacity: 0,
            retain_idle: false,
        }
    }
}

/// Counters describing cache effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a resident entry.
    pub hits: u64,
    /// Lookups that had to load from the source.
    pub misses: u64,
    /// Entries handed to the eviction hook and dropped.
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

const SHARDS: usize = 16;

enum Slot<V> {
    Loading,
    Ready { value: Arc<V>, refs: usize },
    Evicting,
}

struct Shard<V> {
    slots: Mutex<HashMap<u64, Slot<V>>>,
    settled: Condvar,
}

struct Inner<S: CacheSource> {
    source: S,
    policy: CachePolicy,
    shards: Box<[Shard<S::Value>]>,
    // Keys whose slot is `Ready` with no pins. Lock order: shard, then idle.
    idle: Mutex<LruCache<u64, ()>>,
    resident: AtomicUsize,
    counters: Counters,
}

/// Reference-counted cache over a [`CacheSource`].
///
/// Slots are spread over a fixed set of lock shards. Loads and eviction
/// write-backs run with no shard locked; a key that is loading or being
/// evicted parks its readers on the shard's condition variable.
pub struct RefCache<S: CacheSource> {
    inner: Arc<Inner<S>>,
}

/// A pinned cache entry. Cloning adds a pin; dropping releases one.
pub struct Pinned<S: CacheSource> {
    key: u64,
    value: Arc<S::Value>,
    cache: Arc<Inner<S>>,
}

impl<S: CacheSource> RefCache<S> {
    /// Creates a cache over `source` with the given policy.
    pub fn new(source: S, policy: CachePolicy) -> Self {
        let shards = (0..SHARDS)
            .map(|_| Shard {
                slots: Mutex::new(HashMap::new()),
                settled: Condvar::new(),
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                source,
                policy,
                shards,
                idle: Mutex::new(LruCache::unbounded()),
                resident: AtomicUsize::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the backing source.
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Pins `key`, loading it from the source on a miss.
    ///
    /// Concurrent misses on the same key share a single load. No lock is held
    /// while the source loads or writes back an eviction victim.
    pub fn get(&self, key: u64) -> Result<Pinned<S>> {
        let inner = &self.inner;
        let shard = inner.shard(key);
        loop {
            let mut slots = shard.slots.lock();
            match slots.get_mut(&key) {
                Some(Slot::Ready { value, refs }) => {
                    *refs += 1;
                    if *refs == 1 {
                        inner.idle.lock().pop(&key);
                    }
                    let value = Arc::clone(value);
                    drop(slots);
                    inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(self.pinned(key, value));
                }
                Some(Slot::Loading | Slot::Evicting) => {
                    shard.settled.wait(&mut slots);
                    continue;
                }
                None => {}
            }
            if !inner.reserve() {
                drop(slots);
                inner.evict_one()?;
                continue;
            }
            slots.insert(key, Slot::Loading);
            break;
        }

        inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = inner.source.load(key);

        let mut slots = shard.slots.lock();
        let result = match loaded {
            Ok(value) => {
                let value = Arc::new(value);
                slots.insert(
                    key,
                    Slot::Ready {
                        value: Arc::clone(&value),
                        refs: 1,
                    },
                );
                Ok(self.pinned(key, value))
            }
            Err(err) => {
                slots.remove(&key);
                inner.resident.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        };
        drop(slots);
        shard.settled.notify_all();
        result
    }

    /// Hands every resident entry to the eviction hook and empties the cache.
    ///
    /// Outstanding [`Pinned`] handles stay usable; releasing them afterwards is a no-op.
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;
        let mut first_err = None;
        for shard in inner.shards.iter() {
            let ready: Vec<(u64, Arc<S::Value>)> = shard
                .slots
                .lock()
                .iter()
                .filter_map(|(&key, slot)| match slot {
                    Slot::Ready { value, refs } => {
                        if *refs > 0 {
                            debug!(key, refs = *refs, "cache.close.pinned_entry");
                        }
                        Some((key, Arc::clone(value)))
                    }
                    _ => None,
                })
                .collect();
            for (key, value) in ready {
                if let Err(err) = inner.source.evict(key, &value) {
                    warn!(key, error = %err, "cache.close.evict_failed");
                    first_err.get_or_insert(err);
                    continue;
                }
                let mut slots = shard.slots.lock();
                if let Some(Slot::Ready { .. }) = slots.get(&key) {
                    slots.remove(&key);
                    inner.idle.lock().pop(&key);
                    inner.resident.fetch_sub(1, Ordering::AcqRel);
                }
            }
            shard.settled.notify_all();
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of resident entries (pinned, idle, loading, or being evicted).
    pub fn resident(&self) -> usize {
        self.inner.resident.load(Ordering::Acquire)
    }

    /// Snapshot of hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    fn pinned(&self, key: u64, value: Arc<S::Value>) -> Pinned<S> {
        Pinned {
            key,
            value,
            cache: Arc::clone(&self.inner),
        }
    }
}

impl<S: CacheSource> Inner<S> {
    fn shard(&self, key: u64) -> &Shard<S::Value> {
        let mixed = key ^ (key >> 32);
        &self.shards[(mixed % self.shards.len() as u64) as usize]
    }

    /// Claims room for one more slot; always succeeds when unbounded.
    fn reserve(&self) -> bool {
        let cap = self.policy.capacity;
        self.resident
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (cap == 0 || n < cap).then_some(n + 1)
            })
            .is_ok()
    }

    /// Evicts one idle entry. Fails with `CacheFull` when nothing is idle, or
    /// with the last write-back error when every candidate refused.
    fn evict_one(&self) -> Result<()> {
        let mut last_err = None;
        let candidates = self.idle.lock().len();
        for _ in 0..candidates {
            let Some((victim, ())) = self.idle.lock().pop_lru() else {
                break;
            };
            match self.evict_idle(victim) {
                Some(Ok(())) => return Ok(()),
                Some(Err(err)) => last_err = Some(err),
                None => continue,
            }
        }
        Err(last_err.unwrap_or(KestrelError::CacheFull))
    }

    /// Evicts `key` if it is still unpinned. `None` means it was pinned or gone.
    fn evict_idle(&self, key: u64) -> Option<Result<()>> {
        let shard = self.shard(key);
        let mut slots = shard.slots.lock();
        let value = match slots.get(&key) {
            Some(Slot::Ready { value, refs: 0 }) => Arc::clone(value),
            _ => return None,
        };
        slots.insert(key, Slot::Evicting);
        drop(slots);
        Some(self.finish_evict(shard, key, value))
    }

    fn finish_evict(&self, shard: &Shard<S::Value>, key: u64, value: Arc<S::Value>) -> Result<()> {
        let result = self.source.evict(key, &value);
        let mut slots = shard.slots.lock();
        match &result {
            Ok(()) => {
                slots.remove(&key);
                self.resident.fetch_sub(1, Ordering::AcqRel);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache.evict");
            }
            Err(err) => {
                warn!(key, error = %err, "cache.evict_failed");
                slots.insert(key, Slot::Ready { value, refs: 0 });
                self.idle.lock().put(key, ());
            }
        }
        drop(slots);
        shard.settled.notify_all();
        result
    }

    fn release(&self, key: u64) {
        let shard = self.shard(key);
        let mut slots = shard.slots.lock();
        let value = match slots.get_mut(&key) {
            Some(Slot::Ready { value, refs }) => {
                *refs = refs.saturating_sub(1);
                if *refs > 0 {
                    return;
                }
                Arc::clone(value)
            }
            _ => return,
        };
        if self.policy.retain_idle {
            self.idle.lock().put(key, ());
            return;
        }
        slots.insert(key, Slot::Evicting);
        drop(slots);
        // A failed write-back leaves the entry idle and resident.
        let _ = self.finish_evict(shard, key, value);
    }
}

impl<S: CacheSource> Pinned<S> {
    /// Key this handle pins.
    pub fn key(&self) -> u64 {
        self.key
    }
}

impl<S: CacheSource> Deref for Pinned<S> {
    type Target = S::Value;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<S: CacheSource> Clone for Pinned<S> {
    fn clone(&self) -> Self {
        let mut slots = self.cache.shard(self.key).slots.lock();
        if let Some(Slot::Ready { refs, .. }) = slots.get_mut(&self.key) {
            *refs += 1;
        }
        drop(slots);
        Self {
            key: self.key,
            value: Arc::clone(&self.value),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S: CacheSource> Drop for Pinned<S> {
    fn drop(&mut self) {
        self.cache.release(self.key);
    }
}

impl<S: CacheSource> fmt::Debug for Pinned<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned").field("key", &self.key).finish()
    }
}
