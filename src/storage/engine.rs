//! Thread-Safe Storage Engine with Timer-Driven Expiry
//!
//! A sharded map from byte-string keys to values, where each key may carry
//! a TTL. Expiry is scheduled on a [`TimingWheel`]: when a key's timer fires
//! the key is deleted, so no sweep over the keyspace is ever needed.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: 64 shards, each an `RwLock<HashMap>`. A shard's lock
//!    is the mutual-exclusion domain for every key hashed into it.
//! 2. **One Live Timer Per Key**: an entry holds at most one expiry record.
//!    `set`, `delete`, `expire` and `persist` cancel the old timer under the
//!    same shard lock that installs the new state.
//! 3. **Generations**: every scheduled expiry gets a fresh generation number.
//!    A firing timer deletes the key only while the entry still carries that
//!    generation, so a timer that lost a race to `set` or `expire` has no
//!    effect even if its callback was already running.
//! 4. **Read-Side Deadline Check**: `get` treats an entry past its deadline
//!    as absent without touching it, which keeps reads exact between the
//!    deadline and the wheel tick that removes the key.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └──────────────────────────────┬──────────────────────────────┘
//!                  after_func /  │  ▲ callback: expire_if_current
//!                  cancel        ▼  │
//!                 ┌─────────────────────────────┐
//!                 │        TimingWheel          │
//!                 └─────────────────────────────┘
//! ```
//!
//! Lock order is always shard, then wheel. Timer callbacks run after the
//! wheel lock is released.

use crate::timer::{TimerHandle, TimingWheel};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tracing::trace;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// The pending expiry of one entry.
#[derive(Debug)]
struct Expiry {
    handle: TimerHandle,
    deadline: Instant,
    generation: u64,
}

/// A stored value with its optional expiry.
#[derive(Debug)]
struct Entry {
    value: Bytes,
    expiry: Option<Expiry>,
}

impl Entry {
    fn new(value: Bytes) -> Self {
        Self {
            value,
            expiry: None,
        }
    }

    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expiry.as_ref().is_some_and(|e| now >= e.deadline)
    }

    /// Drops the expiry record and cancels its timer.
    fn clear_expiry(&mut self) -> bool {
        match self.expiry.take() {
            Some(expiry) => {
                expiry.handle.cancel();
                true
            }
            None => false,
        }
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist (or has expired).
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after this long.
    Expires(Duration),
}

/// Storage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}

type Shard = RwLock<HashMap<Bytes, Entry>>;

/// The shards and counters. Timer callbacks hold a `Weak` to this, never to
/// the engine, so pending timers do not keep a dropped engine alive.
struct Keyspace {
    shards: Vec<Shard>,
    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl Keyspace {
    fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    fn read(&self, key: &[u8]) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.shard(key).read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, key: &[u8]) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.shard(key).write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accounts for an entry that has just been removed from a shard.
    fn removed(&self, mut entry: Entry, now: Instant) {
        self.key_count.fetch_sub(1, Ordering::Relaxed);
        if entry.is_expired(now) {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
        entry.clear_expiry();
    }

    /// Timer callback: deletes `key` if its expiry is still `generation`.
    fn expire_if_current(&self, key: &Bytes, generation: u64) {
        let mut data = self.write(key);

        let current = data
            .get(key)
            .and_then(|entry| entry.expiry.as_ref())
            .is_some_and(|expiry| expiry.generation == generation);

        if current {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            trace!(key = %String::from_utf8_lossy(key), "Key expired");
        }
    }
}

/// The key-value store shared by every connection.
///
/// Wrap it in an `Arc`; all operations take `&self`.
///
/// # Example
///
/// ```
/// use spindle::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// engine.expire(b"name", Duration::from_secs(60));
/// engine.delete(b"name");
/// assert_eq!(engine.get(b"name"), None);
/// ```
pub struct StorageEngine {
    keyspace: Arc<Keyspace>,
    wheel: Arc<TimingWheel>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.keyspace.shards.len())
            .field("stats", &self.stats())
            .field("wheel", &self.wheel)
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an engine with its own default timing wheel.
    ///
    /// The wheel is not started; see [`StorageEngine::wheel`].
    pub fn new() -> Self {
        Self::with_wheel(Arc::new(TimingWheel::default()))
    }

    /// Creates an engine that schedules expiry on `wheel`.
    pub fn with_wheel(wheel: Arc<TimingWheel>) -> Self {
        Self {
            keyspace: Arc::new(Keyspace::new()),
            wheel,
            next_generation: AtomicU64::new(1),
        }
    }

    /// The wheel expiry timers are scheduled on. Call
    /// [`TimingWheel::start`] on it to drive expiry in the background.
    pub fn wheel(&self) -> &Arc<TimingWheel> {
        &self.wheel
    }

    /// Inserts or overwrites `key`. Any TTL on the previous value is
    /// cancelled, so the new value has no TTL.
    ///
    /// Returns `true` if the key did not hold a live value before.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.keyspace.set_count.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let mut data = self.keyspace.write(&key);
        match data.insert(key, Entry::new(value)) {
            Some(mut old) => {
                let was_live = !old.is_expired(now);
                if !was_live {
                    self.keyspace.expired_count.fetch_add(1, Ordering::Relaxed);
                }
                old.clear_expiry();
                !was_live
            }
            None => {
                self.keyspace.key_count.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Returns the current value, or `None` if the key is absent or past its
    /// deadline. Never modifies the map.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.keyspace.get_count.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let data = self.keyspace.read(key);
        data.get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Returns true if the key holds a live value.
    pub fn exists(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let data = self.keyspace.read(key);
        data.get(key).is_some_and(|entry| !entry.is_expired(now))
    }

    /// Removes `key` and cancels its pending expiry.
    ///
    /// Returns `true` if a live value was removed. Deleting an absent key is
    /// not an error.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.keyspace.del_count.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let mut data = self.keyspace.write(key);
        match data.remove(key) {
            Some(entry) => {
                let was_live = !entry.is_expired(now);
                self.keyspace.removed(entry, now);
                was_live
            }
            None => false,
        }
    }

    /// Sets the TTL of an existing key, replacing any previous TTL.
    ///
    /// A zero TTL deletes the key at once. Returns `false`, and does
    /// nothing, if the key does not exist.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> bool {
        let now = Instant::now();
        let mut data = self.keyspace.write(key);

        let live = data.get(key).is_some_and(|entry| !entry.is_expired(now));
        if !live {
            // Past its deadline but not yet reaped: finish the job.
            if let Some(entry) = data.remove(key) {
                self.keyspace.removed(entry, now);
            }
            return false;
        }

        let deadline = match now.checked_add(ttl) {
            Some(deadline) if !ttl.is_zero() => deadline,
            Some(_) => {
                if let Some(mut entry) = data.remove(key) {
                    entry.clear_expiry();
                    self.keyspace.key_count.fetch_sub(1, Ordering::Relaxed);
                    self.keyspace.expired_count.fetch_add(1, Ordering::Relaxed);
                }
                return true;
            }
            // Too far out to represent: the key simply never expires.
            None => {
                if let Some(entry) = data.get_mut(key) {
                    entry.clear_expiry();
                }
                return true;
            }
        };

        let Some(entry) = data.get_mut(key) else {
            return false;
        };
        entry.clear_expiry();

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let keyspace: Weak<Keyspace> = Arc::downgrade(&self.keyspace);
        let timer_key = Bytes::copy_from_slice(key);
        let handle = self.wheel.schedule_at(deadline, move || {
            if let Some(keyspace) = keyspace.upgrade() {
                keyspace.expire_if_current(&timer_key, generation);
            }
        });

        entry.expiry = Some(Expiry {
            handle,
            deadline,
            generation,
        });
        true
    }

    /// Removes the TTL from a key. Returns `true` if a TTL was removed.
    pub fn persist(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let mut data = self.keyspace.write(key);
        match data.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => entry.clear_expiry(),
            _ => false,
        }
    }

    /// Remaining lifetime of `key`.
    pub fn ttl(&self, key: &[u8]) -> Ttl {
        let now = Instant::now();
        let data = self.keyspace.read(key);
        match data.get(key) {
            Some(entry) if entry.is_expired(now) => Ttl::Missing,
            Some(Entry {
                expiry: Some(expiry),
                ..
            }) => Ttl::Expires(expiry.deadline - now),
            Some(_) => Ttl::Persistent,
            None => Ttl::Missing,
        }
    }

    /// Number of stored keys. Keys past their deadline count until their
    /// timer fires.
    pub fn len(&self) -> u64 {
        self.keyspace.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        let keyspace = &self.keyspace;
        StorageStats {
            keys: keyspace.key_count.load(Ordering::Relaxed),
            get_ops: keyspace.get_count.load(Ordering::Relaxed),
            set_ops: keyspace.set_count.load(Ordering::Relaxed),
            del_ops: keyspace.del_count.load(Ordering::Relaxed),
            expired: keyspace.expired_count.load(Ordering::Relaxed),
        }
    }
}
