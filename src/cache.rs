//! Bounded record cache with single-flight loading.
//!
//! The cache maps record identifiers to decoded [`Record`]s shared through
//! `Arc`. Memory is bounded by a byte budget and an entry budget; the least
//! recently used records are evicted first.
//!
//! Concurrent requests for the same missing key are coalesced: the first
//! requester loads the record while the others wait on the in-flight slot
//! and then receive the very same `Arc`. A failed load is not cached; its
//! waiters retry, one of them becoming the next loader.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::trace;

use crate::error::{ConfigError, GfError, GfResult};
use crate::record::Record;

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Upper bound on the summed size of cached records.
    pub max_bytes: usize,
    /// Upper bound on the number of cached records.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024, // 256 MiB
            max_entries: 1 << 20,
        }
    }
}

impl CacheConfig {
    const MIN_BYTES: usize = 4 * 1024; // room for at least a few short traces
    const MIN_ENTRIES: usize = 1;

    /// Checks the configured minimums.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_bytes < Self::MIN_BYTES {
            return Err(ConfigError::OptionTooSmall {
                field: "cache.max_bytes",
                min: Self::MIN_BYTES as u64,
                actual: self.max_bytes as u64,
            });
        }
        if self.max_entries < Self::MIN_ENTRIES {
            return Err(ConfigError::OptionTooSmall {
                field: "cache.max_entries",
                min: Self::MIN_ENTRIES as u64,
                actual: self.max_entries as u64,
            });
        }
        Ok(self)
    }
}

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from a cached record.
    pub hits: u64,
    /// Requests that ran the loader.
    pub loads: u64,
    /// Requests that waited on another requester's load.
    pub coalesced: u64,
    /// Records evicted to stay within budget.
    pub evictions: u64,
    /// Records currently cached.
    pub entries: usize,
    /// Bytes currently cached.
    pub bytes: usize,
}

enum Outcome {
    Loaded(Arc<Record>),
    Failed,
}

#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl Flight {
    fn publish(&self, outcome: Outcome) {
        if let Ok(mut slot) = self.outcome.lock() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> GfResult<Option<Arc<Record>>> {
        let mut slot = self.outcome.lock().map_err(|_| lock_err("in-flight load"))?;
        loop {
            match slot.as_ref() {
                Some(Outcome::Loaded(record)) => return Ok(Some(Arc::clone(record))),
                Some(Outcome::Failed) => return Ok(None),
                None => {
                    slot = self.done.wait(slot).map_err(|_| lock_err("in-flight load"))?;
                }
            }
        }
    }
}

enum Slot {
    Ready { record: Arc<Record>, tick: u64 },
    Loading(Arc<Flight>),
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<u64, Slot>,
    recency: BTreeMap<u64, u64>,
    tick: u64,
    bytes: usize,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

fn lock_err(context: &'static str) -> GfError {
    GfError::internal(format!("poisoned lock: {context}"))
}

/// Thread-safe bounded cache of decoded records.
pub struct RecordCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Clears the in-flight slot if the loader unwinds.
struct LeaderGuard<'a> {
    cache: &'a RecordCache,
    key: u64,
    flight: Arc<Flight>,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.cache.state.lock() {
                state.slots.remove(&self.key);
            }
            self.flight.publish(Outcome::Failed);
        }
    }
}

impl RecordCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the cached record for `key`, running `loader` on a miss.
    ///
    /// At most one loader runs per key at a time; concurrent requesters for
    /// the same key wait for it and share its result.
    pub fn get_or_load<F>(&self, key: u64, loader: F) -> GfResult<Arc<Record>>
    where
        F: FnOnce() -> GfResult<Record>,
    {
        let mut loader = Some(loader);
        loop {
            let (flight, leader) = {
                let mut guard = self.lock_state()?;
                let state = &mut *guard;
                let tick = state.next_tick();
                match state.slots.get_mut(&key) {
                    Some(Slot::Ready { record, tick: last }) => {
                        let record = Arc::clone(record);
                        let previous = std::mem::replace(last, tick);
                        state.recency.remove(&previous);
                        state.recency.insert(tick, key);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(record);
                    }
                    Some(Slot::Loading(flight)) => (Arc::clone(flight), false),
                    None => {
                        let flight = Arc::new(Flight::default());
                        state.slots.insert(key, Slot::Loading(Arc::clone(&flight)));
                        (flight, true)
                    }
                }
            };

            if !leader {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                match flight.wait()? {
                    Some(record) => return Ok(record),
                    None => continue,
                }
            }

            let load = loader
                .take()
                .ok_or_else(|| GfError::internal("record loader invoked twice"))?;
            return self.lead(key, flight, load);
        }
    }

    fn lead<F>(&self, key: u64, flight: Arc<Flight>, load: F) -> GfResult<Arc<Record>>
    where
        F: FnOnce() -> GfResult<Record>,
    {
        let mut guard = LeaderGuard {
            cache: self,
            key,
            flight,
            armed: true,
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(load()?);

        {
            let mut state = self.lock_state()?;
            let tick = state.next_tick();
            state.bytes += record.size_bytes();
            state.slots.insert(
                key,
                Slot::Ready {
                    record: Arc::clone(&record),
                    tick,
                },
            );
            state.recency.insert(tick, key);
            self.evict(&mut state);
        }

        guard.armed = false;
        guard.flight.publish(Outcome::Loaded(Arc::clone(&record)));
        Ok(record)
    }

    fn evict(&self, state: &mut CacheState) {
        while state.bytes > self.config.max_bytes || state.recency.len() > self.config.max_entries {
            let Some((_, victim)) = state.recency.pop_first() else {
                break;
            };
            if let Some(Slot::Ready { record, .. }) = state.slots.remove(&victim) {
                state.bytes = state.bytes.saturating_sub(record.size_bytes());
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(irecord = victim, bytes = state.bytes, "evicted record");
            }
        }
    }

    fn lock_state(&self) -> GfResult<MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|_| lock_err("record cache"))
    }

    /// Drops every cached record. In-flight loads are left to finish.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.slots.retain(|_, slot| matches!(slot, Slot::Loading(_)));
            state.recency.clear();
            state.bytes = 0;
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = self
            .state
            .lock()
            .map(|s| (s.recency.len(), s.bytes))
            .unwrap_or_default();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            bytes,
        }
    }

    /// Configured budget.
    #[must_use]
    pub const fn config(&self) -> CacheConfig {
        self.config
    }
}
