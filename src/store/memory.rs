//! In-process counter store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::{CounterStore, StoreError, StoreResult, MAX_TTL};

/// A counter living until `expires_at`.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

impl CounterEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Instant `duration` after `now`, with `duration` capped at [`MAX_TTL`].
fn deadline(now: Instant, duration: Duration) -> StoreResult<Instant> {
    now.checked_add(duration.min(MAX_TTL))
        .ok_or_else(|| StoreError::InvalidConfig(format!("duration {:?} is out of range", duration)))
}

/// Counter store backed by sharded concurrent maps.
///
/// Expiry is checked lazily on access; there is no background sweep. Each
/// increment runs under the shard lock of its key, so the expired-check,
/// create and increment steps are one critical section, and keys in other
/// shards proceed in parallel.
pub struct MemoryStore {
    /// Live (or not yet observed as expired) counters
    counters: DashMap<String, CounterEntry>,
    /// Block expiry instants
    blocklist: DashMap<String, Instant>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with room for `capacity` keys before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counters: DashMap::with_capacity(capacity),
            blocklist: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            blocklist: DashMap::new(),
            clock,
        }
    }

    /// Number of counter entries currently held, expired ones included.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Number of block entries currently held, expired ones included.
    pub fn blocked_count(&self) -> usize {
        self.blocklist.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        let now = self.clock.now();
        let count = self
            .counters
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.count)
            .unwrap_or(0);
        Ok(count)
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let now = self.clock.now();
        let fresh = CounterEntry {
            count: 0,
            expires_at: deadline(now, window)?,
        };

        let mut entry = self.counters.entry(key.to_string()).or_insert(fresh);
        if !entry.is_live(now) {
            *entry = fresh;
        }
        entry.count += 1;

        trace!(key = %key, count = entry.count, "Incremented counter");
        Ok(entry.count)
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        self.counters.remove(key);
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();

        // Copy the instant out so the shard guard is released before removal.
        let Some(expires_at) = self.blocklist.get(key).map(|entry| *entry) else {
            return Ok(false);
        };
        if now < expires_at {
            return Ok(true);
        }

        self.blocklist.remove_if(key, |_, expires_at| now >= *expires_at);
        Ok(false)
    }

    async fn block(&self, key: &str, duration: Duration) -> StoreResult<()> {
        let expires_at = deadline(self.clock.now(), duration)?;
        self.blocklist.insert(key.to_string(), expires_at);
        trace!(key = %key, ?duration, "Blocked key");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
