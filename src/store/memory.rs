//! In-process store over `DashMap`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{BucketState, Clock, CounterStore, KeyValueStore, StoreError, SystemClock};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    attempts: u32,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Concurrent in-memory store implementing both counters and values.
///
/// Cloning is cheap and clones share the same maps.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    counters: Arc<DashMap<String, Bucket>>,
    values: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            values: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Drop expired buckets and values.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        self.counters.retain(|_, b| {
            let live = now < b.expires_at;
            purged += usize::from(!live);
            live
        });
        self.values.retain(|_, s| {
            let live = now < s.expires_at;
            purged += usize::from(!live);
            live
        });
        purged
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryStore {
    fn increment(&self, key: &str, window: Duration) -> Result<BucketState, StoreError> {
        let now = self.clock.now();
        // The entry guard holds the shard lock, so read-modify-write is atomic per key.
        let mut entry = self.counters.entry(key.to_string()).or_insert(Bucket {
            attempts: 0,
            expires_at: now,
        });

        let fresh = now >= entry.expires_at;
        if fresh {
            entry.attempts = 1;
            entry.expires_at = now + window;
        } else {
            entry.attempts = entry.attempts.saturating_add(1);
        }

        Ok(BucketState {
            attempts: entry.attempts,
            window_expires_at: entry.expires_at,
            fresh,
        })
    }

    fn peek(&self, key: &str) -> Result<Option<BucketState>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .counters
            .get(key)
            .filter(|b| now < b.expires_at)
            .map(|b| BucketState {
                attempts: b.attempts,
                window_expires_at: b.expires_at,
                fresh: false,
            }))
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        let expired = match self.values.get(key) {
            Some(slot) if now < slot.expires_at => return Ok(Some(slot.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.values.remove_if(key, |_, s| now >= s.expires_at);
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.clock.now() + ttl;
        self.values.insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    fn len(&self) -> usize {
        let now = self.clock.now();
        self.values.iter().filter(|s| now < s.expires_at).count()
    }
}
