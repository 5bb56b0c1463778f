//! Counter storage for throttling keys.
//!
//! A store maps a key to a request count that lives for a fixed time window.
//! Counters are created by [`CounterStore::add_item`] and only ever bumped by
//! [`CounterStore::increment`]; once the window elapses the counter is treated
//! as absent, whether or not it has been physically removed yet.

use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

/// Lifetime of a counter, measured from its creation.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// How often the in-memory store drops expired counters.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(90);

/// Storage backend for request counters.
///
/// Implementations must be safe to call concurrently for the same key; two
/// increments racing on one key must both be reflected in the count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `delta` to the live counter for `key` and return the new count.
    ///
    /// Fails with [`ThrottlerError::KeyNotFound`] if the key has no live
    /// counter. Does not extend the counter's expiry.
    async fn increment(&self, key: &str, delta: i64) -> ThrottlerResult<i64>;

    /// Create a counter for `key` starting at `value`.
    ///
    /// Fails with [`ThrottlerError::KeyExists`] if a live counter is present.
    async fn add_item(&self, key: &str, value: i64) -> ThrottlerResult<()>;
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: i64,
    expires_at: Instant,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process counter store backed by a sharded concurrent map.
///
/// Per-key atomicity comes from the shard lock held for the whole
/// read-modify-write. Expired counters are purged by a background task when
/// the store is created inside a Tokio runtime, and on demand through
/// [`MemoryStore::purge_expired`].
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, CounterEntry>>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration, cleanup_interval: Duration) -> Self {
        let entries = Arc::new(DashMap::new());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !cleanup_interval.is_zero() => {
                handle.spawn(sweep(Arc::downgrade(&entries), cleanup_interval));
            }
            _ => debug!("Counter sweeper disabled; expired counters are purged on demand"),
        }

        Self { entries, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored counters, including expired ones not purged yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired counter, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CLEANUP_INTERVAL)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, delta: i64) -> ThrottlerResult<i64> {
        let now = Instant::now();

        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.count = entry.count.saturating_add(delta);
                Ok(entry.count)
            }
            _ => Err(ThrottlerError::KeyNotFound(key.to_string())),
        }
    }

    async fn add_item(&self, key: &str, value: i64) -> ThrottlerResult<()> {
        let now = Instant::now();
        let fresh = CounterEntry {
            count: value,
            expires_at: now + self.ttl,
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    Ok(())
                } else {
                    Err(ThrottlerError::KeyExists(key.to_string()))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(())
            }
        }
    }
}

fn purge(entries: &DashMap<String, CounterEntry>) -> usize {
    let now = Instant::now();
    let mut removed = 0;

    entries.retain(|_, entry| {
        let keep = !entry.is_expired(now);
        if !keep {
            removed += 1;
        }
        keep
    });

    removed
}

async fn sweep(entries: Weak<DashMap<String, CounterEntry>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(entries) = entries.upgrade() else {
            debug!("Counter store dropped, stopping sweeper");
            break;
        };

        let removed = purge(&entries);
        if removed > 0 {
            debug!(removed, "Purged expired counters");
        }
    }
}
