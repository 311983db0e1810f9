//! In-process counter store.
//!
//! Counters live in a sharded map; the shard lock held by the entry API
//! makes each increment indivisible per key. Expiry uses tokio's clock so
//! paused-time tests can move windows forward without sleeping.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterSnapshot, CounterStore, ScriptHandle, StoreError};

/// Identifier handed out by [`MemoryStore::load_script`].
const MEMORY_SCRIPT_ID: &str = "memory:incr-expire";

/// A single fixed-window counter.
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

impl Counter {
    fn start(now: Instant, window_secs: u64) -> Result<Self, StoreError> {
        let expires_at = now
            .checked_add(Duration::from_secs(window_secs))
            .ok_or_else(|| StoreError::Unavailable(format!("window of {window_secs}s is out of range")))?;

        Ok(Self { count: 1, expires_at })
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime in whole seconds, rounded the way Redis `TTL` does.
    fn ttl(&self, now: Instant) -> u64 {
        let remaining = self.expires_at.saturating_duration_since(now);
        ((remaining.as_millis() + 500) / 1000) as u64
    }

    fn snapshot(&self, now: Instant) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count,
            ttl: self.ttl(now),
        }
    }
}

/// Counter store kept in process memory.
///
/// Suitable for a single instance or for tests; counts are not shared
/// between processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, Counter>,
    script: RwLock<Option<ScriptHandle>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every counter whose window has elapsed.
    ///
    /// Returns the number of counters removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        before.saturating_sub(self.counters.len())
    }

    /// Periodically purge expired counters until the store is dropped.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let mut ticker = tokio::time::interval(interval);

        tokio::spawn(async move {
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };

                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = store.len(), "Purged expired counters");
                }
            }
        })
    }

    /// Number of counters currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Current count for `key`, or `None` if absent or expired.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.count)
    }

    fn check_script(&self, script: &ScriptHandle) -> Result<(), StoreError> {
        match self.script.read().as_ref() {
            Some(loaded) if loaded == script => Ok(()),
            _ => Err(StoreError::Unavailable(format!(
                "NOSCRIPT no script registered for handle {script}"
            ))),
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn load_script(&self) -> Result<ScriptHandle, StoreError> {
        let handle = ScriptHandle::new(MEMORY_SCRIPT_ID);
        *self.script.write() = Some(handle.clone());
        Ok(handle)
    }

    async fn increment(
        &self,
        script: &ScriptHandle,
        key: &str,
        window_secs: u64,
    ) -> Result<CounterSnapshot, StoreError> {
        self.check_script(script)?;

        let now = Instant::now();
        let snapshot = match self.counters.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if counter.is_expired(now) {
                    *counter = Counter::start(now, window_secs)?;
                } else {
                    counter.count += 1;
                }
                counter.snapshot(now)
            }
            Entry::Vacant(vacant) => vacant.insert(Counter::start(now, window_secs)?).snapshot(now),
        };

        trace!(key, count = snapshot.count, ttl = snapshot.ttl, "Incremented counter");
        Ok(snapshot)
    }
}
