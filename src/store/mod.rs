//! Backing stores for fixed-window counters.
//!
//! A store exposes one atomic primitive: increment a counter and, if the
//! increment created it, set its expiry. Everything else the limiter needs
//! is derived from the `(count, ttl)` pair that primitive returns.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Server-side script implementing increment-and-conditionally-expire.
///
/// The expiry is only set when the post-increment value is 1, so later
/// increments inside the same window never push the reset time out.
pub const INCREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call("incr", KEYS[1]))
if current == 1 then
  redis.call("expire", KEYS[1], ARGV[1])
end
local ttl = redis.call("ttl", KEYS[1])
return {current, ttl}
"#;

/// Errors that can occur while talking to a backing store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the response timeout.
    #[error("Store timed out after {0:?}")]
    Timeout(Duration),
}

/// Opaque handle to the registered increment operation.
///
/// Produced once by [`CounterStore::load_script`] and passed back on every
/// increment. For Redis this is the script's SHA1 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptHandle(String);

impl ScriptHandle {
    /// Wrap a store-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The store-issued identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a counter immediately after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Post-increment count, at least 1.
    pub count: u64,
    /// Seconds until the counter expires, never more than the window.
    pub ttl: u64,
}

/// Trait for counter store implementations.
///
/// Implementations must make [`increment`](CounterStore::increment)
/// indivisible per key: concurrent callers on one key each observe a
/// distinct count, and the expiry is set exactly once per window.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Register the increment operation with the store.
    async fn load_script(&self) -> Result<ScriptHandle, StoreError>;

    /// Increment `key`, setting its expiry to `window_secs` if it was absent.
    async fn increment(
        &self,
        script: &ScriptHandle,
        key: &str,
        window_secs: u64,
    ) -> Result<CounterSnapshot, StoreError>;
}
