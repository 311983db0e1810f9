//! Redis-backed counter store.
//!
//! The increment runs as a server-side script so that the `INCR`, the
//! conditional `EXPIRE` and the `TTL` read execute as one unit. A plain
//! pipeline of the same commands is not atomic and must not replace it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::{debug, info};

use super::{CounterSnapshot, CounterStore, ScriptHandle, StoreError, INCREMENT_SCRIPT};

/// Default bound on a single Redis round trip.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Counter store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    /// Multiplexed, auto-reconnecting connection.
    conn: ConnectionManager,
    /// Response timeout applied to every command.
    response_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis and verify the server answers.
    pub async fn connect(url: &str, response_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid Redis URL: {e}")))?;

        let conn = with_timeout(response_timeout, ConnectionManager::new(client)).await?;
        let store = Self { conn, response_timeout };

        let mut conn = store.conn.clone();
        let pong: String = with_timeout(response_timeout, redis::cmd("PING").query_async(&mut conn)).await?;
        debug!(reply = %pong, "Redis connection verified");

        Ok(store)
    }

    /// The configured response timeout.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn load_script(&self) -> Result<ScriptHandle, StoreError> {
        let mut conn = self.conn.clone();
        let sha: String = with_timeout(
            self.response_timeout,
            redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(INCREMENT_SCRIPT)
                .query_async(&mut conn),
        )
        .await?;

        info!(sha = %sha, "Registered counter script with Redis");
        Ok(ScriptHandle::new(sha))
    }

    async fn increment(
        &self,
        script: &ScriptHandle,
        key: &str,
        window_secs: u64,
    ) -> Result<CounterSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        let (count, ttl): (i64, i64) = with_timeout(
            self.response_timeout,
            redis::cmd("EVALSHA")
                .arg(script.as_str())
                .arg(1)
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn),
        )
        .await?;

        Ok(snapshot_from_reply(count, ttl))
    }
}

/// Convert the script's `{current, ttl}` reply.
///
/// `TTL` answers -1 or -2 for keys without a live expiry; those clamp to 0
/// so the computed reset is never in the past.
fn snapshot_from_reply(count: i64, ttl: i64) -> CounterSnapshot {
    CounterSnapshot {
        count: count.max(1) as u64,
        ttl: ttl.max(0) as u64,
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_timeout() => Err(StoreError::Timeout(limit)),
        Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
    }

    fn unique_key(name: &str) -> String {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("turnstile-test:{name}:{nanos}")
    }

    #[test]
    fn test_snapshot_clamps_missing_ttl() {
        assert_eq!(snapshot_from_reply(3, -1), CounterSnapshot { count: 3, ttl: 0 });
        assert_eq!(snapshot_from_reply(1, 60), CounterSnapshot { count: 1, ttl: 60 });
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisStore::connect("not-a-url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_increment_and_expire() {
        let store = RedisStore::connect(&redis_url(), DEFAULT_RESPONSE_TIMEOUT).await.unwrap();
        let script = store.load_script().await.unwrap();
        let key = unique_key("incr");

        let first = store.increment(&script, &key, 60).await.unwrap();
        let second = store.increment(&script, &key, 60).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(first.ttl <= 60 && first.ttl > 0);
        assert!(second.ttl <= first.ttl);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_window_resets() {
        let store = RedisStore::connect(&redis_url(), DEFAULT_RESPONSE_TIMEOUT).await.unwrap();
        let script = store.load_script().await.unwrap();
        let key = unique_key("reset");

        store.increment(&script, &key, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let snapshot = store.increment(&script, &key, 1).await.unwrap();

        assert_eq!(snapshot.count, 1);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_unknown_script_is_unavailable() {
        let store = RedisStore::connect(&redis_url(), DEFAULT_RESPONSE_TIMEOUT).await.unwrap();
        let bogus = ScriptHandle::new("0000000000000000000000000000000000000000");

        let result = store.increment(&bogus, &unique_key("noscript"), 60).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
