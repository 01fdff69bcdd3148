//! Thin wrapper around a shared coordination store (Redis-compatible),
//! providing the primitives that locking (C2), leader election (C3),
//! distributed rate limiting (C4), and cron fencing (C8) are built on.
//!
//! Mirrors the pattern used for the cron lock in the retrieved
//! `kernel::cron` service: a cheaply-cloneable `redis::Client` pulling a
//! fresh multiplexed connection per call, rather than a connection pool.
//! Coordination calls are infrequent relative to request traffic (lock
//! acquire/renew, not per-request), so pooling overhead isn't worth the
//! extra dependency.

use redis::AsyncCommands;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("coordination store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid coordination store url: {0}")]
    InvalidUrl(String),
}

/// Release a lock iff the caller still holds it, identified by the fencing
/// token stored as the key's value.
const COMPARE_DELETE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Extend a lock's TTL iff the caller still holds it.
const COMPARE_EXPIRE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Atomically increment a counter and (re-)set its expiry on first
/// increment, used for the distributed sliding-window rate limiter.
const INCR_WITH_EXPIRE_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Clone)]
pub struct CoordinationClient {
    client: redis::Client,
}

impl CoordinationClient {
    pub fn new(url: &str) -> Result<Self, CoordinationError> {
        let client =
            redis::Client::open(url).map_err(|e| CoordinationError::InvalidUrl(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CoordinationError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// `SET key value NX PX ttl_ms`. Returns `true` if the key was set
    /// (i.e. the lock/slot was free), `false` if it already existed.
    pub async fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    /// Delete `key` iff its current value equals `expected`. Returns `true`
    /// if the delete happened.
    pub async fn compare_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = redis::Script::new(COMPARE_DELETE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    /// Extend `key`'s TTL to `ttl_ms` iff its current value equals
    /// `expected`. Returns `true` if the extension happened.
    pub async fn compare_expire(
        &self,
        key: &str,
        expected: &str,
        ttl_ms: u64,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.connection().await?;
        let extended: i64 = redis::Script::new(COMPARE_EXPIRE_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    /// Increment `key`, setting its expiry to `window_ms` on the first
    /// increment within a fresh window. Returns the post-increment count.
    pub async fn incr_with_expire(
        &self,
        key: &str,
        window_ms: u64,
    ) -> Result<i64, CoordinationError> {
        let mut conn = self.connection().await?;
        let count: i64 = redis::Script::new(INCR_WITH_EXPIRE_SCRIPT)
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Plain `SET key value PX ttl_ms`, used for unconditional state
    /// snapshots (e.g. scheduled-job last-run bookkeeping) that don't need
    /// fencing.
    pub async fn set_px(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<(), CoordinationError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Scan keys matching `pattern`, used by the cluster status view to
    /// enumerate active locks.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CoordinationError> {
        let mut conn = self.connection().await?;
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
