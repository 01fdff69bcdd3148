//! Distributed mutual-exclusion lock built on `reactor-coordination`'s
//! atomic primitives, per the contract: `acquire`/`release`/`extend`/
//! `inspect`. Release and extend close the TOCTOU gap with a server-side
//! compare-and-delete / compare-and-expire script rather than a
//! read-then-write pair from the client.

use reactor_coordination::{CoordinationClient, CoordinationError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("coordination store error: {0}")]
    Coordination(#[from] CoordinationError),
}

/// `instance_id:monotonic_now:random_nonce`, unique per acquisition so a
/// release/extend can be proven to come from the holder that acquired it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn new(instance_id: &str) -> Self {
        static NONCE: AtomicU64 = AtomicU64::new(0);
        let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("{}:{}:{}", instance_id, now, nonce))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct LockInfo {
    pub owner_token: String,
    /// Whether the owner token belongs to this instance.
    pub mine: bool,
}

/// Distributed lock over a shared coordination store. One `DistributedLock`
/// is typically constructed per instance and reused across keys.
#[derive(Clone)]
pub struct DistributedLock {
    store: CoordinationClient,
    instance_id: String,
}

impl DistributedLock {
    pub fn new(store: CoordinationClient, instance_id: impl Into<String>) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
        }
    }

    /// Attempt to acquire `key` for `ttl_ms`. Returns the fencing token on
    /// success, `None` if already held. Coordination-store errors propagate
    /// as `Err` (fail-closed).
    pub async fn acquire(&self, key: &str, ttl_ms: u64) -> Result<Option<LockToken>, LockError> {
        let token = LockToken::new(&self.instance_id);
        let acquired = self.store.set_nx_px(key, token.as_str(), ttl_ms).await?;
        if acquired {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Release `key` iff `token` is still the current holder. Coordination
    /// errors are logged and treated as a successful release (fail-open) —
    /// per the Leadership/Lock contract, the caller cannot distinguish "lock
    /// already expired" from "store unreachable", and staying blocked on an
    /// unreachable store would starve every other instance too.
    pub async fn release(&self, key: &str, token: &LockToken) -> bool {
        match self.store.compare_delete(key, token.as_str()).await {
            Ok(released) => released,
            Err(err) => {
                tracing::warn!(%key, error = %err, "lock release failed against coordination store, clearing local state");
                true
            }
        }
    }

    /// Extend `key`'s TTL iff `token` is still the current holder. Returns
    /// `false` (and propagates the underlying error to the caller's
    /// renewal loop) on store failure — extension, unlike release, must
    /// fail closed so a renewal loss is observed as `lost`, not silently
    /// assumed successful.
    pub async fn extend(
        &self,
        key: &str,
        token: &LockToken,
        ttl_ms: u64,
    ) -> Result<bool, LockError> {
        Ok(self.store.compare_expire(key, token.as_str(), ttl_ms).await?)
    }

    pub async fn inspect(&self, key: &str) -> Result<Option<LockInfo>, LockError> {
        match self.store.get(key).await? {
            Some(owner_token) => {
                let mine = owner_token.starts_with(&format!("{}:", self.instance_id));
                Ok(Some(LockInfo { owner_token, mine }))
            }
            None => Ok(None),
        }
    }
}

/// RAII-ish handle returned by a successful acquisition. Does not release on
/// `Drop` (releasing asynchronously from a sync destructor isn't possible
/// without blocking); callers must call `release` explicitly, typically in
/// a `finally`-style `tokio::select!` arm or at the end of the critical
/// section.
pub struct LockHandle {
    lock: DistributedLock,
    key: String,
    token: LockToken,
    lost: bool,
}

impl LockHandle {
    pub fn new(lock: DistributedLock, key: String, token: LockToken) -> Self {
        Self {
            lock,
            key,
            token,
            lost: false,
        }
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub async fn release(self) -> bool {
        self.lock.release(&self.key, &self.token).await
    }

    /// Extend the held lock; marks the handle as lost if extension fails so
    /// callers monitoring `is_lost` via a shared handle can react.
    pub async fn extend(&mut self, ttl_ms: u64) -> Result<bool, LockError> {
        let extended = self.lock.extend(&self.key, &self.token, ttl_ms).await?;
        if !extended {
            self.lost = true;
        }
        Ok(extended)
    }
}
