//! Leader election for a named service: a lock on `leader:{service}`
//! acquired with TTL `T` and renewed every `T/2`, broadcasting
//! `acquired`/`lost`/`resigned` events to every subsystem that gates its
//! activity on leadership (the cron scheduler, primarily).
//!
//! The broadcast-channel shape is adapted from the retrieved
//! `at-harness::shutdown::ShutdownSignal`: rather than a process-wide event
//! bus, each component subscribes at construction and gets its own
//! receiver, so a slow or panicking subscriber can't block delivery to the
//! others. Unlike a one-shot shutdown signal, leadership toggles over the
//! life of the process, so the channel here carries a repeating stream of
//! `LeadershipEvent`s instead of firing once.

use reactor_lock::{DistributedLock, LockHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("lock ttl_ms ({ttl_ms}) must be at least twice the renewal interval ({renewal_interval_ms})")]
    TtlTooShort {
        ttl_ms: u64,
        renewal_interval_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    Acquired,
    /// Renewal failed — another instance may now hold the lock.
    Lost,
    /// This instance gave up leadership voluntarily (e.g. on shutdown).
    Resigned,
}

struct Inner {
    lock: DistributedLock,
    service: String,
    ttl_ms: u64,
    renewal_interval_ms: u64,
    acquire_retry_interval_ms: u64,
    is_leader: AtomicBool,
    events: broadcast::Sender<LeadershipEvent>,
}

/// Drives the acquire/renew loop for a single named service's leadership.
/// Clone cheaply; the underlying state is shared via `Arc`.
#[derive(Clone)]
pub struct LeaderElection {
    inner: Arc<Inner>,
}

impl LeaderElection {
    /// `renewal_interval_ms` must be at most `ttl_ms / 2`, matching the
    /// "renewed every T/2" invariant — otherwise a single missed tick could
    /// expire the lock before the next renewal is even attempted.
    pub fn new(
        lock: DistributedLock,
        service: impl Into<String>,
        ttl_ms: u64,
        renewal_interval_ms: u64,
    ) -> Result<Self, ElectionError> {
        if renewal_interval_ms == 0 || ttl_ms < 2 * renewal_interval_ms {
            return Err(ElectionError::TtlTooShort {
                ttl_ms,
                renewal_interval_ms,
            });
        }
        let (tx, _rx) = broadcast::channel(16);
        Ok(Self {
            inner: Arc::new(Inner {
                lock,
                service: service.into(),
                ttl_ms,
                renewal_interval_ms,
                acquire_retry_interval_ms: renewal_interval_ms,
                is_leader: AtomicBool::new(false),
                events: tx,
            }),
        })
    }

    pub fn lock_key(&self) -> String {
        format!("leader:{}", self.inner.service)
    }

    pub fn is_leader(&self) -> bool {
        self.inner.is_leader.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.inner.events.subscribe()
    }

    /// Run the election loop until `shutdown` fires. Intended to be spawned
    /// as a background task; returns once a graceful resignation completes.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let key = self.lock_key();
        let mut handle: Option<LockHandle> = None;
        let mut consecutive_renewal_failures: u32 = 0;

        loop {
            if let Some(h) = handle.as_mut() {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(self.inner.renewal_interval_ms)) => {
                        match h.extend(self.inner.ttl_ms).await {
                            Ok(true) => {
                                consecutive_renewal_failures = 0;
                            }
                            Ok(false) | Err(_) => {
                                consecutive_renewal_failures += 1;
                                if should_resign(consecutive_renewal_failures) {
                                    tracing::warn!(service = %self.inner.service, "leadership renewal failed twice in a row, stepping down");
                                    self.set_leader(false);
                                    let _ = self.inner.events.send(LeadershipEvent::Lost);
                                    handle = None;
                                    consecutive_renewal_failures = 0;
                                } else {
                                    tracing::warn!(service = %self.inner.service, "leadership renewal failed, holding through one missed renewal");
                                }
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        if let Some(h) = handle.take() {
                            h.release().await;
                        }
                        self.set_leader(false);
                        let _ = self.inner.events.send(LeadershipEvent::Resigned);
                        return;
                    }
                }
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(self.inner.acquire_retry_interval_ms)) => {
                        match self.inner.lock.acquire(&key, self.inner.ttl_ms).await {
                            Ok(Some(token)) => {
                                tracing::info!(service = %self.inner.service, "acquired leadership");
                                handle = Some(LockHandle::new(self.inner.lock.clone(), key.clone(), token));
                                self.set_leader(true);
                                let _ = self.inner.events.send(LeadershipEvent::Acquired);
                            }
                            Ok(None) => {}
                            Err(err) => {
                                tracing::debug!(service = %self.inner.service, error = %err, "leadership acquire attempt failed");
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        return;
                    }
                }
            }
        }
    }

    fn set_leader(&self, value: bool) {
        self.inner.is_leader.store(value, Ordering::Release);
    }
}

/// spec.md §3: a leader that misses one renewal still holds; two
/// consecutive misses must cause resignation locally.
fn should_resign(consecutive_renewal_failures: u32) -> bool {
    consecutive_renewal_failures >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_coordination::CoordinationClient;

    fn make_election(ttl_ms: u64, renewal_ms: u64) -> Result<LeaderElection, ElectionError> {
        let store = CoordinationClient::new("redis://127.0.0.1:6379").unwrap();
        let lock = DistributedLock::new(store, "instance-a");
        LeaderElection::new(lock, "cron", ttl_ms, renewal_ms)
    }

    #[test]
    fn test_rejects_renewal_interval_too_close_to_ttl() {
        let result = make_election(1000, 600);
        assert!(matches!(result, Err(ElectionError::TtlTooShort { .. })));
    }

    #[test]
    fn test_accepts_valid_ratio() {
        let result = make_election(30_000, 15_000);
        assert!(result.is_ok());
    }

    #[test]
    fn test_lock_key_format() {
        let election = make_election(30_000, 15_000).unwrap();
        assert_eq!(election.lock_key(), "leader:cron");
    }

    #[test]
    fn test_not_leader_initially() {
        let election = make_election(30_000, 15_000).unwrap();
        assert!(!election.is_leader());
    }

    #[test]
    fn test_single_missed_renewal_does_not_resign() {
        assert!(!should_resign(1));
    }

    #[test]
    fn test_two_consecutive_missed_renewals_resigns() {
        assert!(should_resign(2));
        assert!(should_resign(3));
    }
}
