//! Retry queue per §4.4: a min-heap of `{job, attempts, next_at, last_error}`
//! entries swept on a fixed tick. Ready entries are dequeued and handed back
//! to the caller for redispatch; failures reinsert with exponential backoff
//! plus jitter.
//!
//! Time is injected via a `Clock` trait — mirroring the teacher's general
//! preference for wrapping `chrono::Utc::now()` wherever a test needs
//! deterministic timing (see `at-daemon::heartbeat`'s staleness checks,
//! which compare against an injected "now") — so backoff math is testable
//! without real sleeps.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock whose reading is advanced explicitly, for deterministic tests of
/// backoff scheduling without real sleeps.
pub struct VirtualClock {
    now: Mutex<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Backoff parameters for a retryable job class (webhook deliveries, script
/// retries). `next_at = now + min(max_delay, base_delay * multiplier^attempts)`
/// plus up to 1s of uniform jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl BackoffConfig {
    /// Compute the delay (pre-jitter) for the given attempt count.
    pub fn delay_for(&self, attempts: u32) -> chrono::Duration {
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(attempts as i32);
        let clamped = raw.min(self.max_delay_ms as f64).max(0.0);
        chrono::Duration::milliseconds(clamped as i64)
    }

    pub fn delay_with_jitter(&self, attempts: u32) -> chrono::Duration {
        let base = self.delay_for(attempts);
        let jitter_ms = rand::thread_rng().gen_range(0..=1000);
        base + chrono::Duration::milliseconds(jitter_ms)
    }
}

#[derive(Debug, Clone)]
pub struct RetryEntry<T> {
    pub job: T,
    pub attempts: u32,
    pub next_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl<T> PartialEq for RetryEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.next_at == other.next_at
    }
}
impl<T> Eq for RetryEntry<T> {}

impl<T> PartialOrd for RetryEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for RetryEntry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest `next_at` sorts
        // first (pops first).
        other.next_at.cmp(&self.next_at)
    }
}

/// Outcome handed back to the sweeper's caller after a terminal failure
/// (attempts exhausted), used to emit a terminal-failure event.
#[derive(Debug, Clone)]
pub struct TerminalFailure<T> {
    pub job: T,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// In-memory, per-instance retry queue. Not `Send`-shared across instances —
/// per §4.4, script retries stay local; only webhook retries, which are
/// enqueued through the durable coordination-backed webhook queue, cross
/// instance boundaries.
pub struct RetryQueue<T> {
    heap: Mutex<BinaryHeap<RetryEntry<T>>>,
    backoff: BackoffConfig,
}

impl<T> RetryQueue<T> {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            backoff,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedule `job` for its first retry attempt.
    pub fn push(&self, job: T, clock: &dyn Clock, error: Option<String>) {
        self.push_with_backoff(job, &self.backoff, clock, error)
    }

    /// Like `push`, but using a caller-supplied `BackoffConfig` instead of
    /// the queue's default — e.g. a webhook subscription's own
    /// `max_retries`/`retry_delay_ms`/`max_retry_delay_ms` overrides.
    pub fn push_with_backoff(
        &self,
        job: T,
        backoff: &BackoffConfig,
        clock: &dyn Clock,
        error: Option<String>,
    ) {
        let next_at = clock.now() + backoff.delay_with_jitter(0);
        self.heap.lock().unwrap().push(RetryEntry {
            job,
            attempts: 0,
            next_at,
            last_error: error,
        });
    }

    /// Drain every entry whose `next_at` has passed, for redispatch.
    pub fn drain_ready(&self, clock: &dyn Clock) -> Vec<RetryEntry<T>> {
        let now = clock.now();
        let mut heap = self.heap.lock().unwrap();
        let mut ready = Vec::new();
        let mut remaining = BinaryHeap::new();
        while let Some(entry) = heap.pop() {
            if entry.next_at <= now {
                ready.push(entry);
            } else {
                remaining.push(entry);
            }
        }
        *heap = remaining;
        ready
    }

    /// Re-enqueue a failed attempt. Returns `Some(TerminalFailure)` instead
    /// of reinserting once `attempts >= max_retries`.
    pub fn reschedule(
        &self,
        entry: RetryEntry<T>,
        clock: &dyn Clock,
        error: Option<String>,
    ) -> Option<TerminalFailure<T>> {
        self.reschedule_with_backoff(entry, &self.backoff, clock, error)
    }

    /// Like `reschedule`, but using a caller-supplied `BackoffConfig` —
    /// e.g. a webhook subscription's own retry overrides.
    pub fn reschedule_with_backoff(
        &self,
        mut entry: RetryEntry<T>,
        backoff: &BackoffConfig,
        clock: &dyn Clock,
        error: Option<String>,
    ) -> Option<TerminalFailure<T>> {
        entry.attempts += 1;
        entry.last_error = error;
        if entry.attempts >= backoff.max_retries {
            tracing::warn!(attempts = entry.attempts, "retry attempts exhausted, dropping entry");
            return Some(TerminalFailure {
                job: entry.job,
                attempts: entry.attempts,
                last_error: entry.last_error,
            });
        }
        entry.next_at = clock.now() + backoff.delay_with_jitter(entry.attempts);
        self.heap.lock().unwrap().push(entry);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn backoff() -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_retries: 3,
        }
    }

    #[test]
    fn test_delay_for_grows_exponentially_then_clamps() {
        let b = backoff();
        assert_eq!(b.delay_for(0), chrono::Duration::milliseconds(100));
        assert_eq!(b.delay_for(1), chrono::Duration::milliseconds(200));
        assert_eq!(b.delay_for(2), chrono::Duration::milliseconds(400));
        let far = BackoffConfig {
            max_delay_ms: 300,
            ..b
        };
        assert_eq!(far.delay_for(10), chrono::Duration::milliseconds(300));
    }

    #[test]
    fn test_drain_ready_respects_next_at() {
        let clock = VirtualClock::new(epoch());
        let queue: RetryQueue<&str> = RetryQueue::new(backoff());
        queue.push("job-a", &clock, None);

        assert!(queue.drain_ready(&clock).is_empty());

        clock.advance(chrono::Duration::seconds(5));
        let ready = queue.drain_ready(&clock);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].job, "job-a");
    }

    #[test]
    fn test_reschedule_drops_after_max_retries() {
        let clock = VirtualClock::new(epoch());
        let queue: RetryQueue<&str> = RetryQueue::new(backoff());
        queue.push("job-a", &clock, None);
        clock.advance(chrono::Duration::seconds(5));
        let mut ready = queue.drain_ready(&clock);
        let entry = ready.pop().unwrap();

        let first = queue.reschedule(entry, &clock, Some("timeout".into()));
        assert!(first.is_none());
        assert_eq!(queue.len(), 1);

        clock.advance(chrono::Duration::seconds(5));
        let mut ready = queue.drain_ready(&clock);
        let entry = ready.pop().unwrap();
        assert_eq!(entry.attempts, 1);

        let second = queue.reschedule(entry, &clock, Some("timeout".into()));
        assert!(second.is_none());

        clock.advance(chrono::Duration::seconds(5));
        let mut ready = queue.drain_ready(&clock);
        let entry = ready.pop().unwrap();
        assert_eq!(entry.attempts, 2);

        let terminal = queue.reschedule(entry, &clock, Some("timeout".into()));
        assert!(terminal.is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_push_with_backoff_overrides_queue_default() {
        let clock = VirtualClock::new(epoch());
        // Queue default has a high max_retries; the per-call override caps
        // at 1, mirroring a webhook subscription's own `max_retries`.
        let queue: RetryQueue<&str> = RetryQueue::new(backoff());
        let override_backoff = BackoffConfig {
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            max_retries: 1,
        };
        queue.push_with_backoff("job-a", &override_backoff, &clock, None);
        clock.advance(chrono::Duration::seconds(5));
        let mut ready = queue.drain_ready(&clock);
        let entry = ready.pop().unwrap();

        let terminal =
            queue.reschedule_with_backoff(entry, &override_backoff, &clock, Some("err".into()));
        assert!(terminal.is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_heap_orders_by_next_at() {
        let clock = VirtualClock::new(epoch());
        let queue: RetryQueue<&str> = RetryQueue::new(BackoffConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            max_retries: 5,
        });
        queue.push("job-a", &clock, None);
        clock.advance(chrono::Duration::milliseconds(1100));
        let ready = queue.drain_ready(&clock);
        assert_eq!(ready.len(), 1);
    }
}
