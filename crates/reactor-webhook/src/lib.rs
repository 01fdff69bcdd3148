//! Webhook delivery pipeline (§4.5): fencing per delivery attempt, rate
//! limiting keyed by target URL, HTTP dispatch with header construction and
//! terminal/retryable failure classification, a per-target circuit breaker,
//! and a rolling failure list for introspection.

pub mod circuit_breaker;
pub mod payload;

use chrono::Utc;
use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use reactor_coordination::CoordinationClient;
use reactor_lock::DistributedLock;
use reactor_ratelimit::{DistributedLimiter, RateLimiter};
use reactor_telemetry::metrics::global_metrics;
use reactor_types::{DeliveryAttempt, WebhookSubscription};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const WEBHOOK_RATE_LIMIT_KEY_PREFIX: &str = "webhook_ratelimit";
const MAX_FAILURE_HISTORY: usize = 100;
const FAILURE_HISTORY_TTL_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("already processing this delivery attempt elsewhere")]
    AlreadyProcessing,

    #[error("rate limit exceeded for target")]
    RateLimited,

    #[error("circuit open for target")]
    CircuitOpen,

    #[error("http transport error: {0}")]
    Transport(String),

    #[error("non-2xx response: status {0}")]
    NonSuccessStatus(u16),
}

impl DeliveryError {
    /// §4.5: non-2xx is terminal for `{400,401,403,404,410,422}`, retryable
    /// otherwise; transport errors, rate limiting, and fencing misses are
    /// all retryable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryError::NonSuccessStatus(400)
                | DeliveryError::NonSuccessStatus(401)
                | DeliveryError::NonSuccessStatus(403)
                | DeliveryError::NonSuccessStatus(404)
                | DeliveryError::NonSuccessStatus(410)
                | DeliveryError::NonSuccessStatus(422)
        )
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureRecord {
    pub delivery_id: Uuid,
    pub attempt_number: u32,
    pub error: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
    lock: DistributedLock,
    limiter: DistributedLimiter,
    breakers: CircuitBreakerRegistry,
    store: CoordinationClient,
    instance_id: String,
    fencing_ttl_ms: u64,
}

impl WebhookDispatcher {
    pub fn new(
        store: CoordinationClient,
        lock: DistributedLock,
        instance_id: impl Into<String>,
        http_timeout: Duration,
        fencing_ttl_ms: u64,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(http_timeout)
                .build()
                .expect("reqwest client builds with static config"),
            lock,
            limiter: DistributedLimiter::new(store.clone(), 60_000, WEBHOOK_RATE_LIMIT_KEY_PREFIX),
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig {
                call_timeout: http_timeout,
                ..CircuitBreakerConfig::default()
            }),
            store,
            instance_id: instance_id.into(),
            fencing_ttl_ms,
        }
    }

    /// Attempt one delivery. Acquires the per-(subscription, delivery)
    /// fencing lock first; if another instance already holds it, returns
    /// `AlreadyProcessing` and leaves the attempt for the caller to retry
    /// once the lock's TTL lapses.
    pub async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        attempt: &DeliveryAttempt,
    ) -> Result<(), DeliveryError> {
        let fence_key = format!("webhook:{}:{}", subscription.id, attempt.delivery_id);
        let token = self
            .lock
            .acquire(&fence_key, self.fencing_ttl_ms)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .ok_or(DeliveryError::AlreadyProcessing)?;

        let result = self.deliver_inner(subscription, attempt).await;

        self.lock.release(&fence_key, &token).await;
        result
    }

    async fn deliver_inner(
        &self,
        subscription: &WebhookSubscription,
        attempt: &DeliveryAttempt,
    ) -> Result<(), DeliveryError> {
        let rate_key = DistributedLimiter::encode_key(&subscription.url);
        self.limiter
            .admit(&rate_key, subscription.max_requests_per_minute)
            .await
            .map_err(|_| DeliveryError::RateLimited)?;

        let breaker = self.breakers.get(&subscription.url);
        let url = subscription.url.clone();
        let payload = attempt.payload.clone();
        let headers = self.build_headers(subscription, attempt);
        let http = self.http.clone();

        let outcome = breaker
            .call(|| async move {
                let mut req = http.post(&url).json(&payload);
                for (name, value) in &headers {
                    req = req.header(name, value);
                }
                req.send().await
            })
            .await;

        let metrics = global_metrics();
        match outcome {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    metrics.increment_counter(
                        "webhook_deliveries_total",
                        &[("status", "success")],
                    );
                    Ok(())
                } else {
                    metrics
                        .increment_counter("webhook_deliveries_total", &[("status", "failed")]);
                    let err = DeliveryError::NonSuccessStatus(status.as_u16());
                    self.record_failure(subscription.id, attempt, &err).await;
                    Err(err)
                }
            }
            Err(err) => {
                metrics.increment_counter("webhook_deliveries_total", &[("status", "failed")]);
                let delivery_err = match err {
                    circuit_breaker::CircuitBreakerError::Open => DeliveryError::CircuitOpen,
                    other => DeliveryError::Transport(other.to_string()),
                };
                self.record_failure(subscription.id, attempt, &delivery_err)
                    .await;
                Err(delivery_err)
            }
        }
    }

    fn build_headers(
        &self,
        subscription: &WebhookSubscription,
        attempt: &DeliveryAttempt,
    ) -> Vec<(String, String)> {
        let mut headers = vec![
            ("User-Agent".to_string(), "reactor-webhook/1".to_string()),
            ("X-Webhook-ID".to_string(), subscription.id.to_string()),
            ("X-Webhook-Name".to_string(), subscription.name.clone()),
            ("X-Delivery-ID".to_string(), attempt.delivery_id.to_string()),
            ("X-Instance-ID".to_string(), self.instance_id.clone()),
            (
                "X-Attempt-Number".to_string(),
                attempt.attempt_number.to_string(),
            ),
            (
                "X-Delivery-Timestamp".to_string(),
                Utc::now().to_rfc3339(),
            ),
        ];
        headers.extend(subscription.extra_headers.iter().cloned());
        headers
    }

    async fn record_failure(
        &self,
        subscription_id: Uuid,
        attempt: &DeliveryAttempt,
        err: &DeliveryError,
    ) {
        let key = format!("webhook_failures:{}", subscription_id);
        let existing = self.store.get(&key).await.ok().flatten();
        let mut history: VecDeque<FailureRecord> = existing
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        history.push_back(FailureRecord {
            delivery_id: attempt.delivery_id,
            attempt_number: attempt.attempt_number,
            error: err.to_string(),
            occurred_at: Utc::now(),
        });
        while history.len() > MAX_FAILURE_HISTORY {
            history.pop_front();
        }

        if let Ok(serialized) = serde_json::to_string(&history) {
            let _ = self
                .store
                .set_px(&key, &serialized, FAILURE_HISTORY_TTL_MS)
                .await;
        }
    }
}

/// Shared handle, cloned into dispatch worker tasks.
pub type SharedDispatcher = Arc<WebhookDispatcher>;
