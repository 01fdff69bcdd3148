//! Persisted subscription and schedule record shapes (spec.md §3), shared
//! by `reactor-store` (C10), `reactor-dispatch` (C9), `reactor-webhook`
//! (C6), and `reactor-cron` (C8).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::Event;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("webhook subscription must subscribe to at least one event")]
    NoEvents,
    #[error("webhook target URL is not syntactically valid: {0}")]
    InvalidUrl(String),
    #[error("cron expression does not parse: {0}")]
    InvalidCron(String),
}

/// Clamp a rate limit (requests/minute) into spec.md §3's `[1, 300]` bound.
pub fn clamp_rate_limit(value: u32) -> u32 {
    value.clamp(1, 300)
}

/// Clamp retry count into spec.md §3's `[0, 10]` bound.
pub fn clamp_max_retries(value: u32) -> u32 {
    value.clamp(0, 10)
}

/// Clamp base delay (ms) into spec.md §3's `[100, 10_000]` bound.
pub fn clamp_base_delay_ms(value: u64) -> u64 {
    value.clamp(100, 10_000)
}

/// Clamp max delay (ms) into spec.md §3's `[1_000, 300_000]` bound.
pub fn clamp_max_delay_ms(value: u64) -> u64 {
    value.clamp(1_000, 300_000)
}

/// A persisted webhook subscription (spec.md §3 "Webhook Subscription").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub collection: String,
    pub events: Vec<Event>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    #[serde(default = "default_rpm")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub fixed_delay_ms: Option<u64>,
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
}

fn default_true() -> bool {
    true
}
fn default_rpm() -> u32 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl WebhookSubscription {
    /// Validate invariants and clamp numeric bounds per spec.md §3. Called
    /// on every create/update by C10.
    pub fn validate_and_clamp(&mut self) -> Result<(), SubscriptionError> {
        if self.events.is_empty() {
            return Err(SubscriptionError::NoEvents);
        }
        url::Url::parse(&self.url).map_err(|e| SubscriptionError::InvalidUrl(e.to_string()))?;

        self.max_requests_per_minute = clamp_rate_limit(self.max_requests_per_minute);
        self.max_retries = clamp_max_retries(self.max_retries);
        self.retry_delay_ms = clamp_base_delay_ms(self.retry_delay_ms);
        self.max_retry_delay_ms = clamp_max_delay_ms(self.max_retry_delay_ms);
        Ok(())
    }

    pub fn subscribes_to(&self, collection: &str, event: Event) -> bool {
        self.enabled && self.collection == collection && self.events.contains(&event)
    }
}

/// A persisted script subscription (spec.md §3 "Script Subscription").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSubscription {
    pub id: Uuid,
    pub name: String,
    pub source: String,
    /// Empty string means "all collections", per spec.md §3.
    #[serde(default)]
    pub collection: String,
    pub events: Vec<Event>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub max_requests_per_minute: Option<u32>,
}

impl ScriptSubscription {
    pub fn validate_and_clamp(&mut self) -> Result<(), SubscriptionError> {
        if let Some(expr) = &self.cron_expression {
            expr.parse::<cron::Schedule>()
                .map_err(|e| SubscriptionError::InvalidCron(e.to_string()))?;
        }
        if let Some(rpm) = self.max_requests_per_minute {
            self.max_requests_per_minute = Some(clamp_rate_limit(rpm));
        }
        Ok(())
    }

    pub fn subscribes_to(&self, collection: &str, event: Event) -> bool {
        self.enabled
            && (self.collection.is_empty() || self.collection == collection)
            && self.events.contains(&event)
    }
}

/// Run state for a scheduled script, per spec.md §4.7's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleState {
    InstalledRunning,
    InstalledPaused,
    NotInstalled,
}

/// The persisted scheduled-job record (spec.md §3 "Scheduled Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub script_id: Uuid,
    pub cron_expression: String,
    pub state: ScheduleState,
    #[serde(default)]
    pub last_execution_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub payload: Value,
    /// Monotonic since this process started, per the Open Question
    /// resolution in spec.md §9 / SPEC_FULL.md.
    #[serde(default)]
    pub executions_since_start: u64,
}

/// A read-only projection of a `ScheduledJob` for the operator surface's
/// `list()` contract (spec.md §4.7).
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledView {
    pub script_id: Uuid,
    pub cron_expression: String,
    pub state: ScheduleState,
    pub last_execution_at: Option<chrono::DateTime<chrono::Utc>>,
    pub executions_since_start: u64,
}

impl From<&ScheduledJob> for ScheduledView {
    fn from(job: &ScheduledJob) -> Self {
        Self {
            script_id: job.script_id,
            cron_expression: job.cron_expression.clone(),
            state: job.state,
            last_execution_at: job.last_execution_at,
            executions_since_start: job.executions_since_start,
        }
    }
}

/// A single webhook delivery attempt (spec.md §3 "Delivery Attempt").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub delivery_id: Uuid,
    pub subscription_id: Uuid,
    pub payload: Value,
    pub attempt_number: u32,
    pub next_attempt_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl DeliveryAttempt {
    pub fn new(subscription_id: Uuid, payload: Value) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            subscription_id,
            payload,
            attempt_number: 1,
            next_attempt_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    /// `attempt_number <= max_retries + 1` (spec.md §3 invariant).
    pub fn is_terminal(&self, max_retries: u32) -> bool {
        self.attempt_number > max_retries
    }
}
