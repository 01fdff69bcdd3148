//! Request/response DTOs for the operator surface (§6), kept separate from
//! `reactor_types`'s persisted record shapes so that wire-format concerns
//! (which fields are optional on create vs. patch) don't leak into the
//! domain types other components share.

use reactor_types::Event;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
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
    #[serde(default)]
    pub max_requests_per_minute: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
}

impl From<CreateWebhookRequest> for reactor_types::WebhookSubscription {
    fn from(req: CreateWebhookRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: req.name,
            url: req.url,
            collection: req.collection,
            events: req.events,
            enabled: req.enabled,
            filter: req.filter,
            exclude_fields: req.exclude_fields,
            max_requests_per_minute: req.max_requests_per_minute.unwrap_or(60),
            max_retries: req.max_retries.unwrap_or(3),
            retry_delay_ms: req.retry_delay_ms.unwrap_or(1_000),
            max_retry_delay_ms: req.max_retry_delay_ms.unwrap_or(60_000),
            priority: req.priority,
            fixed_delay_ms: None,
            extra_headers: req.extra_headers,
        }
    }
}

/// Partial update; every field left `None` (or omitted) keeps its current
/// value. `#[serde(default)]` lets callers PATCH a single field.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateWebhookRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<Event>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub filter: Option<Option<Value>>,
    #[serde(default)]
    pub exclude_fields: Option<Vec<String>>,
    #[serde(default)]
    pub max_requests_per_minute: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub extra_headers: Option<Vec<(String, String)>>,
}

impl From<UpdateWebhookRequest> for reactor_store::WebhookPatch {
    fn from(req: UpdateWebhookRequest) -> Self {
        Self {
            name: req.name,
            url: req.url,
            events: req.events,
            enabled: req.enabled,
            filter: req.filter,
            exclude_fields: req.exclude_fields,
            max_requests_per_minute: req.max_requests_per_minute,
            max_retries: req.max_retries,
            retry_delay_ms: req.retry_delay_ms,
            max_retry_delay_ms: req.max_retry_delay_ms,
            priority: req.priority,
            extra_headers: req.extra_headers,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateScriptRequest {
    pub name: String,
    pub source: String,
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

impl From<CreateScriptRequest> for reactor_types::ScriptSubscription {
    fn from(req: CreateScriptRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: req.name,
            source: req.source,
            collection: req.collection,
            events: req.events,
            enabled: req.enabled,
            filter: req.filter,
            cron_expression: req.cron_expression,
            max_requests_per_minute: req.max_requests_per_minute,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateScriptRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<Event>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub filter: Option<Option<Value>>,
    #[serde(default)]
    pub cron_expression: Option<Option<String>>,
    #[serde(default)]
    pub max_requests_per_minute: Option<Option<u32>>,
}

impl From<UpdateScriptRequest> for reactor_store::ScriptPatch {
    fn from(req: UpdateScriptRequest) -> Self {
        Self {
            name: req.name,
            source: req.source,
            collection: req.collection,
            events: req.events,
            enabled: req.enabled,
            filter: req.filter,
            cron_expression: req.cron_expression,
            max_requests_per_minute: req.max_requests_per_minute,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub cron_expression: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub cron_expression: String,
}
