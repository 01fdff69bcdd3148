//! Subscription and schedule storage (§4.9): three collections —
//! `webhooks`, `scripts`, `scheduled_scripts` — with list, filtered list,
//! get-by-id, create, partial update, and delete. Every write path
//! validates and clamps per §3's invariants before persisting.
//!
//! The real document store is out of scope (§1), so the only
//! implementation here is an in-memory `DashMap`-backed one, matching the
//! scope boundary spec.md draws around this component.

use async_trait::async_trait;
use dashmap::DashMap;
use reactor_types::{Event, ScheduleState, ScheduledJob, ScriptSubscription, SubscriptionError, WebhookSubscription};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] SubscriptionError),
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_webhooks(&self) -> Vec<WebhookSubscription>;
    async fn list_webhooks_matching(&self, collection: &str, event: Event) -> Vec<WebhookSubscription>;
    async fn get_webhook(&self, id: Uuid) -> Option<WebhookSubscription>;
    async fn create_webhook(&self, sub: WebhookSubscription) -> Result<WebhookSubscription, StoreError>;
    async fn update_webhook(
        &self,
        id: Uuid,
        patch: WebhookPatch,
    ) -> Result<WebhookSubscription, StoreError>;
    async fn delete_webhook(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_scripts(&self) -> Vec<ScriptSubscription>;
    async fn list_scripts_matching(&self, collection: &str, event: Event) -> Vec<ScriptSubscription>;
    async fn get_script(&self, id: Uuid) -> Option<ScriptSubscription>;
    async fn create_script(&self, sub: ScriptSubscription) -> Result<ScriptSubscription, StoreError>;
    async fn update_script(
        &self,
        id: Uuid,
        patch: ScriptPatch,
    ) -> Result<ScriptSubscription, StoreError>;
    async fn delete_script(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_scheduled(&self) -> Vec<ScheduledJob>;
    async fn get_scheduled(&self, script_id: Uuid) -> Option<ScheduledJob>;
    async fn put_scheduled(&self, job: ScheduledJob) -> ScheduledJob;
    async fn delete_scheduled(&self, script_id: Uuid) -> Result<(), StoreError>;
}

/// Partial update for a webhook subscription; `None` fields are left
/// unchanged.
#[derive(Debug, Default, Clone)]
pub struct WebhookPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<Event>>,
    pub enabled: Option<bool>,
    pub filter: Option<Option<serde_json::Value>>,
    pub exclude_fields: Option<Vec<String>>,
    pub max_requests_per_minute: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub priority: Option<i32>,
    pub extra_headers: Option<Vec<(String, String)>>,
}

impl WebhookPatch {
    fn apply(self, target: &mut WebhookSubscription) {
        if let Some(v) = self.name {
            target.name = v;
        }
        if let Some(v) = self.url {
            target.url = v;
        }
        if let Some(v) = self.events {
            target.events = v;
        }
        if let Some(v) = self.enabled {
            target.enabled = v;
        }
        if let Some(v) = self.filter {
            target.filter = v;
        }
        if let Some(v) = self.exclude_fields {
            target.exclude_fields = v;
        }
        if let Some(v) = self.max_requests_per_minute {
            target.max_requests_per_minute = v;
        }
        if let Some(v) = self.max_retries {
            target.max_retries = v;
        }
        if let Some(v) = self.retry_delay_ms {
            target.retry_delay_ms = v;
        }
        if let Some(v) = self.max_retry_delay_ms {
            target.max_retry_delay_ms = v;
        }
        if let Some(v) = self.priority {
            target.priority = v;
        }
        if let Some(v) = self.extra_headers {
            target.extra_headers = v;
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScriptPatch {
    pub name: Option<String>,
    pub source: Option<String>,
    pub collection: Option<String>,
    pub events: Option<Vec<Event>>,
    pub enabled: Option<bool>,
    pub filter: Option<Option<serde_json::Value>>,
    pub cron_expression: Option<Option<String>>,
    pub max_requests_per_minute: Option<Option<u32>>,
}

impl ScriptPatch {
    fn apply(self, target: &mut ScriptSubscription) {
        if let Some(v) = self.name {
            target.name = v;
        }
        if let Some(v) = self.source {
            target.source = v;
        }
        if let Some(v) = self.collection {
            target.collection = v;
        }
        if let Some(v) = self.events {
            target.events = v;
        }
        if let Some(v) = self.enabled {
            target.enabled = v;
        }
        if let Some(v) = self.filter {
            target.filter = v;
        }
        if let Some(v) = self.cron_expression {
            target.cron_expression = v;
        }
        if let Some(v) = self.max_requests_per_minute {
            target.max_requests_per_minute = v;
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    webhooks: DashMap<Uuid, WebhookSubscription>,
    scripts: DashMap<Uuid, ScriptSubscription>,
    scheduled: DashMap<Uuid, ScheduledJob>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn list_webhooks(&self) -> Vec<WebhookSubscription> {
        self.webhooks.iter().map(|e| e.value().clone()).collect()
    }

    async fn list_webhooks_matching(&self, collection: &str, event: Event) -> Vec<WebhookSubscription> {
        self.webhooks
            .iter()
            .filter(|e| e.value().subscribes_to(collection, event))
            .map(|e| e.value().clone())
            .collect()
    }

    async fn get_webhook(&self, id: Uuid) -> Option<WebhookSubscription> {
        self.webhooks.get(&id).map(|e| e.value().clone())
    }

    async fn create_webhook(&self, mut sub: WebhookSubscription) -> Result<WebhookSubscription, StoreError> {
        sub.validate_and_clamp()?;
        self.webhooks.insert(sub.id, sub.clone());
        Ok(sub)
    }

    async fn update_webhook(
        &self,
        id: Uuid,
        patch: WebhookPatch,
    ) -> Result<WebhookSubscription, StoreError> {
        let mut entry = self.webhooks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply(&mut entry);
        entry.validate_and_clamp()?;
        Ok(entry.clone())
    }

    async fn delete_webhook(&self, id: Uuid) -> Result<(), StoreError> {
        self.webhooks.remove(&id).ok_or(StoreError::NotFound(id))?;
        Ok(())
    }

    async fn list_scripts(&self) -> Vec<ScriptSubscription> {
        self.scripts.iter().map(|e| e.value().clone()).collect()
    }

    async fn list_scripts_matching(&self, collection: &str, event: Event) -> Vec<ScriptSubscription> {
        self.scripts
            .iter()
            .filter(|e| e.value().subscribes_to(collection, event))
            .map(|e| e.value().clone())
            .collect()
    }

    async fn get_script(&self, id: Uuid) -> Option<ScriptSubscription> {
        self.scripts.get(&id).map(|e| e.value().clone())
    }

    async fn create_script(&self, mut sub: ScriptSubscription) -> Result<ScriptSubscription, StoreError> {
        sub.validate_and_clamp()?;
        self.scripts.insert(sub.id, sub.clone());
        Ok(sub)
    }

    async fn update_script(
        &self,
        id: Uuid,
        patch: ScriptPatch,
    ) -> Result<ScriptSubscription, StoreError> {
        let mut entry = self.scripts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply(&mut entry);
        entry.validate_and_clamp()?;
        Ok(entry.clone())
    }

    async fn delete_script(&self, id: Uuid) -> Result<(), StoreError> {
        self.scripts.remove(&id).ok_or(StoreError::NotFound(id))?;
        Ok(())
    }

    async fn list_scheduled(&self) -> Vec<ScheduledJob> {
        self.scheduled.iter().map(|e| e.value().clone()).collect()
    }

    async fn get_scheduled(&self, script_id: Uuid) -> Option<ScheduledJob> {
        self.scheduled.get(&script_id).map(|e| e.value().clone())
    }

    async fn put_scheduled(&self, job: ScheduledJob) -> ScheduledJob {
        self.scheduled.insert(job.script_id, job.clone());
        job
    }

    async fn delete_scheduled(&self, script_id: Uuid) -> Result<(), StoreError> {
        self.scheduled
            .remove(&script_id)
            .ok_or(StoreError::NotFound(script_id))?;
        Ok(())
    }
}

/// Convenience used by C8 on leadership acquisition to install only the
/// schedules that aren't `not-installed`.
pub fn active_schedules(jobs: Vec<ScheduledJob>) -> Vec<ScheduledJob> {
    jobs.into_iter()
        .filter(|j| j.state != ScheduleState::NotInstalled)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook() -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            name: "order-webhook".into(),
            url: "https://example.com/hook".into(),
            collection: "orders".into(),
            events: vec![Event::Update],
            enabled: true,
            filter: None,
            exclude_fields: vec![],
            max_requests_per_minute: 60,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            priority: 0,
            fixed_delay_ms: None,
            extra_headers: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_and_get_webhook() {
        let store = InMemoryStore::new();
        let sub = store.create_webhook(webhook()).await.unwrap();
        let fetched = store.get_webhook(sub.id).await.unwrap();
        assert_eq!(fetched.name, "order-webhook");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_subscription() {
        let store = InMemoryStore::new();
        let mut sub = webhook();
        sub.events.clear();
        let result = store.create_webhook(sub).await;
        assert!(matches!(result, Err(StoreError::Validation(SubscriptionError::NoEvents))));
    }

    #[tokio::test]
    async fn test_list_webhooks_matching_filters_by_collection_event_enabled() {
        let store = InMemoryStore::new();
        store.create_webhook(webhook()).await.unwrap();

        let mut other = webhook();
        other.id = Uuid::new_v4();
        other.collection = "users".into();
        store.create_webhook(other).await.unwrap();

        let mut disabled = webhook();
        disabled.id = Uuid::new_v4();
        disabled.enabled = false;
        store.create_webhook(disabled).await.unwrap();

        let matches = store.list_webhooks_matching("orders", Event::Update).await;
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_update_webhook_applies_partial_patch() {
        let store = InMemoryStore::new();
        let sub = store.create_webhook(webhook()).await.unwrap();

        let updated = store
            .update_webhook(
                sub.id,
                WebhookPatch {
                    max_requests_per_minute: Some(1000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.max_requests_per_minute, 300);
        assert_eq!(updated.name, "order-webhook");
    }

    #[tokio::test]
    async fn test_delete_webhook_then_not_found() {
        let store = InMemoryStore::new();
        let sub = store.create_webhook(webhook()).await.unwrap();
        store.delete_webhook(sub.id).await.unwrap();
        assert!(store.get_webhook(sub.id).await.is_none());
        assert!(matches!(
            store.delete_webhook(sub.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_job_put_and_active_filter() {
        let store = InMemoryStore::new();
        let running = ScheduledJob {
            script_id: Uuid::new_v4(),
            cron_expression: "0 0 * * * *".into(),
            state: ScheduleState::InstalledRunning,
            last_execution_at: None,
            payload: json!({}),
            executions_since_start: 0,
        };
        let not_installed = ScheduledJob {
            script_id: Uuid::new_v4(),
            state: ScheduleState::NotInstalled,
            ..running.clone()
        };
        store.put_scheduled(running.clone()).await;
        store.put_scheduled(not_installed).await;

        let all = store.list_scheduled().await;
        assert_eq!(all.len(), 2);
        let active = active_schedules(all);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].script_id, running.script_id);
    }
}
