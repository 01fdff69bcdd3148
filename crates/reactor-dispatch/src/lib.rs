//! Reaction dispatcher (§4.8): on a mutation, loads matching webhook and
//! script subscriptions, evaluates each subscription's filter against the
//! mutation's operand document, and fans out surviving subscriptions to
//! webhook delivery (C6) and script execution (C7) without back-pressuring
//! the caller — `trigger` spawns the fan-out and returns as soon as the
//! load-and-filter pass completes, matching §5's "mutation returns as soon
//! as enqueue completes" ordering rule.

use reactor_ratelimit::{InProcessLimiter, RateLimiter};
use reactor_retry::{BackoffConfig, RetryQueue, SystemClock};
use reactor_sandbox::Sandbox;
use reactor_store::SubscriptionStore;
use reactor_telemetry::metrics::global_metrics;
use reactor_types::{DeliveryAttempt, Filter, Mutation, ScriptSubscription, WebhookSubscription};
use reactor_webhook::WebhookDispatcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn subscription_matches(filter: &Option<serde_json::Value>, operand: Option<&serde_json::Value>) -> bool {
    let Some(filter_value) = filter else {
        return true;
    };
    let Some(compiled) = Filter::from_value(filter_value.clone()) else {
        return true;
    };
    match operand {
        Some(doc) => compiled.matches(doc),
        None => false,
    }
}

#[derive(Clone)]
struct WebhookRetryJob {
    subscription: WebhookSubscription,
    attempt: DeliveryAttempt,
}

#[derive(Clone)]
struct ScriptRetryJob {
    subscription: ScriptSubscription,
    payload: serde_json::Value,
}

pub struct ReactionDispatcher {
    store: Arc<dyn SubscriptionStore>,
    webhook: Arc<WebhookDispatcher>,
    sandbox: Arc<Sandbox>,
    script_limiter: Arc<InProcessLimiter>,
    webhook_retry: Arc<RetryQueue<WebhookRetryJob>>,
    script_retry: Arc<RetryQueue<ScriptRetryJob>>,
    clock: Arc<SystemClock>,
    /// Process-wide fallback backoff (supplies the multiplier every
    /// subscription shares, since spec.md §3 only exposes per-subscription
    /// overrides for `max_retries`/`retry_delay_ms`/`max_retry_delay_ms`,
    /// not the multiplier itself).
    default_webhook_backoff: BackoffConfig,
}

impl ReactionDispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        webhook: Arc<WebhookDispatcher>,
        sandbox: Arc<Sandbox>,
        webhook_backoff: BackoffConfig,
        script_backoff: BackoffConfig,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            store,
            webhook,
            sandbox,
            script_limiter: Arc::new(InProcessLimiter::new(60_000)),
            webhook_retry: Arc::new(RetryQueue::new(webhook_backoff)),
            script_retry: Arc::new(RetryQueue::new(script_backoff)),
            clock: Arc::new(SystemClock),
            default_webhook_backoff: webhook_backoff,
        });
        dispatcher.clone().spawn_sweepers();
        dispatcher
    }

    /// Build the effective backoff for one webhook subscription: its own
    /// `max_retries`/`retry_delay_ms`/`max_retry_delay_ms` overrides
    /// (spec.md §3), the process-wide default's multiplier.
    fn webhook_backoff_for(&self, subscription: &WebhookSubscription) -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: subscription.retry_delay_ms,
            max_delay_ms: subscription.max_retry_delay_ms,
            multiplier: self.default_webhook_backoff.multiplier,
            max_retries: subscription.max_retries,
        }
    }

    fn spawn_sweepers(self: Arc<Self>) {
        let webhook_sweeper = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(5));
            loop {
                tick.tick().await;
                webhook_sweeper.sweep_webhook_retries().await;
            }
        });

        let script_sweeper = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(5));
            loop {
                tick.tick().await;
                script_sweeper.sweep_script_retries().await;
            }
        });
    }

    /// Load matching subscriptions, filter by predicate, and fan out.
    /// Returns immediately once the fan-out has been spawned; does not
    /// await delivery or execution outcomes.
    pub async fn trigger(self: &Arc<Self>, mutation: Mutation) {
        let operand = mutation.operand().cloned();

        let webhook_subs = self
            .store
            .list_webhooks_matching(&mutation.collection, mutation.event)
            .await;
        let script_subs = self
            .store
            .list_scripts_matching(&mutation.collection, mutation.event)
            .await;

        let surviving_webhooks: Vec<WebhookSubscription> = webhook_subs
            .into_iter()
            .filter(|s| subscription_matches(&s.filter, operand.as_ref()))
            .collect();
        let surviving_scripts: Vec<ScriptSubscription> = script_subs
            .into_iter()
            .filter(|s| subscription_matches(&s.filter, operand.as_ref()))
            .collect();

        let metrics = global_metrics();
        metrics.increment_counter(
            "reaction_dispatch_total",
            &[("collection", &mutation.collection), ("event", mutation.event.as_str())],
        );

        for subscription in surviving_webhooks {
            let payload = reactor_webhook::payload::build_payload(Uuid::new_v4(), &subscription, &mutation);
            let attempt = DeliveryAttempt::new(subscription.id, payload);
            let this = self.clone();
            tokio::spawn(async move {
                this.dispatch_webhook(subscription, attempt).await;
            });
        }

        for subscription in surviving_scripts {
            let payload = json!({
                "trigger": "reaction",
                "collection": mutation.collection,
                "event": mutation.event.as_str(),
                "document": operand.clone(),
            });
            let this = self.clone();
            tokio::spawn(async move {
                this.dispatch_script(subscription, payload).await;
            });
        }
    }

    async fn dispatch_webhook(&self, subscription: WebhookSubscription, attempt: DeliveryAttempt) {
        match self.webhook.deliver(&subscription, &attempt).await {
            Ok(()) => {}
            Err(err) if err.is_terminal() => {
                tracing::warn!(subscription_id = %subscription.id, error = %err, "webhook delivery failed terminally");
            }
            Err(err) => {
                tracing::debug!(subscription_id = %subscription.id, error = %err, "webhook delivery failed, scheduling retry");
                let backoff = self.webhook_backoff_for(&subscription);
                self.webhook_retry.push_with_backoff(
                    WebhookRetryJob { subscription, attempt },
                    &backoff,
                    self.clock.as_ref(),
                    Some(err.to_string()),
                );
            }
        }
    }

    async fn sweep_webhook_retries(&self) {
        for entry in self.webhook_retry.drain_ready(self.clock.as_ref()) {
            let mut attempt = entry.job.attempt.clone();
            attempt.attempt_number += 1;
            let subscription = entry.job.subscription.clone();
            let backoff = self.webhook_backoff_for(&subscription);

            match self.webhook.deliver(&subscription, &attempt).await {
                Ok(()) => {}
                Err(err) => {
                    let retry_entry = reactor_retry::RetryEntry {
                        job: WebhookRetryJob {
                            subscription,
                            attempt,
                        },
                        attempts: entry.attempts,
                        next_at: entry.next_at,
                        last_error: entry.last_error,
                    };
                    if let Some(terminal) = self.webhook_retry.reschedule_with_backoff(
                        retry_entry,
                        &backoff,
                        self.clock.as_ref(),
                        Some(err.to_string()),
                    ) {
                        tracing::warn!(
                            subscription_id = %terminal.job.subscription.id,
                            attempts = terminal.attempts,
                            "webhook delivery exhausted retries"
                        );
                    }
                }
            }
        }
    }

    /// Run one execution attempt (rate-limit admission + sandbox run),
    /// returning `Err(message)` on either rate-limit denial or script
    /// failure so the caller can decide push-vs-reschedule.
    async fn attempt_script(&self, subscription: &ScriptSubscription, payload: &serde_json::Value) -> Result<(), String> {
        let limit = subscription.max_requests_per_minute.unwrap_or(60);
        if self
            .script_limiter
            .admit(&subscription.id.to_string(), limit)
            .await
            .is_err()
        {
            tracing::debug!(script_id = %subscription.id, "script execution rate limited, scheduling retry");
            return Err("rate limited".to_string());
        }

        let context = json!({"trigger": "reaction", "scheduled": false});
        match self
            .sandbox
            .execute(subscription.source.clone(), payload.clone(), context)
            .await
        {
            Ok(_) => {
                global_metrics().increment_counter(
                    "script_executions_total",
                    &[("status", "success")],
                );
                Ok(())
            }
            Err(err) => {
                global_metrics()
                    .increment_counter("script_executions_total", &[("status", "failed")]);
                tracing::debug!(script_id = %subscription.id, error = %err, "script execution failed, scheduling retry");
                Err(err.to_string())
            }
        }
    }

    /// First attempt for a freshly-matched subscription (attempts = 0).
    async fn dispatch_script(&self, subscription: ScriptSubscription, payload: serde_json::Value) {
        if let Err(err) = self.attempt_script(&subscription, &payload).await {
            self.script_retry.push(
                ScriptRetryJob { subscription, payload },
                self.clock.as_ref(),
                Some(err),
            );
        }
    }

    /// §4.4/§7(d): script retries back off exponentially and are capped by
    /// `BackoffConfig.max_retries`, not retried forever.
    async fn sweep_script_retries(&self) {
        for entry in self.script_retry.drain_ready(self.clock.as_ref()) {
            let subscription = entry.job.subscription.clone();
            let payload = entry.job.payload.clone();

            if let Err(err) = self.attempt_script(&subscription, &payload).await {
                if let Some(terminal) =
                    self.script_retry
                        .reschedule(entry, self.clock.as_ref(), Some(err))
                {
                    tracing::warn!(
                        script_id = %terminal.job.subscription.id,
                        attempts = terminal.attempts,
                        "script execution exhausted retries"
                    );
                }
            }
        }
    }

    /// Pending webhook/script retry counts, surfaced by C11's
    /// `/cluster/health` endpoint.
    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            webhook_retries: self.webhook_retry.len(),
            script_retries: self.script_retry.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QueueDepths {
    pub webhook_retries: usize,
    pub script_retries: usize,
}
