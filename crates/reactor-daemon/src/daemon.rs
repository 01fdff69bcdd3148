//! Wires every component (C1–C11) into a single running process: one
//! `Daemon` per instance, constructed from `Config`, spawning the
//! leadership/cron/API loops and running until shutdown fires.
//!
//! The bootstrap shape — bind listener, spawn `axum::serve`, run background
//! loops inline until shutdown, abort the server task, return — mirrors
//! the retrieved `at_daemon::daemon::Daemon::run_with_listener`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use reactor_config::Config;
use reactor_coordination::CoordinationClient;
use reactor_cron::CronScheduler;
use reactor_dispatch::ReactionDispatcher;
use reactor_election::LeaderElection;
use reactor_lock::DistributedLock;
use reactor_retry::BackoffConfig;
use reactor_sandbox::Sandbox;
use reactor_store::{InMemoryStore, SubscriptionStore};
use reactor_webhook::WebhookDispatcher;

use reactor_api::ApiState;

use crate::shutdown::ShutdownSignal;

pub struct Daemon {
    config: Config,
    shutdown: ShutdownSignal,
    election: LeaderElection,
    cron: CronScheduler,
    dispatch: Arc<ReactionDispatcher>,
    coordination: CoordinationClient,
    api_state: Arc<ApiState>,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        let shutdown = ShutdownSignal::new();

        let coordination = CoordinationClient::new(&config.coordination_store_url.0)
            .context("failed to build coordination client")?;
        let lock = DistributedLock::new(coordination.clone(), config.instance_id.clone());

        let ttl_ms = config.scaling.lock_ttl_secs * 1_000;
        let renewal_ms = config.scaling.leadership_renewal_interval_secs * 1_000;
        let election = LeaderElection::new(lock.clone(), "cron", ttl_ms, renewal_ms)
            .context("leadership renewal interval must be at most half the lock TTL")?;

        let store: Arc<dyn SubscriptionStore> = Arc::new(InMemoryStore::new());

        let sandbox = Arc::new(Sandbox::with_api_base_url(
            Duration::from_secs(config.script.execution.timeout_secs),
            config.script.api_base_url.clone(),
        ));

        let max_execution_time_ms = config.scaling.max_script_execution_time_secs * 1_000;
        let cron = CronScheduler::new(
            store.clone(),
            lock.clone(),
            sandbox.clone(),
            max_execution_time_ms,
            config.cluster.cron_leader_election,
        );

        let webhook = Arc::new(WebhookDispatcher::new(
            coordination.clone(),
            lock.clone(),
            config.instance_id.clone(),
            Duration::from_secs(config.webhook.timeout_secs),
            ttl_ms,
        ));

        let webhook_backoff = BackoffConfig {
            base_delay_ms: config.webhook.retry_delay_ms,
            max_delay_ms: config.webhook.max_retry_delay_ms,
            multiplier: config.webhook.rate_limit.backoff_multiplier,
            max_retries: config.webhook.max_retries,
        };
        let script_backoff = BackoffConfig {
            base_delay_ms: config.webhook.retry_delay_ms,
            max_delay_ms: config.webhook.max_retry_delay_ms,
            multiplier: config.webhook.rate_limit.backoff_multiplier,
            max_retries: config.webhook.max_retries,
        };
        let dispatch = ReactionDispatcher::new(
            store.clone(),
            webhook,
            sandbox,
            webhook_backoff,
            script_backoff,
        );

        let api_state = ApiState::new(
            store,
            cron.clone(),
            election.clone(),
            lock.clone(),
            coordination.clone(),
            dispatch.clone(),
            config.instance_id.clone(),
        );

        Ok(Self {
            config,
            shutdown,
            election,
            cron,
            dispatch,
            coordination,
            api_state,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the operator API on `config.api.host`/`port` and run until
    /// shutdown.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.api.host, self.config.api.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind operator API on {bind_addr}"))?;
        self.run_with_listener(listener).await
    }

    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let api_port = listener.local_addr()?.port();
        info!(api_port, "operator API listener bound");

        let api_router = reactor_api::api_router_with_auth(
            self.api_state.clone(),
            self.config.api.admin_bearer_token.clone(),
        );
        let api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, api_router).await {
                error!(error = %e, "operator API server error");
            }
        });

        let election_handle = tokio::spawn({
            let election = self.election.clone();
            let shutdown_rx = self.shutdown.subscribe();
            async move {
                election.run(shutdown_rx).await;
            }
        });

        if self.config.cluster.cron_leader_election {
            tokio::spawn({
                let cron = self.cron.clone();
                let leadership_rx = self.election.subscribe();
                async move {
                    cron.run_with_leadership(leadership_rx).await;
                }
            });
        } else {
            self.cron.start_local().await;
        }

        info!(instance_id = %self.config.instance_id, "reactor daemon ready");

        self.run_housekeeping_loop().await;

        api_handle.abort();
        election_handle.abort();
        Ok(())
    }

    /// Periodic observability tick: logs queue depth and lock-store
    /// reachability on `scaling.lock_cleanup_interval_secs`, the daemon's
    /// analog of a patrol loop. Distributed locks expire on their own TTL
    /// in the coordination store, so there is no stale-lock sweep to run —
    /// this loop only reports.
    async fn run_housekeeping_loop(&self) {
        let mut tick = tokio::time::interval(Duration::from_secs(
            self.config.scaling.lock_cleanup_interval_secs,
        ));
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let queue = self.dispatch.queue_depths();
                    let coordination_ok = self.coordination.get("__health_check__").await.is_ok();
                    info!(
                        webhook_retries = queue.webhook_retries,
                        script_retries = queue.script_retries,
                        coordination_ok,
                        is_leader = self.election.is_leader(),
                        "housekeeping tick"
                    );
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown received, draining housekeeping loop");
                    break;
                }
            }
        }
    }
}
