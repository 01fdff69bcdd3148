//! Cron scheduler (§4.7): leader-gated by default, with per-tick fencing so
//! that at most one instance in the cluster executes a given tick. Falls
//! back to a simpler instance-local mode (no leader gating, no per-tick
//! lock) when distributed coordination is disabled, per the Open Questions
//! resolution recorded in DESIGN.md.
//!
//! The lock-acquire/heartbeat-extend/guaranteed-release shape mirrors the
//! retrieved `kernel::cron::CronService`: acquire a TTL'd lock before doing
//! the protected work, release it in every exit path including the error
//! path, never leave a tick holding the lock past its TTL.

use chrono::Utc;
use cron::Schedule;
use dashmap::DashMap;
use reactor_election::LeadershipEvent;
use reactor_lock::DistributedLock;
use reactor_sandbox::Sandbox;
use reactor_store::SubscriptionStore;
use reactor_types::{ScheduleState, ScheduledJob};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("cron expression does not parse: {0}")]
    InvalidExpression(String),

    #[error("no scheduled job for script {0}")]
    NotFound(Uuid),

    #[error("no script subscription for {0}")]
    ScriptMissing(Uuid),

    #[error("store error: {0}")]
    Store(#[from] reactor_store::StoreError),
}

struct Inner {
    store: Arc<dyn SubscriptionStore>,
    lock: DistributedLock,
    sandbox: Arc<Sandbox>,
    max_execution_time_ms: u64,
    /// `false` when `cluster.cron_leader_election` is disabled: every
    /// instance runs its own schedules unconditionally, with no fencing.
    distributed: bool,
    is_leader: AtomicBool,
    tasks: DashMap<Uuid, JoinHandle<()>>,
}

#[derive(Clone)]
pub struct CronScheduler {
    inner: Arc<Inner>,
}

impl CronScheduler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        lock: DistributedLock,
        sandbox: Arc<Sandbox>,
        max_execution_time_ms: u64,
        distributed: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                lock,
                sandbox,
                max_execution_time_ms,
                distributed,
                is_leader: AtomicBool::new(!distributed),
                tasks: DashMap::new(),
            }),
        }
    }

    fn validate_expr(expr: &str) -> Result<(), CronError> {
        Schedule::from_str(expr).map_err(|e| CronError::InvalidExpression(e.to_string()))?;
        Ok(())
    }

    pub async fn schedule(
        &self,
        script_id: Uuid,
        cron_expression: String,
        payload: Value,
    ) -> Result<ScheduledJob, CronError> {
        Self::validate_expr(&cron_expression)?;
        let job = ScheduledJob {
            script_id,
            cron_expression,
            state: ScheduleState::InstalledRunning,
            last_execution_at: None,
            payload,
            executions_since_start: 0,
        };
        let job = self.inner.store.put_scheduled(job).await;
        if self.inner.is_leader.load(Ordering::Acquire) {
            self.install_one(script_id);
        }
        Ok(job)
    }

    pub async fn unschedule(&self, script_id: Uuid) -> Result<(), CronError> {
        self.stop_one(script_id);
        self.inner.store.delete_scheduled(script_id).await?;
        Ok(())
    }

    pub async fn pause(&self, script_id: Uuid) -> Result<ScheduledJob, CronError> {
        let mut job = self
            .inner
            .store
            .get_scheduled(script_id)
            .await
            .ok_or(CronError::NotFound(script_id))?;
        job.state = ScheduleState::InstalledPaused;
        let job = self.inner.store.put_scheduled(job).await;
        self.stop_one(script_id);
        Ok(job)
    }

    pub async fn resume(&self, script_id: Uuid) -> Result<ScheduledJob, CronError> {
        let mut job = self
            .inner
            .store
            .get_scheduled(script_id)
            .await
            .ok_or(CronError::NotFound(script_id))?;
        job.state = ScheduleState::InstalledRunning;
        let job = self.inner.store.put_scheduled(job).await;
        if self.inner.is_leader.load(Ordering::Acquire) {
            self.install_one(script_id);
        }
        Ok(job)
    }

    pub async fn reschedule(
        &self,
        script_id: Uuid,
        new_expression: String,
    ) -> Result<ScheduledJob, CronError> {
        Self::validate_expr(&new_expression)?;
        let mut job = self
            .inner
            .store
            .get_scheduled(script_id)
            .await
            .ok_or(CronError::NotFound(script_id))?;
        job.cron_expression = new_expression;
        job.state = ScheduleState::InstalledRunning;
        let job = self.inner.store.put_scheduled(job).await;
        self.stop_one(script_id);
        if self.inner.is_leader.load(Ordering::Acquire) {
            self.install_one(script_id);
        }
        Ok(job)
    }

    pub async fn trigger_now(&self, script_id: Uuid) -> Result<(), CronError> {
        self.tick(script_id).await
    }

    pub async fn list(&self) -> Vec<reactor_types::ScheduledView> {
        self.inner
            .store
            .list_scheduled()
            .await
            .iter()
            .map(reactor_types::ScheduledView::from)
            .collect()
    }

    /// Start the instance-local fallback: install every active schedule
    /// immediately and never stop. Used when `distributed` is `false`.
    pub async fn start_local(&self) {
        debug_assert!(!self.inner.distributed);
        self.install_all().await;
    }

    /// Drive leadership gating for the distributed mode: install every
    /// active schedule on `Acquired`, stop them all on `Lost`/`Resigned`.
    pub async fn run_with_leadership(&self, mut events: broadcast::Receiver<LeadershipEvent>) {
        debug_assert!(self.inner.distributed);
        loop {
            match events.recv().await {
                Ok(LeadershipEvent::Acquired) => {
                    self.inner.is_leader.store(true, Ordering::Release);
                    self.install_all().await;
                }
                Ok(LeadershipEvent::Lost) | Ok(LeadershipEvent::Resigned) => {
                    self.inner.is_leader.store(false, Ordering::Release);
                    self.stop_all();
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn install_all(&self) {
        let jobs = reactor_store::active_schedules(self.inner.store.list_scheduled().await);
        for job in jobs {
            self.install_one(job.script_id);
        }
    }

    fn stop_all(&self) {
        let ids: Vec<Uuid> = self.inner.tasks.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.stop_one(id);
        }
    }

    fn install_one(&self, script_id: Uuid) {
        if self.inner.tasks.contains_key(&script_id) {
            return;
        }
        let inner = self.inner.clone_for_task();
        let handle = tokio::spawn(async move { run_schedule_loop(inner, script_id).await });
        self.inner.tasks.insert(script_id, handle);
    }

    fn stop_one(&self, script_id: Uuid) {
        if let Some((_, handle)) = self.inner.tasks.remove(&script_id) {
            handle.abort();
        }
    }

    async fn tick(&self, script_id: Uuid) -> Result<(), CronError> {
        run_tick(&self.inner, script_id).await
    }
}

impl Inner {
    fn clone_for_task(self: &Arc<Self>) -> Arc<Self> {
        self.clone()
    }
}

async fn run_schedule_loop(inner: Arc<Inner>, script_id: Uuid) {
    loop {
        let job = match inner.store.get_scheduled(script_id).await {
            Some(j) if j.state == ScheduleState::InstalledRunning => j,
            _ => return,
        };
        let schedule = match Schedule::from_str(&job.cron_expression) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(%script_id, error = %err, "installed schedule has unparsable cron expression, stopping");
                return;
            }
        };
        let Some(next) = schedule.upcoming(Utc).next() else {
            return;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::from_secs(0));
        tokio::time::sleep(delay).await;

        if let Err(err) = run_tick(&inner, script_id).await {
            tracing::warn!(%script_id, error = %err, "cron tick failed");
        }
    }
}

async fn run_tick(inner: &Arc<Inner>, script_id: Uuid) -> Result<(), CronError> {
    let fence_key = format!("cron_lock:{}", script_id);

    if inner.distributed {
        let token = match inner.lock.acquire(&fence_key, inner.max_execution_time_ms).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!(%script_id, "cron tick fenced out, another instance is running it");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(%script_id, error = %err, "cron fence acquire failed against coordination store");
                return Ok(());
            }
        };

        let result = execute_tick(inner, script_id).await;
        inner.lock.release(&fence_key, &token).await;
        result
    } else {
        execute_tick(inner, script_id).await
    }
}

async fn execute_tick(inner: &Arc<Inner>, script_id: Uuid) -> Result<(), CronError> {
    let mut job = inner
        .store
        .get_scheduled(script_id)
        .await
        .ok_or(CronError::NotFound(script_id))?;
    let script = inner
        .store
        .get_script(script_id)
        .await
        .ok_or(CronError::ScriptMissing(script_id))?;

    let execution_time = Utc::now();
    let context = json!({
        "trigger": "cron",
        "scheduled": true,
        "execution_time": execution_time.to_rfc3339(),
        "cron_expression": job.cron_expression,
        "distributed_execution": inner.distributed,
    });

    match inner
        .sandbox
        .execute(script.source.clone(), job.payload.clone(), context)
        .await
    {
        Ok(result) => {
            tracing::debug!(%script_id, console_lines = result.console.len(), "cron tick executed");
        }
        Err(err) => {
            tracing::warn!(%script_id, error = %err, "cron tick execution failed");
        }
    }

    job.last_execution_at = Some(execution_time);
    job.executions_since_start += 1;
    inner.store.put_scheduled(job).await;
    Ok(())
}
