use std::sync::Arc;

use reactor_coordination::CoordinationClient;
use reactor_cron::CronScheduler;
use reactor_dispatch::ReactionDispatcher;
use reactor_election::LeaderElection;
use reactor_lock::DistributedLock;
use reactor_store::SubscriptionStore;

/// Shared state injected into every operator-surface handler, grounded on
/// the retrieved `at-bridge::http_api::state::ApiState` pattern of one
/// struct bundling every subsystem a route needs, wrapped in a single `Arc`.
pub struct ApiState {
    pub store: Arc<dyn SubscriptionStore>,
    pub cron: CronScheduler,
    pub election: LeaderElection,
    pub lock: DistributedLock,
    pub coordination: CoordinationClient,
    pub dispatch: Arc<ReactionDispatcher>,
    pub instance_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        cron: CronScheduler,
        election: LeaderElection,
        lock: DistributedLock,
        coordination: CoordinationClient,
        dispatch: Arc<ReactionDispatcher>,
        instance_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            cron,
            election,
            lock,
            coordination,
            dispatch,
            instance_id: instance_id.into(),
            started_at: chrono::Utc::now(),
        })
    }
}
