//! Daemon runtime: wires storage, engine, and workflows together.
//!
//! Construction order matters: pool and repositories first, then the
//! cache/tracker services, then the executor and router, and only once
//! every workflow is registered do we resume interrupted runs and start
//! the cron scheduler. Events emitted by workflow steps flow back into
//! the router through the channel sink pump.

use std::sync::Arc;

use tokio::task::JoinHandle;
use trainloop_engine::cache::ResponseCache;
use trainloop_engine::event::EventBus;
use trainloop_engine::pricing::PriceTable;
use trainloop_engine::repository::run::RunRepository;
use trainloop_engine::usage::UsageTracker;
use trainloop_engine::workflow::executor::{ChannelSink, StepExecutor};
use trainloop_engine::workflow::retry::RetryPolicy;
use trainloop_engine::workflow::router::{Admission, EventRouter, RouteError};
use trainloop_engine::workflow::scheduler::{CronCallback, CronScheduler, SchedulerError};
use trainloop_infra::sqlite::{
    DatabasePool, SqliteCacheStore, SqliteQuotaStore, SqliteRunRepository,
};
use trainloop_types::config::FabricConfig;
use trainloop_types::event::{Event, FabricEvent};

use crate::collaborators::{LogNotifier, StaticPlanGenerator};
use crate::workflows::{
    BillingWorkflow, GoalNotifyWorkflow, MaintenanceWorkflow, PlanWorkflow, SnapshotWorkflow,
};

/// Capacity of the fabric broadcast bus.
const BUS_CAPACITY: usize = 256;

/// Errors from starting or stopping the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("repository error: {0}")]
    Repository(#[from] trainloop_types::error::RepositoryError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// The assembled fabric: everything `trainloopd` runs.
pub struct Runtime {
    router: Arc<EventRouter<SqliteRunRepository>>,
    scheduler: CronScheduler,
    bus: EventBus,
    pump: JoinHandle<()>,
}

impl Runtime {
    /// Build and start the full runtime against the given database.
    pub async fn start(config: &FabricConfig, database_url: &str) -> Result<Self, RuntimeError> {
        let pool = DatabasePool::new(database_url).await?;
        let repository = Arc::new(SqliteRunRepository::new(pool.clone()));
        let cache_store = Arc::new(SqliteCacheStore::new(pool.clone()));
        let quota_store = Arc::new(SqliteQuotaStore::new(pool));

        let pricing = PriceTable::new(config.pricing.clone());
        let cache = Arc::new(ResponseCache::new(
            cache_store,
            &config.cache,
            pricing.clone(),
        ));
        let tracker = Arc::new(UsageTracker::new(quota_store, config.quota_period_days));

        let bus = EventBus::new(BUS_CAPACITY);
        let (sink, mut emitted) = ChannelSink::new();
        let executor = Arc::new(StepExecutor::new(
            repository.clone(),
            bus.clone(),
            RetryPolicy::new(config.retry),
            Arc::new(sink),
        ));

        let generator = Arc::new(StaticPlanGenerator);
        let notifier = Arc::new(LogNotifier);

        let mut router = EventRouter::new(executor, bus.clone());
        router.register(Arc::new(PlanWorkflow::new(
            cache.clone(),
            tracker.clone(),
            pricing,
            generator,
        )));
        router.register(Arc::new(SnapshotWorkflow::new(cache.clone())));
        router.register(Arc::new(GoalNotifyWorkflow::new(notifier.clone())));
        router.register(Arc::new(BillingWorkflow::new(cache.clone(), notifier)));
        router.register(Arc::new(MaintenanceWorkflow::new(cache, tracker)));
        let router = Arc::new(router);

        // Crash recovery: pick up every non-terminal run before new events
        // can race them.
        let interrupted = repository.list_interrupted_runs().await?;
        if !interrupted.is_empty() {
            tracing::info!(count = interrupted.len(), "resuming interrupted runs");
        }
        for run in interrupted {
            router.resume_run(run);
        }

        let scheduler = CronScheduler::new();
        scheduler.start().await?;
        let mut baselines = Vec::new();
        for (name, schedule) in router.cron_schedules() {
            // The newest persisted cron run is the fire baseline for
            // missed-run detection across restarts.
            let last_fired = repository
                .list_runs(&name, 1)
                .await?
                .first()
                .map(|run| run.created_at);
            baselines.push((name.clone(), schedule.clone(), last_fired));

            let callback: CronCallback = {
                let router = router.clone();
                Arc::new(move |workflow_name, fired_at| {
                    let router = router.clone();
                    Box::pin(async move {
                        let event = Event::cron_tick(workflow_name, fired_at);
                        if let Err(error) = router.route(event).await {
                            tracing::error!(%error, "cron tick routing failed");
                        }
                    })
                })
            };
            scheduler.schedule_workflow(&name, &schedule, callback).await?;
        }

        // Catch up schedules that should have fired while the process was
        // down. One tick per workflow is enough: the work is idempotent
        // housekeeping, not per-fire deliveries.
        for (name, missed) in scheduler.check_missed_runs(&baselines) {
            let Some(fired_at) = missed.last().copied() else {
                continue;
            };
            tracing::info!(workflow = %name, count = missed.len(), "catching up missed schedule");
            if let Err(error) = router.route(Event::cron_tick(name.as_str(), fired_at)).await {
                tracing::error!(workflow = %name, %error, "missed-schedule catch-up failed");
            }
        }

        let pump = {
            let router = router.clone();
            tokio::spawn(async move {
                while let Some(event) = emitted.recv().await {
                    match router.route(event).await {
                        Ok(_) => {}
                        Err(RouteError::Unroutable(name)) => {
                            // Emitted for external consumers; nothing in the
                            // fabric subscribes and that is fine.
                            tracing::debug!(event = %name, "emitted event has no subscriber");
                        }
                        Err(error) => {
                            tracing::error!(%error, "emitted event routing failed");
                        }
                    }
                }
            })
        };

        Ok(Self {
            router,
            scheduler,
            bus,
            pump,
        })
    }

    /// Submit an external event into the fabric.
    pub async fn submit(&self, event: Event) -> Result<Vec<Admission>, RouteError> {
        self.router.route(event).await
    }

    /// Subscribe to the internal lifecycle event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FabricEvent> {
        self.bus.subscribe()
    }

    /// Stop the scheduler and the emit pump. In-flight runs finish on their
    /// own tasks; their durable state lets a restart resume anything cut off.
    pub async fn shutdown(self) {
        if let Err(error) = self.scheduler.stop().await {
            tracing::warn!(%error, "scheduler did not stop cleanly");
        }
        self.pump.abort();
        tracing::info!("runtime stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
