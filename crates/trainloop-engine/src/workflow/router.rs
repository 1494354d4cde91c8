//! Event router: matches events to registered workflows and admits runs
//! through flow control.
//!
//! The registry is statically typed: workflows subscribe to `EventName`
//! variants at registration, and an event no workflow subscribes to is a
//! routing error rather than a silent drop. Cron workflows are matched by
//! name from the synthetic `CronTick` event's entity.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use trainloop_types::event::{DropReason, Event, EventName, FabricEvent};
use trainloop_types::workflow::{Run, TriggerConfig};

use crate::event::EventBus;
use crate::repository::run::RunRepository;

use super::definition::Workflow;
use super::executor::StepExecutor;
use super::flow::FlowController;

/// Errors from routing an event.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no workflow subscribes to event '{0}'")]
    Unroutable(EventName),

    #[error("no cron workflow named '{0}' is registered")]
    UnknownSchedule(String),
}

/// How the router handled one matched workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKind {
    /// A run task was spawned immediately.
    Dispatched,
    /// A run task was spawned behind the debounce gate; it may yet be
    /// superseded.
    Debouncing,
    /// Dropped at admission by the rolling throttle window.
    Throttled,
}

/// Per-workflow admission decision for one routed event.
#[derive(Debug)]
pub struct Admission {
    pub workflow_name: String,
    pub kind: AdmissionKind,
    /// Handle of the spawned run task (None when throttled).
    pub task: Option<JoinHandle<()>>,
}

/// Routes events to workflows through flow control into the executor.
pub struct EventRouter<R: RunRepository + 'static> {
    event_subscribers: HashMap<EventName, Vec<Arc<dyn Workflow>>>,
    cron_targets: HashMap<String, Arc<dyn Workflow>>,
    by_name: HashMap<String, Arc<dyn Workflow>>,
    flow: Arc<FlowController>,
    executor: Arc<StepExecutor<R>>,
    bus: EventBus,
}

impl<R: RunRepository + 'static> EventRouter<R> {
    pub fn new(executor: Arc<StepExecutor<R>>, bus: EventBus) -> Self {
        Self {
            event_subscribers: HashMap::new(),
            cron_targets: HashMap::new(),
            by_name: HashMap::new(),
            flow: Arc::new(FlowController::new()),
            executor,
            bus,
        }
    }

    /// Register a workflow under its declared trigger.
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        let def = workflow.definition();
        self.by_name.insert(def.name.clone(), workflow.clone());
        match &def.trigger {
            TriggerConfig::Event { name } => {
                tracing::info!(workflow = %def.name, event = %name, "workflow subscribed");
                self.event_subscribers
                    .entry(*name)
                    .or_default()
                    .push(workflow);
            }
            TriggerConfig::Cron { schedule } => {
                tracing::info!(workflow = %def.name, %schedule, "cron workflow registered");
                self.cron_targets.insert(def.name.clone(), workflow);
            }
        }
    }

    /// Look up a registered workflow by name.
    ///
    /// Resume goes through the name, not the definition ID: definition IDs
    /// are minted per process, so a run persisted by a previous process
    /// carries an ID no current registration has. The name is stable.
    pub fn workflow_by_name(&self, name: &str) -> Option<Arc<dyn Workflow>> {
        self.by_name.get(name).cloned()
    }

    /// The `(name, schedule)` pairs of all registered cron workflows.
    pub fn cron_schedules(&self) -> Vec<(String, String)> {
        self.cron_targets
            .values()
            .filter_map(|wf| match &wf.definition().trigger {
                TriggerConfig::Cron { schedule } => {
                    Some((wf.definition().name.clone(), schedule.clone()))
                }
                TriggerConfig::Event { .. } => None,
            })
            .collect()
    }

    /// Route an event: fan out to every subscriber, applying throttle at
    /// admission and debounce plus concurrency inside each spawned task.
    pub async fn route(self: &Arc<Self>, event: Event) -> Result<Vec<Admission>, RouteError> {
        let targets: Vec<Arc<dyn Workflow>> = match event.name {
            EventName::CronTick => {
                let target = self
                    .cron_targets
                    .get(&event.entity_id)
                    .cloned()
                    .ok_or_else(|| RouteError::UnknownSchedule(event.entity_id.clone()))?;
                vec![target]
            }
            name => {
                let subscribers = self
                    .event_subscribers
                    .get(&name)
                    .cloned()
                    .unwrap_or_default();
                if subscribers.is_empty() {
                    return Err(RouteError::Unroutable(name));
                }
                subscribers
            }
        };

        let mut admissions = Vec::with_capacity(targets.len());
        for workflow in targets {
            let def = workflow.definition();

            if !self.flow.throttle_admit(def, &event.entity_id) {
                tracing::debug!(
                    workflow = %def.name,
                    event = %event.name,
                    entity = %event.entity_id,
                    "event throttled"
                );
                self.bus.publish(FabricEvent::EventDropped {
                    workflow_name: def.name.clone(),
                    event_name: event.name.as_str().to_string(),
                    reason: DropReason::Throttled,
                });
                admissions.push(Admission {
                    workflow_name: def.name.clone(),
                    kind: AdmissionKind::Throttled,
                    task: None,
                });
                continue;
            }

            let kind = if def.policy.debounce.is_some() {
                AdmissionKind::Debouncing
            } else {
                AdmissionKind::Dispatched
            };
            let workflow_name = def.name.clone();

            let router = self.clone();
            let workflow = workflow.clone();
            let event = event.clone();
            let task = tokio::spawn(async move {
                let def = workflow.definition();
                if !router.flow.debounce_gate(def, &event.entity_id).await {
                    tracing::debug!(
                        workflow = %def.name,
                        entity = %event.entity_id,
                        "debounced event superseded"
                    );
                    router.bus.publish(FabricEvent::EventDropped {
                        workflow_name: def.name.clone(),
                        event_name: event.name.as_str().to_string(),
                        reason: DropReason::Superseded,
                    });
                    return;
                }

                let _permit = router.flow.acquire_slot(def).await;
                if let Err(error) = router.executor.run(workflow.as_ref(), event).await {
                    tracing::error!(workflow = %def.name, %error, "run execution error");
                }
            });

            admissions.push(Admission {
                workflow_name,
                kind,
                task: Some(task),
            });
        }

        Ok(admissions)
    }

    /// Resume one interrupted run under its workflow's concurrency limit.
    ///
    /// Returns `None` when the run's workflow is no longer registered.
    pub fn resume_run(self: &Arc<Self>, run: Run) -> Option<JoinHandle<()>> {
        let Some(workflow) = self.workflow_by_name(&run.workflow_name) else {
            tracing::warn!(
                run_id = %run.id,
                workflow = %run.workflow_name,
                "persisted run matches no registered workflow, leaving it"
            );
            return None;
        };
        let router = self.clone();
        Some(tokio::spawn(async move {
            let def = workflow.definition();
            let _permit = router.flow.acquire_slot(def).await;
            if let Err(error) = router.executor.resume(run.id, workflow.as_ref()).await {
                tracing::error!(run_id = %run.id, workflow = %def.name, %error, "resume failed");
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
