//! Workflow engine: definitions, execution, flow control, routing, scheduling.
//!
//! The pieces compose left to right: a `CronScheduler` or external caller
//! submits an `Event` to the `EventRouter`, which consults the
//! `FlowController` (throttle, debounce, concurrency) before handing the
//! matched `Workflow` to the `StepExecutor`, which drives steps through the
//! durable `StepLedger` under the `RetryPolicy`.

pub mod context;
pub mod definition;
pub mod executor;
pub mod flow;
pub mod ledger;
pub mod retry;
pub mod router;
pub mod scheduler;

pub use context::RunContext;
pub use definition::{Step, StepKind, Workflow};
pub use executor::{StepExecutor, RunOutcome};
pub use flow::FlowController;
pub use ledger::StepLedger;
pub use retry::RetryPolicy;
pub use router::EventRouter;
pub use scheduler::CronScheduler;
