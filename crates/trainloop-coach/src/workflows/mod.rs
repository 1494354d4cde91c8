//! The product's workflow definitions.
//!
//! Each workflow is a struct holding its declarative definition plus the
//! collaborators its steps capture. Business logic lives in the step
//! bodies; durability, retry, and flow control are the engine's job.

pub mod billing;
pub mod maintenance;
pub mod notify;
pub mod plan;
pub mod snapshot;

pub use billing::BillingWorkflow;
pub use maintenance::MaintenanceWorkflow;
pub use notify::GoalNotifyWorkflow;
pub use plan::PlanWorkflow;
pub use snapshot::SnapshotWorkflow;
