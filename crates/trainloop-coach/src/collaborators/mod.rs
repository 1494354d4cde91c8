//! Collaborator implementations the workflows call out to.
//!
//! The engine defines the `Generator` seam; this module provides the
//! product's implementations of it plus the notification seam, which is
//! purely a domain concern.

pub mod notify;
pub mod plan_generator;

pub use notify::{LogNotifier, Notification, Notifier, NotifyError};
pub use plan_generator::StaticPlanGenerator;
