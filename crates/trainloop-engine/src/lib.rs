//! Workflow engine and repository trait definitions for Trainloop.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the engine logic itself: the step executor with its
//! durable memoization ledger, retry policy, flow control, event routing,
//! cron scheduling, the two-tier response cache, and usage accounting.
//!
//! Depends only on `trainloop-types` -- never on `trainloop-infra` or any
//! database/IO crate.

pub mod cache;
pub mod event;
pub mod generate;
pub mod pricing;
pub mod repository;
pub mod usage;
pub mod workflow;
