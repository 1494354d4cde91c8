//! Shared domain types for Trainloop.
//!
//! This crate contains the core domain types used across the Trainloop
//! fabric: workflow definitions and runs, coaching events, cached responses,
//! usage accounting, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod quota;
pub mod workflow;
