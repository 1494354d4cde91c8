//! Observability plumbing for Trainloop.

pub mod tracing_setup;
