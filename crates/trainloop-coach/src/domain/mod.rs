//! Domain math invoked inside workflow steps.
//!
//! Ordinary computations with no engine coupling: step bodies call these
//! and memoize the results like any other output.

pub mod recovery;
pub mod rx_weight;

pub use recovery::{MuscleGroup, RecoveryWindow};
pub use rx_weight::{PrSample, prescribe};
