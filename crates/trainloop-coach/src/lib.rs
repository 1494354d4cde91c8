//! Coaching domain layer for Trainloop.
//!
//! This crate owns everything specific to the fitness product: the domain
//! math (prescribed weights, recovery windows), the collaborator
//! implementations (plan generator, notifier), the workflow definitions
//! that run on the engine, and the `trainloopd` daemon that wires it all
//! together.

pub mod collaborators;
pub mod domain;
pub mod runtime;
pub mod workflows;
