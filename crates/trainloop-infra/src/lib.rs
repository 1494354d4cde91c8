//! Infrastructure implementations for Trainloop.
//!
//! Implements the repository traits defined in `trainloop-engine` with
//! SQLite via sqlx, and loads the `trainloop.toml` configuration file.
//! Nothing above this crate touches SQL.

pub mod config;
pub mod sqlite;
