//! Shared utilities, configuration, and error handling for the lineage workspace
//!
//! This crate provides common functionality used across the domain crates:
//! - Configuration management following 12-factor principles
//! - Error types and handling
//! - State machine errors shared by domain state machines
//! - Tracing subscriber initialisation

pub mod config;
pub mod db;
pub mod error;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use db::RepositoryError;
pub use error::{Error, Result};
pub use state::StateError;
