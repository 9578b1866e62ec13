//! Domain layer for the taskforge orchestrator
//!
//! Core records, configuration, and the port traits that infrastructure
//! adapters implement. Nothing in here touches a process or the network.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
