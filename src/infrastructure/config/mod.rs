//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - Global and project YAML files
//! - Environment variable overrides
//! - Command-line overrides
//! - Configuration validation

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, ConfigOverrides};
