//! Infrastructure layer module
//!
//! Adapters behind the domain ports plus the ambient plumbing:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Key/value state files with atomic replace
//! - Process liveness, agent subprocess, git change detection
//! - Terminal prompts
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod agent_cli;
pub mod config;
pub mod git;
pub mod logging;
pub mod process;
pub mod prompt;
pub mod state_file;

pub use agent_cli::AgentCliRunner;
pub use git::GitChangeDetector;
pub use process::SignalProbe;
pub use prompt::{AutoApprove, TerminalPrompt};
