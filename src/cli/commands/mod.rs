//! Subcommand implementations.

pub mod recover;
pub mod reset;
pub mod run;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::application::Adapters;
use crate::domain::models::Config;
use crate::domain::ports::RecoveryPrompt;
use crate::infrastructure::config::{ConfigLoader, ConfigOverrides};
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::infrastructure::{AgentCliRunner, AutoApprove, GitChangeDetector, SignalProbe, TerminalPrompt};

/// Load configuration and install the logger.
///
/// The returned logger must be held for the life of the command so the file
/// writer keeps flushing.
pub fn bootstrap(overrides: &ConfigOverrides) -> Result<(Config, LoggerImpl)> {
    let config = ConfigLoader::load(overrides).context("Failed to load configuration")?;
    let logger = LoggerImpl::init(&LogConfig::from_config(&config))?;
    Ok((config, logger))
}

/// Production adapters for `config`.
pub fn adapters(config: &Config, approve_all: bool) -> Adapters {
    let prompt: Arc<dyn RecoveryPrompt> = if approve_all {
        Arc::new(AutoApprove)
    } else {
        Arc::new(TerminalPrompt::new())
    };
    Adapters {
        runner: Arc::new(AgentCliRunner::new(&config.agent)),
        detector: Arc::new(GitChangeDetector::excluding([&config.state_dir, &config.tasks_dir])),
        liveness: Arc::new(SignalProbe),
        prompt,
    }
}
