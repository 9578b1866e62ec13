//! `taskforge reset`

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::application::context::CIRCUIT_FILE;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{CircuitState, Config};
use crate::infrastructure::config::ConfigOverrides;
use crate::services::{CircuitBreaker, SessionService};

#[derive(Debug, Serialize)]
pub struct ResetReport {
    pub agent_id: String,
    pub previous: CircuitState,
    pub state: CircuitState,
}

impl CommandOutput for ResetReport {
    fn to_human(&self) -> String {
        format!(
            "Circuit breaker for agent {}: {} -> {}",
            self.agent_id, self.previous, self.state
        )
    }
}

/// Close the breaker and clear the health failure count for `config.agent_id`.
pub fn reset_breaker(config: &Config) -> Result<ResetReport> {
    let agent_dir = config.agent_state_dir();
    let mut breaker = CircuitBreaker::load(agent_dir.join(CIRCUIT_FILE), config.circuit_breaker.clone())
        .context("Failed to read circuit breaker state")?;
    let previous = breaker.state();
    breaker.reset()?;

    // A run reopens the breaker while the health failure count is at threshold.
    SessionService::new(&agent_dir, config.resume).record_success("circuit breaker reset by operator")?;
    info!(agent_id = %config.agent_id, %previous, "circuit breaker reset");

    Ok(ResetReport {
        agent_id: config.agent_id.clone(),
        previous,
        state: breaker.state(),
    })
}

pub fn execute(overrides: ConfigOverrides, json_mode: bool) -> Result<()> {
    let (config, _logger) = super::bootstrap(&overrides)?;
    let report = reset_breaker(&config)?;
    output(&report, json_mode);
    Ok(())
}
