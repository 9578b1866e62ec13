//! Everything one agent's run needs, owned in one place.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::models::{Config, TaskId};
use crate::domain::ports::{ChangeDetector, PhaseRunner, ProcessLiveness, RecoveryPrompt};
use crate::services::{
    CircuitBreaker, LockManager, ModelSelector, RateLimiter, SessionService, TaskQueue,
};

pub const CIRCUIT_FILE: &str = "circuit_breaker.state";
pub const RATE_LOG_FILE: &str = "rate_limit.log";

/// Adapters behind the domain ports.
#[derive(Clone)]
pub struct Adapters {
    pub runner: Arc<dyn PhaseRunner>,
    pub detector: Arc<dyn ChangeDetector>,
    pub liveness: Arc<dyn ProcessLiveness>,
    pub prompt: Arc<dyn RecoveryPrompt>,
}

/// Per-run state shared by the executor and the outer loop.
pub struct OrchestrationContext {
    pub config: Config,
    pub session_id: String,
    pub queue: TaskQueue,
    pub locks: LockManager,
    pub rate_limiter: RateLimiter,
    pub breaker: CircuitBreaker,
    pub sessions: SessionService,
    pub models: ModelSelector,
    pub adapters: Adapters,
    pub token: CancellationToken,
    /// Failed attempts in a row across all phases of this process.
    pub consecutive_failures: u32,
    pub iteration: u32,
}

impl OrchestrationContext {
    /// Wire services for `config.agent_id`. `model` overrides the configured model.
    pub fn new(
        config: Config,
        adapters: Adapters,
        token: CancellationToken,
        model: Option<&str>,
    ) -> Result<Self> {
        let agent_dir = config.agent_state_dir();
        let breaker = CircuitBreaker::load(agent_dir.join(CIRCUIT_FILE), config.circuit_breaker.clone())
            .context("Failed to load circuit breaker state")?;
        let models = ModelSelector::new(&config.agent, model)
            .context("Invalid quota signature in agent configuration")?;

        Ok(Self {
            session_id: Uuid::new_v4().simple().to_string(),
            queue: TaskQueue::new(config.queue_root()),
            locks: LockManager::new(
                config.locks_dir(),
                config.agent_id.clone(),
                config.lock.timeout_secs,
                Arc::clone(&adapters.liveness),
            ),
            rate_limiter: RateLimiter::new(agent_dir.join(RATE_LOG_FILE), &config.rate_limit),
            sessions: SessionService::new(&agent_dir, config.resume),
            breaker,
            models,
            adapters,
            token,
            consecutive_failures: 0,
            iteration: 0,
            config,
        })
    }

    pub fn session_log_dir(&self) -> PathBuf {
        self.config.logs_dir().join(&self.session_id)
    }

    /// `<logs>/<session>/<task>-<phase>-<attempt>.log`
    pub fn attempt_log_path(&self, task_id: &TaskId, phase: &str, attempt: u32) -> PathBuf {
        self.session_log_dir()
            .join(format!("{task_id}-{phase}-{attempt}.log"))
    }
}
