//! Taskforge - filesystem-coordinated task orchestration for coding agents
//!
//! Several agents share one task queue on disk (`blocked/`, `todo/`,
//! `doing/`, `done/`). Each agent claims tasks through lock files, runs them
//! through a pipeline of phases with retry and backoff, respects an hourly
//! call quota, and stops itself when its work stops making progress.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): state records, configuration, and port traits
//! - **Service Layer** (`services`): locks, queue, selection, quota, breaker, sessions
//! - **Application Layer** (`application`): retry executor and the outer run loop
//! - **Infrastructure Layer** (`infrastructure`): config, logging, subprocess and git adapters
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use taskforge::application::{run, OrchestrationContext};
//!
//! let mut ctx = OrchestrationContext::new(config, adapters, token, None)?;
//! let summary = run(&mut ctx, None).await?;
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

#[doc(hidden)]
pub mod test_support;

pub use application::{
    run, run_with_retry, Adapters, ExecutorError, OrchestrationContext, RunOutcome, RunSummary,
};
pub use domain::models::{Config, Task, TaskId, TaskLocation};
pub use domain::ports::{ChangeDetector, PhaseRequest, PhaseResult, PhaseRunner, ProcessLiveness, RecoveryPrompt};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CircuitBreaker, LockManager, RateLimiter, SessionService, TaskQueue, TaskSelector};
