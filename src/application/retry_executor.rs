//! Retry/backoff executor: runs one pipeline phase to success or a verdict.
//!
//! Each attempt is gated by the circuit breaker and the rate limiter, then
//! fed back into the breaker. Failures back off exponentially, and quota-like
//! failures step the model down for the remaining attempts.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::context::OrchestrationContext;
use crate::domain::errors::DomainError;
use crate::domain::models::Task;
use crate::domain::ports::{PhaseRequest, PhaseResult};
use crate::services::{countdown, Gate, RateLimitError, StagnationSignal};

/// Why a phase did not complete.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("stagnation detected: {reason}. {remedy}", reason = .signal.describe())]
    Stagnation {
        signal: StagnationSignal,
        retry_after: Option<DateTime<Utc>>,
        remedy: String,
    },

    #[error("phase '{phase}' failed after {attempts} attempts (last exit code {last_exit_code}, log {})", .log_path.display())]
    Exhausted {
        phase: String,
        attempts: u32,
        last_exit_code: i32,
        log_path: PathBuf,
    },

    #[error("interrupted")]
    Cancelled,

    #[error("failed to invoke agent: {0:#}")]
    Runner(#[source] anyhow::Error),

    #[error(transparent)]
    State(#[from] DomainError),
}

impl From<RateLimitError> for ExecutorError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Interrupted(_) => Self::Cancelled,
            RateLimitError::State(e) => Self::State(e),
        }
    }
}

/// Delay after failed attempt `attempt` (1-based): `min(base * 2^(attempt-1), cap)`.
pub fn backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// Operator guidance for a tripped breaker.
pub fn remedy(retry_after: Option<DateTime<Utc>>, log_dir: &std::path::Path) -> String {
    let wait = retry_after.map_or_else(
        || "Wait for the cooldown".to_string(),
        |at| format!("Wait until {} for the cooldown", at.format("%Y-%m-%d %H:%M:%S UTC")),
    );
    format!(
        "{wait}, inspect the logs in {}, or fix the task by hand and run `taskforge reset`",
        log_dir.display()
    )
}

/// Run `phase` of `task` until it succeeds, the breaker trips, or attempts run out.
///
/// Exhaustion leaves the task where it is and bumps the health failure count.
pub async fn run_with_retry(
    ctx: &mut OrchestrationContext,
    task: &Task,
    phase: &str,
    prompt: &str,
) -> Result<PhaseResult, ExecutorError> {
    let max_attempts = ctx.config.retry.max_attempts.max(1);
    let base = Duration::from_secs(ctx.config.retry.base_delay_secs);
    let cap = Duration::from_secs(ctx.config.retry.max_delay_secs);
    let label = format!("{}/{phase}", task.id);
    let token = ctx.token.clone();
    let mut last: Option<PhaseResult> = None;

    for attempt in 1..=max_attempts {
        if token.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        match ctx.breaker.should_proceed()? {
            Gate::Proceed => {}
            Gate::Probe => info!(task_id = %task.id, phase, "breaker half-open, probing"),
            Gate::Deny { retry_after, .. } => {
                return Err(ExecutorError::Stagnation {
                    signal: StagnationSignal::BreakerOpen,
                    retry_after: Some(retry_after),
                    remedy: remedy(Some(retry_after), &ctx.session_log_dir()),
                });
            }
        }

        ctx.rate_limiter.wait_for_capacity(&label, &token).await?;
        ctx.rate_limiter.record()?;

        let request = PhaseRequest {
            phase: phase.to_string(),
            prompt: prompt.to_string(),
            model: ctx.models.current().to_string(),
            working_dir: ctx.config.project_dir.clone(),
            timeout: Duration::from_secs(ctx.config.agent.phase_timeout_secs),
            log_path: ctx.attempt_log_path(&task.id, phase, attempt),
        };
        info!(task_id = %task.id, phase, attempt, max_attempts, model = %request.model, "starting attempt");

        let runner = std::sync::Arc::clone(&ctx.adapters.runner);
        let result = tokio::select! {
            r = runner.run(&request) => r.map_err(ExecutorError::Runner)?,
            () = token.cancelled() => return Err(ExecutorError::Cancelled),
        };

        let detector = std::sync::Arc::clone(&ctx.adapters.detector);
        let report = ctx
            .breaker
            .record_iteration(result.exit_code, &result.log_path, &ctx.config.project_dir, detector.as_ref())
            .await?;

        if result.succeeded() {
            ctx.consecutive_failures = 0;
            ctx.models.on_success();
            ctx.sessions.record_success(&format!("{label} succeeded"))?;
            if let Some(signal) = report.tripped {
                return Err(stagnation(ctx, signal));
            }
            info!(task_id = %task.id, phase, attempt, "phase succeeded");
            return Ok(result);
        }

        ctx.consecutive_failures += 1;
        if result.timed_out() {
            warn!(task_id = %task.id, phase, attempt, "phase timed out");
        } else {
            warn!(task_id = %task.id, phase, attempt, exit_code = result.exit_code, log = %result.log_path.display(), "phase failed");
        }
        ctx.models.on_failure(&result.log_path);
        if let Some(signal) = report.tripped {
            return Err(stagnation(ctx, signal));
        }

        if attempt < max_attempts {
            let delay = backoff(attempt, base, cap);
            countdown(
                &format!("{label}: retry {}/{max_attempts} in", attempt + 1),
                delay,
                &token,
                Duration::from_secs(ctx.config.rate_limit.status_interval_secs),
            )
            .await
            .map_err(|_| ExecutorError::Cancelled)?;
        }
        last = Some(result);
    }

    let (last_exit_code, log_path) = last.map_or((0, PathBuf::new()), |r| (r.exit_code, r.log_path));
    let message = format!("{label} failed after {max_attempts} attempts");
    ctx.sessions.record_exhaustion(&message)?;
    Err(ExecutorError::Exhausted {
        phase: phase.to_string(),
        attempts: max_attempts,
        last_exit_code,
        log_path,
    })
}

fn stagnation(ctx: &OrchestrationContext, signal: StagnationSignal) -> ExecutorError {
    let retry_after = ctx.breaker.retry_after();
    ExecutorError::Stagnation {
        signal,
        retry_after,
        remedy: remedy(retry_after, &ctx.session_log_dir()),
    }
}
