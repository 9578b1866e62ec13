//! Outer loop: recover orphans, claim a task, run its phases, repeat.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::context::OrchestrationContext;
use crate::application::retry_executor::{remedy, run_with_retry, ExecutorError};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CircuitState, SessionRecord, SessionStatus, Task, TaskLocation};
use crate::services::session_service::health_status;
use crate::services::{Gate, RecoveryOutcome, StagnationSignal, TaskSelector};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No claimable task left.
    Drained,
    IterationLimit,
    Stagnated,
    Exhausted,
    Interrupted,
}

/// What a run accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub session_id: String,
    pub outcome: RunOutcome,
    pub iterations: u32,
    pub completed: Vec<String>,
    pub recovered: Vec<String>,
    /// Diagnostic and remedy for stagnation or exhaustion.
    pub detail: Option<String>,
}

/// Run until the queue drains, a task stalls, or the token fires.
///
/// Every lock this agent holds is released before returning, on every path.
pub async fn run(ctx: &mut OrchestrationContext, max_iterations: Option<u32>) -> Result<RunSummary> {
    let result = drive(ctx, max_iterations).await;
    let released = ctx.locks.release_all();
    if released > 0 {
        info!(released, "released held locks");
    }
    result
}

async fn drive(ctx: &mut OrchestrationContext, max_iterations: Option<u32>) -> Result<RunSummary> {
    ctx.queue.ensure_layout().context("Failed to create task queue directories")?;
    if let Err(e) = ctx.adapters.detector.capture_baseline(&ctx.config.project_dir).await {
        warn!(error = %e, "could not capture working tree baseline");
    }

    resume_or_start(ctx)?;
    open_breaker_if_unhealthy(ctx)?;

    let mut summary = RunSummary {
        session_id: ctx.session_id.clone(),
        outcome: RunOutcome::Drained,
        iterations: 0,
        completed: Vec::new(),
        recovered: Vec::new(),
        detail: None,
    };

    loop {
        if ctx.token.is_cancelled() {
            summary.outcome = RunOutcome::Interrupted;
            break;
        }
        if max_iterations.is_some_and(|max| summary.iterations >= max) {
            info!(iterations = summary.iterations, "iteration limit reached");
            summary.outcome = RunOutcome::IterationLimit;
            break;
        }

        // Nothing is claimed or moved while the breaker is cooling down.
        if let Some(err) = breaker_denial(ctx)? {
            warn!("{err}");
            ctx.sessions.update_health(health_status::STAGNATED, &err.to_string())?;
            summary.outcome = RunOutcome::Stagnated;
            summary.detail = Some(err.to_string());
            break;
        }

        summary.recovered.extend(recover_orphans(ctx)?);

        let next = TaskSelector::new(&ctx.queue, &mut ctx.locks)
            .next_task()
            .context("Failed to select next task")?;
        let Some(task) = next else {
            info!("no claimable tasks left");
            break;
        };

        let task = if task.location == TaskLocation::Todo {
            match ctx.queue.move_to(&task, TaskLocation::Doing) {
                Ok(moved) => moved,
                Err(e) => {
                    ctx.locks.release(&task.id)?;
                    return Err(e).context(format!("Failed to claim task {}", task.id));
                }
            }
        } else {
            task
        };

        summary.iterations += 1;
        ctx.iteration += 1;
        save_session(ctx, SessionStatus::Running, Some(&task))?;
        info!(task_id = %task.id, iteration = ctx.iteration, "working on task");

        match run_task(ctx, &task).await {
            Ok(()) => {
                let done = ctx
                    .queue
                    .move_to(&task, TaskLocation::Done)
                    .with_context(|| format!("Failed to complete task {}", task.id))?;
                ctx.locks.release(&done.id)?;
                info!(task_id = %done.id, "task completed");
                summary.completed.push(done.id.to_string());
            }
            Err(ExecutorError::Cancelled) => {
                summary.outcome = RunOutcome::Interrupted;
                break;
            }
            Err(err @ ExecutorError::Stagnation { .. }) => {
                error!(task_id = %task.id, "{err}");
                ctx.sessions.update_health(health_status::STAGNATED, &err.to_string())?;
                summary.outcome = RunOutcome::Stagnated;
                summary.detail = Some(err.to_string());
                break;
            }
            Err(err @ ExecutorError::Exhausted { .. }) => {
                error!(task_id = %task.id, "{err}");
                summary.outcome = RunOutcome::Exhausted;
                summary.detail = Some(format!(
                    "{err}. The task stays in doing/; inspect the log and rerun or recover it."
                ));
                break;
            }
            Err(err) => return Err(err).context(format!("Task {} failed", task.id)),
        }
    }

    finish_session(ctx, summary.outcome)?;
    Ok(summary)
}

/// Pick up a previous interrupted session or start a new one.
fn resume_or_start(ctx: &mut OrchestrationContext) -> Result<()> {
    if let Some(previous) = ctx.sessions.load_session()? {
        info!(
            session_id = %previous.session_id,
            iteration = previous.iteration,
            model = %previous.model,
            "resuming interrupted session"
        );
        ctx.session_id = previous.session_id;
        ctx.iteration = previous.iteration;
        ctx.models.restore(&previous.model);
    }
    save_session(ctx, SessionStatus::Running, None)?;
    ctx.sessions.update_health(health_status::HEALTHY, "run started")?;
    Ok(())
}

fn open_breaker_if_unhealthy(ctx: &mut OrchestrationContext) -> Result<()> {
    let failures = ctx.sessions.consecutive_failures()?;
    if ctx.breaker.config().enabled
        && ctx.breaker.state() == CircuitState::Closed
        && failures >= ctx.breaker.config().failure_threshold
    {
        warn!(consecutive_failures = failures, "health shows repeated exhaustion, opening breaker");
        ctx.breaker.trip(StagnationSignal::HealthFailures)?;
    }
    Ok(())
}

fn breaker_denial(ctx: &mut OrchestrationContext) -> DomainResult<Option<ExecutorError>> {
    match ctx.breaker.should_proceed()? {
        Gate::Proceed | Gate::Probe => Ok(None),
        Gate::Deny { retry_after, .. } => Ok(Some(ExecutorError::Stagnation {
            signal: StagnationSignal::BreakerOpen,
            retry_after: Some(retry_after),
            remedy: remedy(Some(retry_after), &ctx.session_log_dir()),
        })),
    }
}

fn recover_orphans(ctx: &mut OrchestrationContext) -> Result<Vec<String>> {
    let prompt = Arc::clone(&ctx.adapters.prompt);
    let autonomous = ctx.config.autonomous;
    let mut selector = TaskSelector::new(&ctx.queue, &mut ctx.locks);
    let mut recovered = Vec::new();
    for orphan in selector.orphans()? {
        if let RecoveryOutcome::Recovered(task) = selector.recover_orphan(&orphan, autonomous, prompt.as_ref())? {
            recovered.push(task.id.to_string());
        }
    }
    Ok(recovered)
}

/// All configured phases in order, with the lock kept fresh throughout.
async fn run_task(ctx: &mut OrchestrationContext, task: &Task) -> Result<(), ExecutorError> {
    let heartbeat_token = ctx.token.child_token();
    let heartbeat = ctx.locks.heartbeat_handle(&task.id).spawn(
        Duration::from_secs(ctx.config.lock.heartbeat_interval_secs.max(1)),
        heartbeat_token.clone(),
    );

    let result = run_phases(ctx, task).await;

    heartbeat_token.cancel();
    if let Err(e) = heartbeat.await {
        warn!(error = %e, "heartbeat task ended abnormally");
    }
    result
}

async fn run_phases(ctx: &mut OrchestrationContext, task: &Task) -> Result<(), ExecutorError> {
    let body = std::fs::read_to_string(&task.path)
        .map_err(|e| DomainError::io(&task.path, e))?;
    for phase in ctx.config.phases.clone() {
        let prompt = phase_prompt(task, &phase, &body);
        run_with_retry(ctx, task, &phase, &prompt).await?;
        save_session(ctx, SessionStatus::Running, Some(task))?;
    }
    Ok(())
}

fn phase_prompt(task: &Task, phase: &str, body: &str) -> String {
    format!(
        "Phase: {phase}\nTask: {id}\nTask file: {path}\n\n{body}",
        id = task.id,
        path = task.path.display()
    )
}

fn save_session(ctx: &OrchestrationContext, status: SessionStatus, task: Option<&Task>) -> DomainResult<()> {
    let record = SessionRecord {
        session_id: ctx.session_id.clone(),
        status,
        model: ctx.models.current().to_string(),
        log_dir: ctx.session_log_dir(),
        iteration: ctx.iteration,
        task_id: task.map(|t| t.id.to_string()),
        updated_at: Utc::now(),
    };
    ctx.sessions.save_session(&record)
}

fn finish_session(ctx: &OrchestrationContext, outcome: RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Drained | RunOutcome::IterationLimit => {
            ctx.sessions.clear_session()?;
            ctx.sessions.update_health(health_status::HEALTHY, "run finished")?;
        }
        RunOutcome::Stagnated => save_session(ctx, SessionStatus::Stagnated, None)?,
        RunOutcome::Exhausted => save_session(ctx, SessionStatus::Exhausted, None)?,
        // Left running so the next start resumes it.
        RunOutcome::Interrupted => {
            ctx.sessions.update_health(health_status::STOPPED, "interrupted")?;
        }
    }
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
pub fn install_signal_handlers(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        warn!("shutdown requested, finishing current step");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
