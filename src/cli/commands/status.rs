//! `taskforge status`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::context::{CIRCUIT_FILE, RATE_LOG_FILE};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{CircuitState, Config, HealthRecord, LockRecord, SessionRecord, TaskId, TaskLocation};
use crate::domain::ports::ProcessLiveness;
use crate::infrastructure::config::ConfigOverrides;
use crate::infrastructure::SignalProbe;
use crate::services::task_selector::describe_stale;
use crate::services::{CircuitBreaker, LockManager, LockStatus, RateLimiter, SessionService, TaskQueue, TaskSelector};

#[derive(Debug, Clone, Serialize)]
pub struct QueueCount {
    pub location: TaskLocation,
    pub count: usize,
}

/// One lock file as seen by the calling agent.
#[derive(Debug, Clone, Serialize)]
pub struct LockView {
    pub task_id: String,
    /// `own`, `peer`, or `stale`
    pub state: &'static str,
    pub agent_id: Option<String>,
    pub pid: Option<u32>,
    pub age_secs: Option<i64>,
    pub stale_reason: Option<&'static str>,
}

impl LockView {
    fn new(task_id: &TaskId, status: &LockStatus, now: DateTime<Utc>) -> Option<Self> {
        let (state, record, stale_reason): (_, Option<&LockRecord>, _) = match status {
            LockStatus::Absent => return None,
            LockStatus::Own(record) => ("own", Some(record), None),
            LockStatus::Peer(record) => ("peer", Some(record), None),
            LockStatus::Stale { record, reason } => ("stale", record.as_ref(), Some(describe_stale(*reason))),
        };
        Some(Self {
            task_id: task_id.to_string(),
            state,
            agent_id: record.map(|r| r.agent_id.clone()),
            pid: record.map(|r| r.pid),
            age_secs: record.map(|r| r.age_secs(now)),
            stale_reason,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanView {
    pub task_id: String,
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerView {
    pub state: CircuitState,
    pub no_progress_count: u32,
    pub same_error_count: u32,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateView {
    pub enabled: bool,
    pub used: usize,
    pub quota: usize,
}

/// Snapshot of one agent's state and the shared queue.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub agent_id: String,
    pub project_dir: PathBuf,
    pub session: Option<SessionRecord>,
    pub health: Option<HealthRecord>,
    pub breaker: BreakerView,
    pub rate: RateView,
    pub queue: Vec<QueueCount>,
    pub locks: Vec<LockView>,
    pub orphans: Vec<OrphanView>,
}

impl StatusReport {
    /// Read every state file for `config.agent_id`. Expired rate-log entries
    /// are pruned as a side effect.
    pub fn collect(config: &Config, liveness: Arc<dyn ProcessLiveness>) -> Result<Self> {
        let agent_dir = config.agent_state_dir();
        let sessions = SessionService::new(&agent_dir, true);
        let breaker = CircuitBreaker::load(agent_dir.join(CIRCUIT_FILE), config.circuit_breaker.clone())
            .context("Failed to read circuit breaker state")?;
        let limiter = RateLimiter::new(agent_dir.join(RATE_LOG_FILE), &config.rate_limit);
        let queue = TaskQueue::new(config.queue_root());
        let mut locks = LockManager::new(config.locks_dir(), config.agent_id.clone(), config.lock.timeout_secs, liveness);

        let now = Utc::now();
        let record = breaker.record();
        let breaker_view = BreakerView {
            state: record.state,
            no_progress_count: record.no_progress_count,
            same_error_count: record.same_error_count,
            consecutive_failures: record.consecutive_failures,
            opened_at: record.opened_at,
            retry_after: breaker.retry_after(),
        };

        let queue_counts = TaskLocation::ALL
            .iter()
            .map(|&location| -> Result<QueueCount> {
                Ok(QueueCount { location, count: queue.list(location)?.len() })
            })
            .collect::<Result<Vec<_>>>()?;

        let lock_views = locks
            .list()?
            .iter()
            .filter_map(|(task_id, status)| LockView::new(task_id, status, now))
            .collect();

        let orphans = TaskSelector::new(&queue, &mut locks)
            .orphans()?
            .into_iter()
            .map(|o| OrphanView { task_id: o.task.id.to_string(), kind: o.kind.as_str() })
            .collect();

        Ok(Self {
            agent_id: config.agent_id.clone(),
            project_dir: config.project_dir.clone(),
            session: sessions.read_session()?,
            health: sessions.health()?,
            breaker: breaker_view,
            rate: RateView {
                enabled: config.rate_limit.enabled,
                used: limiter.prune()?,
                quota: limiter.quota(),
            },
            queue: queue_counts,
            locks: lock_views,
            orphans,
        })
    }
}

impl CommandOutput for StatusReport {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut fields: Vec<(&str, String)> = vec![("Agent", self.agent_id.clone())];

        match &self.session {
            Some(session) => {
                fields.push(("Session", format!("{} ({})", session.session_id, session.status)));
                fields.push(("Model", session.model.clone()));
                fields.push(("Iteration", session.iteration.to_string()));
                fields.push(("Task", session.task_id.clone().unwrap_or_else(|| "-".to_string())));
            }
            None => fields.push(("Session", "none".to_string())),
        }
        match &self.health {
            Some(health) => {
                fields.push(("Health", format!("{}: {}", health.status, health.message)));
                fields.push(("Failed runs", health.consecutive_failures.to_string()));
            }
            None => fields.push(("Health", "unknown".to_string())),
        }

        fields.push(("Breaker", formatter.breaker_state(self.breaker.state)));
        fields.push((
            "Stall counters",
            format!(
                "no-progress {}, same-error {}, failures {}",
                self.breaker.no_progress_count, self.breaker.same_error_count, self.breaker.consecutive_failures
            ),
        ));
        if let Some(retry_after) = self.breaker.retry_after {
            fields.push(("Retry after", retry_after.to_rfc3339()));
        }
        let rate = if self.rate.enabled {
            format!("{}/{} calls in the last hour", self.rate.used, self.rate.quota)
        } else {
            "disabled".to_string()
        };
        fields.push(("Rate", rate));

        let mut out = formatter.format_fields(&fields);
        out.push_str("\n\nQueue\n");
        out.push_str(&formatter.format_queue(&self.queue));
        if self.locks.is_empty() {
            out.push_str("\n\nNo locks held.");
        } else {
            out.push_str("\n\nLocks\n");
            out.push_str(&formatter.format_locks(&self.locks));
        }
        if !self.orphans.is_empty() {
            out.push_str("\n\nOrphans (run `taskforge recover`)\n");
            out.push_str(&formatter.format_orphans(&self.orphans));
        }
        out
    }
}

pub fn execute(overrides: ConfigOverrides, json_mode: bool) -> Result<()> {
    let (config, _logger) = super::bootstrap(&overrides)?;
    let report = StatusReport::collect(&config, Arc::new(SignalProbe))?;
    output(&report, json_mode);
    Ok(())
}
