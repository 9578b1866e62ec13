//! Rolling one-hour call quota per agent.
//!
//! The log is a newline-delimited list of epoch seconds. Appends are plain
//! appends; pruning rewrites the file atomically with only the entries still
//! inside the window.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::RateLimitConfig;
use crate::infrastructure::state_file;
use crate::services::wait::{countdown, Interrupted};

/// Length of the rolling window in seconds.
pub const WINDOW_SECS: i64 = 3600;

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    /// Usage crossed the warning threshold; the call may still proceed.
    Warn { used: usize, quota: usize, message: String },
    /// Quota reached; capacity returns at epoch second `until`.
    Block { used: usize, quota: usize, until: i64 },
}

/// Errors from a blocking wait for capacity.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error(transparent)]
    State(#[from] DomainError),
}

/// Quota enforcer backed by one agent's call log.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    log_path: PathBuf,
    enabled: bool,
    quota: usize,
    warn_pct: usize,
    status_interval: Duration,
}

impl RateLimiter {
    pub fn new(log_path: impl Into<PathBuf>, config: &RateLimitConfig) -> Self {
        Self {
            log_path: log_path.into(),
            enabled: config.enabled,
            quota: config.calls_per_hour as usize,
            warn_pct: config.warn_threshold_pct as usize,
            status_interval: Duration::from_secs(config.status_interval_secs),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Log one privileged invocation now.
    pub fn record(&self) -> DomainResult<()> {
        self.record_at(Utc::now().timestamp())
    }

    pub fn record_at(&self, now: i64) -> DomainResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent).map_err(|e| DomainError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| DomainError::io(&self.log_path, e))?;
        writeln!(file, "{now}").map_err(|e| DomainError::io(&self.log_path, e))?;
        Ok(())
    }

    /// Drop entries outside the window and return how many remain.
    pub fn prune(&self) -> DomainResult<usize> {
        Ok(self.prune_at(Utc::now().timestamp())?.len())
    }

    /// Prune relative to `now`, returning surviving timestamps oldest first.
    ///
    /// Blank and malformed lines are dropped rather than treated as errors.
    pub fn prune_at(&self, now: i64) -> DomainResult<Vec<i64>> {
        let text = match fs::read_to_string(&self.log_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DomainError::io(&self.log_path, e)),
        };

        let total_lines = text.lines().count();
        let mut kept: Vec<i64> = text
            .lines()
            .filter_map(|line| line.trim().parse::<i64>().ok())
            .filter(|&ts| now - ts < WINDOW_SECS)
            .collect();
        kept.sort_unstable();

        if kept.len() != total_lines {
            let mut body = String::with_capacity(kept.len() * 11);
            for ts in &kept {
                body.push_str(&ts.to_string());
                body.push('\n');
            }
            state_file::write_atomic(&self.log_path, &body)?;
            debug!(removed = total_lines - kept.len(), remaining = kept.len(), "rate log pruned");
        }
        Ok(kept)
    }

    /// Check the quota for a call labelled `label`.
    pub fn check(&self, label: &str) -> DomainResult<RateDecision> {
        self.check_at(label, Utc::now().timestamp())
    }

    pub fn check_at(&self, label: &str, now: i64) -> DomainResult<RateDecision> {
        if !self.enabled {
            return Ok(RateDecision::Allow);
        }

        let entries = self.prune_at(now)?;
        let used = entries.len();

        if used >= self.quota {
            // The oldest surviving entry is the first to age out.
            let oldest = entries.first().copied().unwrap_or(now);
            return Ok(RateDecision::Block {
                used,
                quota: self.quota,
                until: oldest + WINDOW_SECS,
            });
        }
        if used * 100 >= self.quota * self.warn_pct {
            return Ok(RateDecision::Warn {
                used,
                quota: self.quota,
                message: format!("{label}: {used}/{} calls used in the last hour", self.quota),
            });
        }
        Ok(RateDecision::Allow)
    }

    /// Block until a call is allowed, re-checking after every wake.
    ///
    /// Cancellation leaves the log untouched.
    pub async fn wait_for_capacity(
        &self,
        label: &str,
        token: &CancellationToken,
    ) -> Result<RateDecision, RateLimitError> {
        loop {
            let now = Utc::now().timestamp();
            match self.check_at(label, now)? {
                RateDecision::Block { used, quota, until } => {
                    let wait_secs = u64::try_from(until - now).unwrap_or(0).max(1);
                    warn!(label, used, quota, resume_at = until, "rate limit reached, waiting");
                    countdown(
                        &format!("{label}: rate limited ({used}/{quota})"),
                        Duration::from_secs(wait_secs),
                        token,
                        self.status_interval,
                    )
                    .await?;
                }
                RateDecision::Warn { used, quota, message } => {
                    warn!(label, used, quota, "{message}");
                    return Ok(RateDecision::Warn { used, quota, message });
                }
                RateDecision::Allow => return Ok(RateDecision::Allow),
            }
        }
    }
}
