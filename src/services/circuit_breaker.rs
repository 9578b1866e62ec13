//! Stagnation circuit breaker.
//!
//! Detects an agent that keeps running without getting anywhere and gates
//! further iterations until a cooldown passes. Four detectors feed one state
//! machine:
//!
//! - no progress: successful iterations that leave the working tree unchanged
//! - repeated error: failed iterations whose log tails hash identically
//! - consecutive failures: failed iterations in a row, any signature
//! - output decline: output far below the recent average (reported only)
//!
//! Any detector reaching its threshold opens the breaker. State is persisted
//! after every mutation so it survives restarts of the same agent.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CircuitBreakerConfig, CircuitRecord, CircuitState};
use crate::domain::ports::ChangeDetector;
use crate::infrastructure::state_file;

/// Which detector opened the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StagnationSignal {
    /// Successful iterations kept producing no change.
    NoProgress,
    /// The same failure signature kept recurring.
    RepeatedError,
    /// Too many failed iterations in a row.
    ConsecutiveFailures,
    /// The persisted health record already showed too many failed runs.
    HealthFailures,
    /// The breaker was already open and its cooldown has not elapsed.
    BreakerOpen,
}

impl StagnationSignal {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::NoProgress => "iterations succeed but change nothing in the working tree",
            Self::RepeatedError => "the same error keeps recurring",
            Self::ConsecutiveFailures => "too many failed iterations in a row",
            Self::HealthFailures => "previous runs exhausted their retries repeatedly",
            Self::BreakerOpen => "the breaker is open and cooling down",
        }
    }
}

/// Signals observed for one finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationOutcome {
    pub succeeded: bool,
    /// `None` when change detection failed; neither progress nor stall is counted.
    pub changed: Option<bool>,
    /// Hash of the failure's log tail, for failed attempts.
    pub error_hash: Option<String>,
    pub output_size: u64,
}

/// What the breaker concluded from one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub state: CircuitState,
    pub no_progress_count: u32,
    pub same_error_count: u32,
    pub output_declined: bool,
    /// Set when this iteration opened the breaker.
    pub tripped: Option<StagnationSignal>,
}

/// Answer to "may the next attempt run?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    /// HALF_OPEN: one probing attempt is allowed.
    Probe,
    Deny { opened_at: DateTime<Utc>, retry_after: DateTime<Utc> },
}

impl Gate {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Proceed | Self::Probe)
    }
}

/// Per-agent breaker bound to its state file.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    record: CircuitRecord,
    path: PathBuf,
}

impl CircuitBreaker {
    /// Load persisted state, starting CLOSED if the file is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>, config: CircuitBreakerConfig) -> DomainResult<Self> {
        let path = path.into();
        let record = match state_file::read_record(&path)? {
            Some(raw) => CircuitRecord::decode(&raw, &path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "discarding unreadable breaker state");
                CircuitRecord::default()
            }),
            None => CircuitRecord::default(),
        };
        debug!(state = %record.state, no_progress = record.no_progress_count, "breaker loaded");
        Ok(Self { config, record, path })
    }

    pub fn state(&self) -> CircuitState {
        self.record.state
    }

    pub fn record(&self) -> &CircuitRecord {
        &self.record
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// When an open breaker will allow its next probe.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        match self.record.state {
            CircuitState::Open => self.record.opened_at.map(|at| at + self.cooldown()),
            CircuitState::Closed | CircuitState::HalfOpen => None,
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.cooldown_secs).unwrap_or(i64::MAX / 1000).min(i64::MAX / 1000))
    }

    fn save(&self) -> DomainResult<()> {
        state_file::write_record(&self.path, &self.record.encode())
    }

    /// Gate the next attempt.
    pub fn should_proceed(&mut self) -> DomainResult<Gate> {
        self.should_proceed_at(Utc::now())
    }

    pub fn should_proceed_at(&mut self, now: DateTime<Utc>) -> DomainResult<Gate> {
        if !self.config.enabled {
            return Ok(Gate::Proceed);
        }
        match self.record.state {
            CircuitState::Closed => Ok(Gate::Proceed),
            CircuitState::HalfOpen => Ok(Gate::Probe),
            CircuitState::Open => {
                let opened_at = self.record.opened_at.unwrap_or(now - self.cooldown());
                let retry_after = opened_at + self.cooldown();
                if now >= retry_after {
                    info!("breaker cooldown elapsed, allowing a probe");
                    self.record.state = CircuitState::HalfOpen;
                    self.record.opened_at = None;
                    self.save()?;
                    Ok(Gate::Probe)
                } else {
                    Ok(Gate::Deny { opened_at, retry_after })
                }
            }
        }
    }

    /// Gather signals for a finished attempt and drive the state machine.
    pub async fn record_iteration(
        &mut self,
        exit_code: i32,
        log_path: &Path,
        project_dir: &Path,
        detector: &dyn ChangeDetector,
    ) -> DomainResult<IterationReport> {
        let changed = match detector.has_changed(project_dir).await {
            Ok(changed) => Some(changed),
            Err(e) => {
                warn!(error = %e, "change detection failed, not counting this iteration");
                None
            }
        };
        let succeeded = exit_code == 0;
        let error_hash = if succeeded {
            None
        } else {
            Some(hash_log_tail(log_path, self.config.error_tail_lines)?)
        };
        let output_size = match fs::metadata(log_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(DomainError::io(log_path, e)),
        };

        self.record_outcome_at(
            &IterationOutcome {
                succeeded,
                changed,
                error_hash,
                output_size,
            },
            Utc::now(),
        )
    }

    /// Apply one outcome and persist the result.
    pub fn record_outcome_at(
        &mut self,
        outcome: &IterationOutcome,
        now: DateTime<Utc>,
    ) -> DomainResult<IterationReport> {
        if !self.config.enabled {
            return Ok(self.report(false, None));
        }

        let output_declined = self.push_output_size(outcome.output_size);
        if output_declined {
            warn!(output_size = outcome.output_size, "output volume declining");
        }

        let mut tripped = None;
        let r = &mut self.record;
        if outcome.succeeded {
            r.consecutive_failures = 0;
            r.same_error_count = 0;
            r.last_error_hash = None;
            match outcome.changed {
                Some(true) => {
                    if r.state != CircuitState::Closed {
                        info!(from = %r.state, "progress observed, closing breaker");
                    }
                    r.state = CircuitState::Closed;
                    r.no_progress_count = 0;
                    r.opened_at = None;
                }
                Some(false) => {
                    r.no_progress_count += 1;
                    if r.state == CircuitState::Closed
                        && r.no_progress_count >= self.config.half_open_after
                    {
                        warn!(no_progress = r.no_progress_count, "no progress, breaker half-open");
                        r.state = CircuitState::HalfOpen;
                    }
                    if r.state == CircuitState::HalfOpen
                        && r.no_progress_count >= self.config.no_progress_threshold
                    {
                        tripped = Some(StagnationSignal::NoProgress);
                    }
                }
                None => {}
            }
        } else {
            r.consecutive_failures += 1;
            if outcome.error_hash.is_some() && outcome.error_hash == r.last_error_hash {
                r.same_error_count += 1;
            } else {
                r.same_error_count = 1;
                r.last_error_hash.clone_from(&outcome.error_hash);
            }
            if r.same_error_count >= self.config.same_error_threshold {
                tripped = Some(StagnationSignal::RepeatedError);
            } else if r.consecutive_failures >= self.config.failure_threshold {
                tripped = Some(StagnationSignal::ConsecutiveFailures);
            }
        }

        if let Some(signal) = tripped {
            self.open(now, signal);
        }
        self.save()?;
        Ok(self.report(output_declined, tripped))
    }

    /// Open the breaker immediately.
    pub fn trip(&mut self, signal: StagnationSignal) -> DomainResult<()> {
        self.open(Utc::now(), signal);
        self.save()
    }

    /// Back to CLOSED with all detectors cleared.
    pub fn reset(&mut self) -> DomainResult<()> {
        self.record = CircuitRecord::default();
        info!("breaker reset");
        self.save()
    }

    fn open(&mut self, now: DateTime<Utc>, signal: StagnationSignal) {
        warn!(
            signal = ?signal,
            no_progress = self.record.no_progress_count,
            same_error = self.record.same_error_count,
            failures = self.record.consecutive_failures,
            cooldown_secs = self.config.cooldown_secs,
            "breaker opened: {}",
            signal.describe()
        );
        self.record.state = CircuitState::Open;
        // Persisted as whole seconds.
        self.record.opened_at = Some(now.trunc_subsecs(0));
    }

    /// Compare `size` to the window average, then append it.
    fn push_output_size(&mut self, size: u64) -> bool {
        let window = &mut self.record.output_sizes;
        let declined = if window.is_empty() {
            false
        } else {
            let sum: u64 = window.iter().sum();
            let avg = sum / window.len() as u64;
            size.saturating_mul(100) < avg.saturating_mul(u64::from(self.config.output_decline_pct))
        };
        window.push_back(size);
        while window.len() > self.config.output_window.max(1) {
            window.pop_front();
        }
        declined
    }

    fn report(&self, output_declined: bool, tripped: Option<StagnationSignal>) -> IterationReport {
        IterationReport {
            state: self.record.state,
            no_progress_count: self.record.no_progress_count,
            same_error_count: self.record.same_error_count,
            output_declined,
            tripped,
        }
    }
}

/// Stable signature of the last `lines` lines of a log.
///
/// A missing log hashes as empty so repeated "no output" failures still match.
pub fn hash_log_tail(log_path: &Path, lines: usize) -> DomainResult<String> {
    let text = match fs::read(log_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(DomainError::io(log_path, e)),
    };
    let all: Vec<&str> = text.lines().collect();
    let tail = &all[all.len().saturating_sub(lines)..];

    let mut hasher = Sha256::new();
    for line in tail {
        hasher.update(line.trim_end().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            no_progress_threshold: 3,
            cooldown_secs: 600,
            ..Default::default()
        }
    }

    fn breaker(dir: &TempDir) -> CircuitBreaker {
        CircuitBreaker::load(dir.path().join("circuit_breaker.state"), config()).unwrap()
    }

    fn stalled(size: u64) -> IterationOutcome {
        IterationOutcome { succeeded: true, changed: Some(false), error_hash: None, output_size: size }
    }

    fn progressed(size: u64) -> IterationOutcome {
        IterationOutcome { succeeded: true, changed: Some(true), error_hash: None, output_size: size }
    }

    fn failed(hash: &str) -> IterationOutcome {
        IterationOutcome {
            succeeded: false,
            changed: Some(false),
            error_hash: Some(hash.to_string()),
            output_size: 100,
        }
    }

    #[test]
    fn test_no_progress_walks_closed_half_open_open() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        let now = Utc::now();

        assert_eq!(cb.record_outcome_at(&stalled(100), now).unwrap().state, CircuitState::Closed);
        assert_eq!(cb.record_outcome_at(&stalled(100), now).unwrap().state, CircuitState::HalfOpen);
        let report = cb.record_outcome_at(&stalled(100), now).unwrap();
        assert_eq!(report.state, CircuitState::Open);
        assert_eq!(report.tripped, Some(StagnationSignal::NoProgress));

        let gate = cb.should_proceed_at(now + Duration::seconds(10)).unwrap();
        assert!(!gate.is_allowed());
    }

    #[test]
    fn test_cooldown_allows_one_probe() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        let now = Utc::now();
        for _ in 0..3 {
            cb.record_outcome_at(&stalled(100), now).unwrap();
        }

        let later = now + Duration::seconds(601);
        assert_eq!(cb.should_proceed_at(later).unwrap(), Gate::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Still stuck on the probe: straight back to OPEN.
        let report = cb.record_outcome_at(&stalled(100), later).unwrap();
        assert_eq!(report.state, CircuitState::Open);
    }

    #[test]
    fn test_progress_resets_from_any_state() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        let now = Utc::now();
        for _ in 0..3 {
            cb.record_outcome_at(&stalled(100), now).unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let report = cb.record_outcome_at(&progressed(100), now).unwrap();
        assert_eq!(report.state, CircuitState::Closed);
        assert_eq!(report.no_progress_count, 0);
        assert_eq!(cb.should_proceed_at(now).unwrap(), Gate::Proceed);
    }

    #[test]
    fn test_failures_do_not_count_as_no_progress() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        let now = Utc::now();
        for i in 0..4 {
            let report = cb.record_outcome_at(&failed(&format!("h{i}")), now).unwrap();
            assert_eq!(report.no_progress_count, 0);
            assert_eq!(report.same_error_count, 1);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_repeated_error_opens_breaker() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        let now = Utc::now();
        let mut last = None;
        for _ in 0..5 {
            last = Some(cb.record_outcome_at(&failed("deadbeef"), now).unwrap());
        }
        let report = last.unwrap();
        assert_eq!(report.same_error_count, 5);
        assert_eq!(report.tripped, Some(StagnationSignal::RepeatedError));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_consecutive_failures_open_breaker() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        let now = Utc::now();
        let mut report = None;
        for i in 0..5 {
            report = Some(cb.record_outcome_at(&failed(&format!("e{i}")), now).unwrap());
        }
        assert_eq!(report.unwrap().tripped, Some(StagnationSignal::ConsecutiveFailures));
    }

    #[test]
    fn test_output_decline_is_reported_without_transition() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        let now = Utc::now();
        for _ in 0..5 {
            cb.record_outcome_at(&progressed(1000), now).unwrap();
        }
        let report = cb.record_outcome_at(&progressed(500), now).unwrap();
        assert!(report.output_declined);
        assert_eq!(report.state, CircuitState::Closed);
        assert_eq!(cb.record().output_sizes.len(), 5);

        let steady = cb.record_outcome_at(&progressed(900), now).unwrap();
        assert!(!steady.output_declined);
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let mut cb = breaker(&dir);
        cb.record_outcome_at(&stalled(10), now).unwrap();
        cb.record_outcome_at(&failed("abc"), now).unwrap();

        let reloaded = breaker(&dir);
        assert_eq!(reloaded.record(), cb.record());
    }

    #[test]
    fn test_open_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let mut cb = breaker(&dir);
        cb.trip(StagnationSignal::RepeatedError).unwrap();
        assert_eq!(cb.state(), CircuitState::Open);

        let reloaded = breaker(&dir);
        assert_eq!(reloaded.record(), cb.record());
        assert_eq!(reloaded.retry_after(), cb.retry_after());
    }

    #[test]
    fn test_disabled_breaker_always_proceeds() {
        let dir = TempDir::new().unwrap();
        let mut cb = CircuitBreaker::load(
            dir.path().join("cb.state"),
            CircuitBreakerConfig { enabled: false, ..config() },
        )
        .unwrap();
        for _ in 0..10 {
            cb.record_outcome_at(&stalled(1), Utc::now()).unwrap();
        }
        assert_eq!(cb.should_proceed().unwrap(), Gate::Proceed);
    }

    #[test]
    fn test_hash_uses_only_the_tail() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        fs::write(&a, "run 1 header\nerror: boom\nexit 1\n").unwrap();
        fs::write(&b, "run 2 header differs\nerror: boom\nexit 1\n").unwrap();

        assert_eq!(hash_log_tail(&a, 2).unwrap(), hash_log_tail(&b, 2).unwrap());
        assert_ne!(hash_log_tail(&a, 3).unwrap(), hash_log_tail(&b, 3).unwrap());
        assert_eq!(hash_log_tail(&dir.path().join("missing.log"), 2).unwrap().len(), 16);
    }

    struct Toggle(AtomicBool);

    #[async_trait]
    impl ChangeDetector for Toggle {
        async fn capture_baseline(&self, _project_dir: &Path) -> Result<()> {
            Ok(())
        }

        async fn has_changed(&self, _project_dir: &Path) -> Result<bool> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn test_record_iteration_reads_log_and_detector() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("phase.log");
        fs::write(&log, "fatal: same thing\n").unwrap();
        let detector = Toggle(AtomicBool::new(false));
        let mut cb = breaker(&dir);

        let report = cb.record_iteration(1, &log, dir.path(), &detector).await.unwrap();
        assert_eq!(report.same_error_count, 1);
        let report = cb.record_iteration(1, &log, dir.path(), &detector).await.unwrap();
        assert_eq!(report.same_error_count, 2);

        detector.0.store(true, Ordering::SeqCst);
        let report = cb.record_iteration(0, &log, dir.path(), &detector).await.unwrap();
        assert_eq!(report.same_error_count, 0);
        assert_eq!(report.state, CircuitState::Closed);
        assert_eq!(cb.record().output_sizes.back(), Some(&18));
    }
}
