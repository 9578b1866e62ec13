//! State files survive process restarts and tolerate damage.

use chrono::{Duration, Utc};
use taskforge::domain::models::{CircuitBreakerConfig, CircuitState, RateLimitConfig, SessionRecord, SessionStatus};
use taskforge::services::circuit_breaker::IterationOutcome;
use taskforge::services::{RateDecision, StagnationSignal};
use taskforge::{CircuitBreaker, RateLimiter, SessionService};
use tempfile::TempDir;

fn session(status: SessionStatus) -> SessionRecord {
    SessionRecord {
        session_id: "5f1c".to_string(),
        status,
        model: "sonnet".to_string(),
        log_dir: "/tmp/logs/5f1c".into(),
        iteration: 7,
        task_id: Some("002-003-cache".to_string()),
        updated_at: Utc::now(),
    }
}

#[test]
fn test_running_session_is_resumed_by_a_new_process() {
    let dir = TempDir::new().unwrap();
    SessionService::new(dir.path(), true)
        .save_session(&session(SessionStatus::Running))
        .unwrap();

    let restarted = SessionService::new(dir.path(), true);
    let loaded = restarted.load_session().unwrap().unwrap();
    assert_eq!(loaded.session_id, "5f1c");
    assert_eq!(loaded.iteration, 7);
    assert_eq!(loaded.task_id.as_deref(), Some("002-003-cache"));

    let no_resume = SessionService::new(dir.path(), false);
    assert!(no_resume.load_session().unwrap().is_none());
    assert!(no_resume.read_session().unwrap().is_some());
}

#[test]
fn test_finished_sessions_are_not_resumed() {
    let dir = TempDir::new().unwrap();
    let sessions = SessionService::new(dir.path(), true);
    for status in [SessionStatus::Completed, SessionStatus::Stagnated, SessionStatus::Exhausted] {
        sessions.save_session(&session(status)).unwrap();
        assert!(sessions.load_session().unwrap().is_none(), "{status} resumed");
    }
}

#[test]
fn test_health_failures_accumulate_across_restarts() {
    let dir = TempDir::new().unwrap();
    assert_eq!(SessionService::new(dir.path(), true).record_exhaustion("plan failed").unwrap(), 1);
    assert_eq!(SessionService::new(dir.path(), true).record_exhaustion("plan failed").unwrap(), 2);

    let sessions = SessionService::new(dir.path(), true);
    assert_eq!(sessions.consecutive_failures().unwrap(), 2);
    sessions.record_success("plan succeeded").unwrap();
    assert_eq!(SessionService::new(dir.path(), true).consecutive_failures().unwrap(), 0);
}

#[test]
fn test_breaker_counters_survive_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("circuit_breaker.state");
    let config = CircuitBreakerConfig::default();
    let stalled = IterationOutcome {
        succeeded: true,
        changed: Some(false),
        error_hash: None,
        output_size: 100,
    };

    let mut breaker = CircuitBreaker::load(&path, config.clone()).unwrap();
    breaker.record_outcome_at(&stalled, Utc::now()).unwrap();
    breaker.record_outcome_at(&stalled, Utc::now()).unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let mut reloaded = CircuitBreaker::load(&path, config.clone()).unwrap();
    assert_eq!(reloaded.state(), CircuitState::HalfOpen);
    assert_eq!(reloaded.record().no_progress_count, 2);
    let report = reloaded.record_outcome_at(&stalled, Utc::now()).unwrap();
    assert_eq!(report.tripped, Some(StagnationSignal::NoProgress));

    let reopened = CircuitBreaker::load(&path, config).unwrap();
    assert_eq!(reopened.state(), CircuitState::Open);
    assert!(reopened.retry_after().is_some());
}

#[test]
fn test_open_breaker_probes_after_cooldown_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("circuit_breaker.state");
    let config = CircuitBreakerConfig::default();
    CircuitBreaker::load(&path, config.clone())
        .unwrap()
        .trip(StagnationSignal::RepeatedError)
        .unwrap();

    let mut breaker = CircuitBreaker::load(&path, config.clone()).unwrap();
    assert!(!breaker.should_proceed().unwrap().is_allowed());

    let later = Utc::now() + Duration::seconds(i64::try_from(config.cooldown_secs).unwrap() + 1);
    assert!(breaker.should_proceed_at(later).unwrap().is_allowed());
    assert_eq!(CircuitBreaker::load(&path, config).unwrap().state(), CircuitState::HalfOpen);
}

#[test]
fn test_damaged_breaker_file_starts_closed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("circuit_breaker.state");
    std::fs::write(&path, "state=SIDEWAYS\nno_progress_count=many\n").unwrap();

    let breaker = CircuitBreaker::load(&path, CircuitBreakerConfig::default()).unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn test_rate_log_is_shared_by_successive_processes() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("rate_limit.log");
    let config = RateLimitConfig {
        enabled: true,
        calls_per_hour: 3,
        warn_threshold_pct: 100,
        status_interval_secs: 30,
    };
    let now = Utc::now().timestamp();

    let first = RateLimiter::new(&log, &config);
    first.record_at(now - 4000).unwrap();
    first.record_at(now - 100).unwrap();
    first.record_at(now - 50).unwrap();

    let second = RateLimiter::new(&log, &config);
    assert_eq!(second.check_at("x", now).unwrap(), RateDecision::Allow);
    second.record_at(now).unwrap();
    match second.check_at("x", now).unwrap() {
        RateDecision::Block { used, until, .. } => {
            assert_eq!(used, 3);
            assert_eq!(until, now - 100 + 3600);
        }
        other => panic!("expected block, got {other:?}"),
    }
    // The hour-old entry was pruned from disk.
    assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 3);
}
