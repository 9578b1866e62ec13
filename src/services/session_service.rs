//! Per-agent session and health persistence.
//!
//! Both files live in the agent's state directory and are written only by
//! that agent, so atomic replacement is all the synchronization they need.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{HealthRecord, SessionRecord, SessionStatus};
use crate::infrastructure::state_file;

const SESSION_FILE: &str = "session.state";
const HEALTH_FILE: &str = "health.state";

/// Health status strings written to the health file.
pub mod health_status {
    pub const HEALTHY: &str = "healthy";
    pub const DEGRADED: &str = "degraded";
    pub const STAGNATED: &str = "stagnated";
    pub const STOPPED: &str = "stopped";
}

/// Reads and writes one agent's session and health records.
#[derive(Debug, Clone)]
pub struct SessionService {
    agent_dir: PathBuf,
    resume_enabled: bool,
}

impl SessionService {
    pub fn new(agent_dir: impl Into<PathBuf>, resume_enabled: bool) -> Self {
        Self {
            agent_dir: agent_dir.into(),
            resume_enabled,
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.agent_dir.join(SESSION_FILE)
    }

    pub fn health_path(&self) -> PathBuf {
        self.agent_dir.join(HEALTH_FILE)
    }

    /// Overwrite the session record.
    pub fn save_session(&self, session: &SessionRecord) -> DomainResult<()> {
        debug!(session_id = %session.session_id, status = %session.status, iteration = session.iteration, "saving session");
        state_file::write_record(&self.session_path(), &session.encode())
    }

    /// The previous session, if it was interrupted and resume is enabled.
    ///
    /// Missing, finished, or unreadable records all mean "start fresh".
    pub fn load_session(&self) -> DomainResult<Option<SessionRecord>> {
        if !self.resume_enabled {
            return Ok(None);
        }
        self.read_session().map(|found| {
            found.filter(|s| {
                let resumable = s.status == SessionStatus::Running;
                if !resumable {
                    debug!(status = %s.status, "previous session finished, starting fresh");
                }
                resumable
            })
        })
    }

    /// The stored session regardless of status, for reporting.
    pub fn read_session(&self) -> DomainResult<Option<SessionRecord>> {
        let path = self.session_path();
        let Some(raw) = state_file::read_record(&path)? else {
            return Ok(None);
        };
        match SessionRecord::decode(&raw, &path) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
                Ok(None)
            }
        }
    }

    pub fn clear_session(&self) -> DomainResult<()> {
        if state_file::remove_if_exists(&self.session_path())? {
            debug!("session cleared");
        }
        Ok(())
    }

    pub fn health(&self) -> DomainResult<Option<HealthRecord>> {
        let path = self.health_path();
        let Some(raw) = state_file::read_record(&path)? else {
            return Ok(None);
        };
        match HealthRecord::decode(&raw, &path) {
            Ok(health) => Ok(Some(health)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable health file");
                Ok(None)
            }
        }
    }

    pub fn consecutive_failures(&self) -> DomainResult<u32> {
        Ok(self.health()?.map_or(0, |h| h.consecutive_failures))
    }

    /// Overwrite status and message, keeping the failure count.
    pub fn update_health(&self, status: &str, message: &str) -> DomainResult<()> {
        let failures = self.consecutive_failures()?;
        self.write_health(status, message, failures)
    }

    /// A phase exhausted its retries.
    pub fn record_exhaustion(&self, message: &str) -> DomainResult<u32> {
        let failures = self.consecutive_failures()?.saturating_add(1);
        warn!(consecutive_failures = failures, "{message}");
        self.write_health(health_status::DEGRADED, message, failures)?;
        Ok(failures)
    }

    /// A phase succeeded; clears the failure count.
    pub fn record_success(&self, message: &str) -> DomainResult<()> {
        if self.consecutive_failures()? > 0 {
            info!("recovered after previous failures");
        }
        self.write_health(health_status::HEALTHY, message, 0)
    }

    fn write_health(&self, status: &str, message: &str, consecutive_failures: u32) -> DomainResult<()> {
        let record = HealthRecord {
            status: status.to_string(),
            message: message.to_string(),
            consecutive_failures,
            last_check: Utc::now(),
        };
        state_file::write_record(&self.health_path(), &record.encode())
    }

    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }
}
