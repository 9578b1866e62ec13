//! Session and health records, one of each per agent.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kv::KvRecord;
use super::lock::parse_timestamp;
use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// In progress; finding this at startup means the previous run was interrupted.
    Running,
    Completed,
    Stagnated,
    Exhausted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stagnated => "stagnated",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "stagnated" => Ok(Self::Stagnated),
            "exhausted" => Ok(Self::Exhausted),
            other => Err(DomainError::UnknownVariant {
                kind: "session status",
                value: other.to_string(),
            }),
        }
    }
}

/// Resumable run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub status: SessionStatus,
    pub model: String,
    pub log_dir: PathBuf,
    pub iteration: u32,
    pub task_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn encode(&self) -> KvRecord {
        KvRecord::new()
            .with("session_id", &self.session_id)
            .with("status", self.status)
            .with("model", &self.model)
            .with("log_dir", self.log_dir.display())
            .with("iteration", self.iteration)
            .with("task_id", self.task_id.as_deref().unwrap_or(""))
            .with("updated_at", self.updated_at.to_rfc3339())
    }

    pub fn decode(record: &KvRecord, path: &Path) -> DomainResult<Self> {
        let raw_ts = record.require("updated_at", path)?;
        Ok(Self {
            session_id: record.require("session_id", path)?.to_string(),
            status: record.require("status", path)?.parse()?,
            model: record.get("model").unwrap_or_default().to_string(),
            log_dir: PathBuf::from(record.get("log_dir").unwrap_or_default()),
            iteration: record.parse_opt("iteration").unwrap_or(0),
            task_id: record
                .get("task_id")
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            updated_at: parse_timestamp(raw_ts).ok_or_else(|| DomainError::MalformedStateFile {
                path: path.to_path_buf(),
                reason: format!("unparseable updated_at '{raw_ts}'"),
            })?,
        })
    }
}

/// Externally observable health of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    pub status: String,
    pub message: String,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
}

impl HealthRecord {
    pub fn encode(&self) -> KvRecord {
        KvRecord::new()
            .with("status", &self.status)
            .with("message", &self.message)
            .with("consecutive_failures", self.consecutive_failures)
            .with("last_check", self.last_check.to_rfc3339())
    }

    pub fn decode(record: &KvRecord, path: &Path) -> DomainResult<Self> {
        let raw_ts = record.require("last_check", path)?;
        Ok(Self {
            status: record.require("status", path)?.to_string(),
            message: record.get("message").unwrap_or_default().to_string(),
            consecutive_failures: record.parse_opt("consecutive_failures").unwrap_or(0),
            last_check: parse_timestamp(raw_ts).ok_or_else(|| DomainError::MalformedStateFile {
                path: path.to_path_buf(),
                reason: format!("unparseable last_check '{raw_ts}'"),
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_round_trip() {
        let session = SessionRecord {
            session_id: "4b6f".to_string(),
            status: SessionStatus::Running,
            model: "opus".to_string(),
            log_dir: PathBuf::from(".taskforge/logs/4b6f"),
            iteration: 7,
            task_id: Some("001-001-a".to_string()),
            updated_at: Utc::now(),
        };
        let path = Path::new("session.state");
        let decoded = SessionRecord::decode(&KvRecord::parse(&session.encode().render()), path)
            .unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn test_health_round_trip() {
        let health = HealthRecord {
            status: "degraded".to_string(),
            message: "retries exhausted on 002-003-y".to_string(),
            consecutive_failures: 2,
            last_check: Utc::now(),
        };
        let path = Path::new("health.state");
        let decoded = HealthRecord::decode(&KvRecord::parse(&health.encode().render()), path)
            .unwrap();
        assert_eq!(decoded, health);
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("paused".parse::<SessionStatus>().is_err());
        assert_eq!("running".parse::<SessionStatus>().unwrap(), SessionStatus::Running);
    }
}
