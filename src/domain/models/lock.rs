//! Per-task lock records.

use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use super::kv::KvRecord;
use crate::domain::errors::{DomainError, DomainResult};

/// Contents of a `<task_id>.lock` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Agent that owns the lock.
    pub agent_id: String,
    /// Process id of the holder at acquisition (or last heartbeat).
    pub pid: u32,
    /// Acquisition time, refreshed by heartbeats.
    pub locked_at: DateTime<Utc>,
    /// Task the lock protects.
    pub task_id: String,
}

impl LockRecord {
    pub fn new(agent_id: impl Into<String>, pid: u32, task_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            pid,
            locked_at: Utc::now(),
            task_id: task_id.into(),
        }
    }

    /// Seconds since acquisition (or the last heartbeat), never negative.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.locked_at).num_seconds().max(0)
    }

    pub fn encode(&self) -> KvRecord {
        KvRecord::new()
            .with("agentID", &self.agent_id)
            .with("lockedAt", self.locked_at.to_rfc3339())
            .with("pid", self.pid)
            .with("taskID", &self.task_id)
    }

    pub fn decode(record: &KvRecord, path: &Path) -> DomainResult<Self> {
        let raw_ts = record.require("lockedAt", path)?;
        let locked_at = parse_timestamp(raw_ts).ok_or_else(|| DomainError::MalformedStateFile {
            path: path.to_path_buf(),
            reason: format!("unparseable lockedAt '{raw_ts}'"),
        })?;

        Ok(Self {
            agent_id: record.require("agentID", path)?.to_string(),
            pid: record.parse_field("pid", path)?,
            locked_at,
            task_id: record.require("taskID", path)?.to_string(),
        })
    }
}

/// Parse a lock timestamp.
///
/// Accepts RFC 3339, ISO-like `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD HH:MM:SS`
/// in local time, and bare epoch seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|ts| ts.with_timezone(&Utc));
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}
