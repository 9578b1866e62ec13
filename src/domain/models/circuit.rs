//! Persisted circuit-breaker state.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::kv::KvRecord;
use crate::domain::errors::{DomainError, DomainResult};

/// State of the stagnation breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Iterations flow normally.
    Closed,
    /// Progress has stalled; the next iterations are probes.
    HalfOpen,
    /// Execution is gated until the cooldown elapses.
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::HalfOpen => "HALF_OPEN",
            Self::Open => "OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(Self::Closed),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            "OPEN" => Ok(Self::Open),
            other => Err(DomainError::UnknownVariant {
                kind: "circuit state",
                value: other.to_string(),
            }),
        }
    }
}

/// Everything the breaker needs to survive a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitRecord {
    pub state: CircuitState,
    /// Successful iterations in a row without a working-tree change.
    pub no_progress_count: u32,
    /// Failed iterations in a row with the same error signature.
    pub same_error_count: u32,
    pub last_error_hash: Option<String>,
    /// Failed iterations in a row, regardless of signature.
    pub consecutive_failures: u32,
    /// Output byte lengths of the most recent iterations, oldest first.
    pub output_sizes: VecDeque<u64>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            no_progress_count: 0,
            same_error_count: 0,
            last_error_hash: None,
            consecutive_failures: 0,
            output_sizes: VecDeque::new(),
            opened_at: None,
        }
    }
}

impl CircuitRecord {
    pub fn encode(&self) -> KvRecord {
        let window = self
            .output_sizes
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");

        KvRecord::new()
            .with("state", self.state)
            .with("no_progress_count", self.no_progress_count)
            .with("same_error_count", self.same_error_count)
            .with("last_error_hash", self.last_error_hash.as_deref().unwrap_or(""))
            .with("consecutive_failures", self.consecutive_failures)
            .with("output_sizes", window)
            .with(
                "opened_at",
                self.opened_at.map(|t| t.timestamp().to_string()).unwrap_or_default(),
            )
    }

    pub fn decode(record: &KvRecord, path: &Path) -> DomainResult<Self> {
        let state = record.require("state", path)?.parse()?;
        let output_sizes = record
            .get("output_sizes")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse::<u64>().ok())
            .collect();

        Ok(Self {
            state,
            no_progress_count: record.parse_opt("no_progress_count").unwrap_or(0),
            same_error_count: record.parse_opt("same_error_count").unwrap_or(0),
            last_error_hash: record
                .get("last_error_hash")
                .filter(|h| !h.is_empty())
                .map(str::to_string),
            consecutive_failures: record.parse_opt("consecutive_failures").unwrap_or(0),
            output_sizes,
            opened_at: record
                .parse_opt::<i64>("opened_at")
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_record_round_trip() {
        let record = CircuitRecord {
            state: CircuitState::Open,
            no_progress_count: 3,
            same_error_count: 2,
            last_error_hash: Some("abc123".to_string()),
            consecutive_failures: 4,
            output_sizes: VecDeque::from(vec![100, 250, 90]),
            opened_at: Utc.timestamp_opt(1_700_000_000, 0).single(),
        };
        let path = Path::new("circuit_breaker.state");
        let text = record.encode().render();
        assert!(text.contains("state=OPEN"));
        assert!(text.contains("output_sizes=100,250,90"));
        assert_eq!(CircuitRecord::decode(&KvRecord::parse(&text), path).unwrap(), record);
    }

    #[test]
    fn test_default_round_trip() {
        let record = CircuitRecord::default();
        let text = record.encode().render();
        let decoded = CircuitRecord::decode(&KvRecord::parse(&text), Path::new("cb")).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let rec = KvRecord::parse("state=AJAR\n");
        assert!(CircuitRecord::decode(&rec, Path::new("cb")).is_err());
    }
}
