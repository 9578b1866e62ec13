//! Domain errors for the taskforge orchestrator.

use std::path::PathBuf;

use thiserror::Error;

/// Domain-level errors that can occur while reading or mutating queue state.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid task file name: {0}")]
    InvalidTaskName(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {task_id} is already in {location}")]
    TaskAlreadyIn { task_id: String, location: String },

    #[error("Malformed state file {path}: {reason}")]
    MalformedStateFile { path: PathBuf, reason: String },

    #[error("Missing field '{field}' in {path}")]
    MissingField { path: PathBuf, field: String },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DomainError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used across the domain and service layers.
pub type DomainResult<T> = Result<T, DomainError>;
