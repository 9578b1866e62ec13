//! Task identity and queue locations.
//!
//! A task's state is nothing more than the directory it lives in. The file
//! name carries its identity: `<priority>-<sequence>-<slug>.<ext>`.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// One of the four queue directories a task can reside in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLocation {
    Blocked,
    Todo,
    Doing,
    Done,
}

impl TaskLocation {
    /// All locations, in queue order.
    pub const ALL: [Self; 4] = [Self::Blocked, Self::Todo, Self::Doing, Self::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskLocation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocked" => Ok(Self::Blocked),
            "todo" => Ok(Self::Todo),
            "doing" => Ok(Self::Doing),
            "done" => Ok(Self::Done),
            other => Err(DomainError::UnknownVariant {
                kind: "task location",
                value: other.to_string(),
            }),
        }
    }
}

/// Stable task identifier parsed from a task file stem.
///
/// Ordering is priority prefix, then sequence, then the full id, with numeric
/// comparison wherever the prefix parses as a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    raw: String,
    priority: String,
    sequence: String,
}

impl TaskId {
    /// Parse a task id such as `003-001-fix-login`.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let mut parts = raw.splitn(3, '-');
        let priority = parts.next().unwrap_or_default();
        let sequence = parts.next().unwrap_or_default();
        let slug = parts.next().unwrap_or_default();

        if priority.is_empty() || sequence.is_empty() || slug.is_empty() {
            return Err(DomainError::InvalidTaskName(raw.to_string()));
        }
        if raw.contains(['/', '\\']) || raw.starts_with('.') {
            return Err(DomainError::InvalidTaskName(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            priority: priority.to_string(),
            sequence: sequence.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn priority(&self) -> &str {
        &self.priority
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_segment(&self.priority, &other.priority)
            .then_with(|| compare_segment(&self.sequence, &other.sequence))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A task document found in one of the queue locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub location: TaskLocation,
    pub path: PathBuf,
}

impl Task {
    /// Build a task from a document path inside `location`.
    ///
    /// Hidden files and files without an extension-separated stem are rejected.
    pub fn from_path(path: &Path, location: TaskLocation) -> Result<Self, DomainError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DomainError::InvalidTaskName(path.display().to_string()))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);

        Ok(Self {
            id: TaskId::parse(stem)?,
            location,
            path: path.to_path_buf(),
        })
    }

    /// File name of the task document, unchanged across moves.
    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.path.file_name().unwrap_or_default()
    }
}
