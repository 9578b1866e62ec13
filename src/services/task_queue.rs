//! The four-directory task queue.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskId, TaskLocation};

/// Filesystem-backed queue rooted at a directory containing
/// `blocked/`, `todo/`, `doing/`, and `done/`.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    root: PathBuf,
}

impl TaskQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, location: TaskLocation) -> PathBuf {
        self.root.join(location.as_str())
    }

    /// Create any missing location directories.
    pub fn ensure_layout(&self) -> DomainResult<()> {
        for location in TaskLocation::ALL {
            let dir = self.dir(location);
            fs::create_dir_all(&dir).map_err(|e| DomainError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Tasks in `location`, in selection order. Files whose names are not
    /// task ids (README, dotfiles) are ignored.
    pub fn list(&self, location: TaskLocation) -> DomainResult<Vec<Task>> {
        let dir = self.dir(location);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DomainError::io(&dir, e)),
        };

        let mut tasks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DomainError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match Task::from_path(&path, location) {
                Ok(task) => tasks.push(task),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping non-task file"),
            }
        }
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    /// Locate a task by id in any location.
    pub fn find(&self, task_id: &TaskId) -> DomainResult<Option<Task>> {
        for location in TaskLocation::ALL {
            if let Some(task) = self.list(location)?.into_iter().find(|t| &t.id == task_id) {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Move a task by renaming its document. Never copies, never overwrites.
    pub fn move_to(&self, task: &Task, to: TaskLocation) -> DomainResult<Task> {
        if task.location == to {
            return Err(DomainError::TaskAlreadyIn {
                task_id: task.id.to_string(),
                location: to.to_string(),
            });
        }
        let dir = self.dir(to);
        fs::create_dir_all(&dir).map_err(|e| DomainError::io(&dir, e))?;
        let target = dir.join(task.file_name());
        if target.exists() {
            return Err(DomainError::TaskAlreadyIn {
                task_id: task.id.to_string(),
                location: to.to_string(),
            });
        }

        fs::rename(&task.path, &target).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                DomainError::TaskNotFound(task.id.to_string())
            } else {
                DomainError::io(&task.path, e)
            }
        })?;
        info!(task_id = %task.id, from = %task.location, to = %to, "task moved");

        Ok(Task {
            id: task.id.clone(),
            location: to,
            path: target,
        })
    }
}
