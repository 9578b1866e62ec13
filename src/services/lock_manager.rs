//! Per-task mutual exclusion over a shared directory.
//!
//! Acquisition is serialized per task by a short-lived mutex directory
//! (`<task>.acquire/`): `mkdir` either creates it or fails, so two agents can
//! never both pass the check-then-write window. The lock itself is a flat
//! key/value file replaced atomically.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LockRecord, TaskId};
use crate::domain::ports::ProcessLiveness;
use crate::infrastructure::state_file;

/// An acquisition mutex older than this is left over from a crashed acquirer.
const ACQUIRE_MUTEX_STALE_SECS: u64 = 30;

/// Why a lock may be reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// The recorded pid is not a running process.
    HolderDead,
    /// The lock has not been refreshed within the timeout.
    Expired,
    /// The lock file could not be parsed.
    Corrupt,
}

/// What a lock file says about a task, from the calling agent's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Absent,
    /// Held by this process, or left behind by a dead earlier process of the
    /// same agent id.
    Own(LockRecord),
    /// Held by another live process, including one sharing this agent id.
    Peer(LockRecord),
    Stale {
        record: Option<LockRecord>,
        reason: StaleReason,
    },
}

impl LockStatus {
    /// `true` only when another live agent holds the task.
    pub fn is_locked_by_peer(&self) -> bool {
        matches!(self, Self::Peer(_))
    }
}

/// Removes the acquisition mutex on every exit path.
struct AcquireGuard {
    path: PathBuf,
}

impl Drop for AcquireGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove acquisition mutex");
            }
        }
    }
}

/// Lock manager for one agent.
pub struct LockManager {
    locks_dir: PathBuf,
    agent_id: String,
    pid: u32,
    timeout: Duration,
    liveness: Arc<dyn ProcessLiveness>,
    held: BTreeSet<String>,
}

impl LockManager {
    pub fn new(
        locks_dir: impl Into<PathBuf>,
        agent_id: impl Into<String>,
        timeout_secs: u64,
        liveness: Arc<dyn ProcessLiveness>,
    ) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            agent_id: agent_id.into(),
            pid: std::process::id(),
            timeout: Duration::seconds(
                i64::try_from(timeout_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
            liveness,
            held: BTreeSet::new(),
        }
    }

    /// Override the pid written into lock files.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn locks_dir(&self) -> &Path {
        &self.locks_dir
    }

    /// Task ids this process currently holds.
    pub fn held(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(String::as_str)
    }

    pub fn holds(&self, task_id: &TaskId) -> bool {
        self.held.contains(task_id.as_str())
    }

    pub fn lock_path(&self, task_id: &TaskId) -> PathBuf {
        self.locks_dir.join(format!("{task_id}.lock"))
    }

    fn mutex_path(&self, task_id: &TaskId) -> PathBuf {
        self.locks_dir.join(format!("{task_id}.acquire"))
    }

    /// Try to take the lock on `task_id`.
    ///
    /// Returns `Ok(false)` on contention: either another agent is inside the
    /// acquisition window right now, or a live peer holds the lock. Callers
    /// move on to the next task instead of spinning.
    pub fn acquire(&mut self, task_id: &TaskId) -> DomainResult<bool> {
        let Some(_guard) = self.enter_mutex(task_id)? else {
            debug!(task_id = %task_id, "acquisition in progress elsewhere, backing off");
            return Ok(false);
        };

        match self.inspect(task_id)? {
            LockStatus::Peer(record) => {
                debug!(task_id = %task_id, holder = %record.agent_id, pid = record.pid, "task locked by peer");
                return Ok(false);
            }
            LockStatus::Stale { record, reason } => {
                info!(
                    task_id = %task_id,
                    holder = record.as_ref().map(|r| r.agent_id.as_str()).unwrap_or("unknown"),
                    reason = ?reason,
                    "reclaiming stale lock"
                );
            }
            LockStatus::Own(_) | LockStatus::Absent => {}
        }

        let record = LockRecord::new(&self.agent_id, self.pid, task_id.as_str());
        state_file::write_record(&self.lock_path(task_id), &record.encode())?;
        self.held.insert(task_id.to_string());
        info!(task_id = %task_id, agent_id = %self.agent_id, "lock acquired");
        Ok(true)
    }

    /// Release a lock held by this agent. Another agent's lock is never touched.
    pub fn release(&mut self, task_id: &TaskId) -> DomainResult<bool> {
        self.held.remove(task_id.as_str());

        let path = self.lock_path(task_id);
        let Some(raw) = state_file::read_record(&path)? else {
            return Ok(false);
        };
        match LockRecord::decode(&raw, &path) {
            Ok(record) if self.owns(&record) => {
                let removed = state_file::remove_if_exists(&path)?;
                if removed {
                    info!(task_id = %task_id, "lock released");
                }
                Ok(removed)
            }
            Ok(record) => {
                debug!(task_id = %task_id, holder = %record.agent_id, pid = record.pid, "not releasing lock owned by another process");
                Ok(false)
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "not releasing unreadable lock");
                Ok(false)
            }
        }
    }

    /// Release every lock this process holds. Errors are logged, not returned,
    /// so one bad file cannot keep the rest locked.
    pub fn release_all(&mut self) -> usize {
        let ids: Vec<String> = self.held.iter().cloned().collect();
        let mut released = 0;
        for raw in ids {
            let Ok(task_id) = TaskId::parse(&raw) else {
                self.held.remove(&raw);
                continue;
            };
            match self.release(&task_id) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => warn!(task_id = %task_id, error = %e, "failed to release lock"),
            }
        }
        released
    }

    /// Why `record` may be reclaimed, if at all.
    pub fn is_stale(&self, record: &LockRecord) -> Option<StaleReason> {
        if !self.liveness.is_alive(record.pid) {
            return Some(StaleReason::HolderDead);
        }
        if record.age_secs(Utc::now()) > self.timeout.num_seconds() {
            return Some(StaleReason::Expired);
        }
        None
    }

    /// Classify the lock on `task_id` for this agent.
    pub fn inspect(&self, task_id: &TaskId) -> DomainResult<LockStatus> {
        let path = self.lock_path(task_id);
        let Some(raw) = state_file::read_record(&path)? else {
            return Ok(LockStatus::Absent);
        };
        let record = match LockRecord::decode(&raw, &path) {
            Ok(record) => record,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "corrupt lock file");
                return Ok(LockStatus::Stale {
                    record: None,
                    reason: StaleReason::Corrupt,
                });
            }
        };

        if self.owns(&record) {
            return Ok(LockStatus::Own(record));
        }
        Ok(match self.is_stale(&record) {
            Some(reason) => LockStatus::Stale {
                record: Some(record),
                reason,
            },
            None => LockStatus::Peer(record),
        })
    }

    /// Same agent id, and either this process or a holder that is gone.
    fn owns(&self, record: &LockRecord) -> bool {
        record.agent_id == self.agent_id
            && (record.pid == self.pid || !self.liveness.is_alive(record.pid))
    }

    /// Delete the lock on `task_id` if, under the acquisition mutex, it is
    /// still stale. Returns whether a file was removed.
    pub fn reclaim_stale(&self, task_id: &TaskId) -> DomainResult<bool> {
        let Some(_guard) = self.enter_mutex(task_id)? else {
            return Ok(false);
        };
        match self.inspect(task_id)? {
            LockStatus::Stale { reason, .. } => {
                info!(task_id = %task_id, reason = ?reason, "removing stale lock");
                state_file::remove_if_exists(&self.lock_path(task_id))
            }
            _ => Ok(false),
        }
    }

    /// Refresh the timestamp on a held lock.
    ///
    /// Returns `Ok(false)` if the lock is no longer ours.
    pub fn heartbeat(&self, task_id: &TaskId) -> DomainResult<bool> {
        self.heartbeat_handle(task_id).beat()
    }

    /// A detachable handle for refreshing `task_id` from a background task.
    pub fn heartbeat_handle(&self, task_id: &TaskId) -> LockHeartbeat {
        LockHeartbeat {
            locks_dir: self.locks_dir.clone(),
            path: self.lock_path(task_id),
            mutex: self.mutex_path(task_id),
            agent_id: self.agent_id.clone(),
            pid: self.pid,
            task_id: task_id.to_string(),
        }
    }

    /// Every lock file currently present, classified for this agent.
    pub fn list(&self) -> DomainResult<Vec<(TaskId, LockStatus)>> {
        let entries = match fs::read_dir(&self.locks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DomainError::io(&self.locks_dir, e)),
        };

        let mut locks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DomainError::io(&self.locks_dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(task_id) = TaskId::parse(stem) {
                let status = self.inspect(&task_id)?;
                locks.push((task_id, status));
            }
        }
        locks.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(locks)
    }

    fn enter_mutex(&self, task_id: &TaskId) -> DomainResult<Option<AcquireGuard>> {
        enter_mutex(&self.locks_dir, self.mutex_path(task_id))
    }
}

/// Create the acquisition mutex at `path`, clearing one abandoned by a crashed agent.
fn enter_mutex(locks_dir: &Path, path: PathBuf) -> DomainResult<Option<AcquireGuard>> {
    fs::create_dir_all(locks_dir).map_err(|e| DomainError::io(locks_dir, e))?;

    match fs::create_dir(&path) {
        Ok(()) => Ok(Some(AcquireGuard { path })),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if mutex_is_abandoned(&path) {
                warn!(path = %path.display(), "removing abandoned acquisition mutex");
                if let Err(e) = fs::remove_dir(&path) {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove abandoned acquisition mutex");
                    }
                }
            }
            Ok(None)
        }
        Err(e) => Err(DomainError::io(path, e)),
    }
}

fn mutex_is_abandoned(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > StdDuration::from_secs(ACQUIRE_MUTEX_STALE_SECS))
}

/// Refreshes one lock file; cheap to clone into a background task.
#[derive(Debug, Clone)]
pub struct LockHeartbeat {
    locks_dir: PathBuf,
    path: PathBuf,
    mutex: PathBuf,
    agent_id: String,
    pid: u32,
    task_id: String,
}

impl LockHeartbeat {
    /// Rewrite the lock's timestamp if this process still holds it.
    ///
    /// Runs under the acquisition mutex. While a peer holds the mutex the
    /// beat is skipped and the lock is reported as still held.
    pub fn beat(&self) -> DomainResult<bool> {
        let Some(_guard) = enter_mutex(&self.locks_dir, self.mutex.clone())? else {
            debug!(task_id = %self.task_id, "acquisition mutex busy, skipping heartbeat");
            return Ok(true);
        };
        let Some(raw) = state_file::read_record(&self.path)? else {
            return Ok(false);
        };
        let mut record = LockRecord::decode(&raw, &self.path)?;
        if record.agent_id != self.agent_id || record.pid != self.pid {
            return Ok(false);
        }
        record.locked_at = Utc::now();
        state_file::write_record(&self.path, &record.encode())?;
        debug!(task_id = %self.task_id, "lock heartbeat");
        Ok(true)
    }

    /// Beat every `interval` until `token` is cancelled.
    pub fn spawn(self, interval: StdDuration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; the lock was just written.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => match self.beat() {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(task_id = %self.task_id, "lock lost while phase running");
                            break;
                        }
                        Err(e) => warn!(task_id = %self.task_id, error = %e, "heartbeat failed"),
                    },
                }
            }
        })
    }
}
