//! Task selection and orphan recovery.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskLocation};
use crate::domain::ports::RecoveryPrompt;
use crate::services::lock_manager::{LockManager, LockStatus, StaleReason};
use crate::services::task_queue::TaskQueue;

/// How a task in `doing/` relates to the lock table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanKind {
    /// No lock file at all.
    NoLock,
    /// A lock exists but its holder is dead, expired, or unreadable.
    Stale,
    /// A live peer is working on it. Not an orphan.
    Locked,
}

impl OrphanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLock => "no-lock",
            Self::Stale => "stale",
            Self::Locked => "locked",
        }
    }
}

/// A task in `doing/` that nobody is working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub task: Task,
    pub kind: OrphanKind,
}

/// Result of a recovery decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Moved back to `todo/`.
    Recovered(Task),
    /// The operator said no; the task stays where it is.
    Declined,
    /// Another agent got there first.
    Skipped,
}

/// Picks the next task for one agent.
pub struct TaskSelector<'a> {
    queue: &'a TaskQueue,
    locks: &'a mut LockManager,
}

impl<'a> TaskSelector<'a> {
    pub fn new(queue: &'a TaskQueue, locks: &'a mut LockManager) -> Self {
        Self { queue, locks }
    }

    /// The agent's own interrupted work first, then the first claimable task
    /// in `todo/`. `Ok(None)` means the queue is drained.
    ///
    /// The returned task is locked by this agent; moving it is up to the caller.
    pub fn next_task(&mut self) -> DomainResult<Option<Task>> {
        for task in self.queue.list(TaskLocation::Doing)? {
            if self.locks.holds(&task.id) {
                return Ok(Some(task));
            }
            if let LockStatus::Own(previous) = self.locks.inspect(&task.id)? {
                if self.locks.acquire(&task.id)? {
                    info!(task_id = %task.id, previous_pid = previous.pid, "resuming own interrupted task");
                    return Ok(Some(task));
                }
            }
        }

        for task in self.queue.list(TaskLocation::Todo)? {
            match self.locks.inspect(&task.id)? {
                LockStatus::Peer(record) => {
                    debug!(task_id = %task.id, holder = %record.agent_id, "skipping task locked by peer");
                    continue;
                }
                LockStatus::Absent | LockStatus::Own(_) | LockStatus::Stale { .. } => {}
            }
            if self.locks.acquire(&task.id)? {
                // Peers only move tasks under the lock, so a file still in
                // todo/ now belongs to us.
                if task.path.exists() {
                    return Ok(Some(task));
                }
                debug!(task_id = %task.id, "task moved by a peer before we locked it");
                self.locks.release(&task.id)?;
                continue;
            }
            debug!(task_id = %task.id, "lost acquisition race, trying next task");
        }

        Ok(None)
    }

    /// Classify a task sitting in `doing/`. Returns `None` if it is this
    /// agent's own work.
    pub fn classify(&self, task: &Task) -> DomainResult<Option<OrphanKind>> {
        if self.locks.holds(&task.id) {
            return Ok(None);
        }
        Ok(match self.locks.inspect(&task.id)? {
            LockStatus::Own(_) => None,
            LockStatus::Absent => Some(OrphanKind::NoLock),
            LockStatus::Stale { .. } => Some(OrphanKind::Stale),
            LockStatus::Peer(_) => Some(OrphanKind::Locked),
        })
    }

    /// Every task in `doing/` without a valid live lock, in queue order.
    pub fn orphans(&self) -> DomainResult<Vec<Orphan>> {
        let mut found = Vec::new();
        for task in self.queue.list(TaskLocation::Doing)? {
            match self.classify(&task)? {
                Some(kind @ (OrphanKind::NoLock | OrphanKind::Stale)) => {
                    warn!(task_id = %task.id, kind = kind.as_str(), "orphaned task found");
                    found.push(Orphan { task, kind });
                }
                Some(OrphanKind::Locked) | None => {}
            }
        }
        Ok(found)
    }

    /// First task in `doing/` without a valid live lock.
    pub fn find_orphan(&self) -> DomainResult<Option<Orphan>> {
        Ok(self.orphans()?.into_iter().next())
    }

    /// Move an orphan back to `todo/`, asking first unless `autonomous`.
    pub fn recover_orphan(
        &mut self,
        orphan: &Orphan,
        autonomous: bool,
        prompt: &dyn RecoveryPrompt,
    ) -> DomainResult<RecoveryOutcome> {
        if !autonomous {
            let question = format!(
                "Task {} is in doing/ with {} lock. Move it back to todo/?",
                orphan.task.id,
                match orphan.kind {
                    OrphanKind::NoLock => "no",
                    OrphanKind::Stale => "a stale",
                    OrphanKind::Locked => "a live",
                }
            );
            if !prompt.confirm(&question) {
                info!(task_id = %orphan.task.id, "orphan recovery declined, leaving task in place");
                return Ok(RecoveryOutcome::Declined);
            }
        }

        // Take the lock so two agents cannot recover the same orphan.
        if !self.locks.acquire(&orphan.task.id)? {
            debug!(task_id = %orphan.task.id, "orphan claimed by another agent");
            return Ok(RecoveryOutcome::Skipped);
        }
        if !orphan.task.path.exists() {
            debug!(task_id = %orphan.task.id, "orphan already recovered by another agent");
            self.locks.release(&orphan.task.id)?;
            return Ok(RecoveryOutcome::Skipped);
        }

        let result = self.queue.move_to(&orphan.task, TaskLocation::Todo);
        self.locks.release(&orphan.task.id)?;
        let recovered = result?;
        info!(task_id = %recovered.id, kind = orphan.kind.as_str(), "orphan recovered to todo");
        Ok(RecoveryOutcome::Recovered(recovered))
    }
}

/// Human-readable reason for a stale lock.
pub fn describe_stale(reason: StaleReason) -> &'static str {
    match reason {
        StaleReason::HolderDead => "holder process is not running",
        StaleReason::Expired => "lock exceeded its timeout",
        StaleReason::Corrupt => "lock file is unreadable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LockRecord, TaskId};
    use crate::domain::ports::ProcessLiveness;
    use crate::infrastructure::state_file;
    use crate::test_support::{Answer, LivePids};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        queue: TaskQueue,
        a: LockManager,
        b: LockManager,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let queue = TaskQueue::new(dir.path().join("tasks"));
        queue.ensure_layout().unwrap();
        for (location, name) in files {
            fs::write(queue.root().join(location).join(name), "task\n").unwrap();
        }
        let live: Arc<dyn ProcessLiveness> = Arc::new(LivePids::all_of(&[100, 200]));
        let locks = dir.path().join("locks");
        Fixture {
            a: LockManager::new(&locks, "agent-a", 7200, live.clone()).with_pid(100),
            b: LockManager::new(&locks, "agent-b", 7200, live).with_pid(200),
            queue,
            _dir: dir,
        }
    }

    #[test]
    fn test_next_task_follows_order_and_skips_peer_locks() {
        let mut f = fixture(&[("todo", "002-001-b.md"), ("todo", "001-001-a.md")]);

        let first = TaskSelector::new(&f.queue, &mut f.a).next_task().unwrap().unwrap();
        assert_eq!(first.id.as_str(), "001-001-a");

        let second = TaskSelector::new(&f.queue, &mut f.b).next_task().unwrap().unwrap();
        assert_eq!(second.id.as_str(), "002-001-b");

        let mut c = LockManager::new(f.a.locks_dir(), "agent-c", 7200, Arc::new(LivePids::all_of(&[100, 200])));
        assert!(TaskSelector::new(&f.queue, &mut c).next_task().unwrap().is_none());
    }

    #[test]
    fn test_next_task_prefers_own_doing_task() {
        let mut f = fixture(&[("todo", "001-001-a.md"), ("doing", "005-001-mine.md")]);
        let mine = TaskId::parse("005-001-mine").unwrap();
        // Left behind by an earlier process of the same agent.
        let record = LockRecord::new("agent-a", 99, mine.as_str());
        state_file::write_record(&f.a.lock_path(&mine), &record.encode()).unwrap();

        let task = TaskSelector::new(&f.queue, &mut f.a).next_task().unwrap().unwrap();
        assert_eq!(task.id, mine);
        assert_eq!(task.location, TaskLocation::Doing);
        assert!(f.a.holds(&mine));
    }

    #[test]
    fn test_next_task_reclaims_stale_todo_lock() {
        let mut f = fixture(&[("todo", "001-001-a.md")]);
        let id = TaskId::parse("001-001-a").unwrap();
        let dead = LockRecord::new("agent-x", 4444, id.as_str());
        state_file::write_record(&f.a.lock_path(&id), &dead.encode()).unwrap();

        let task = TaskSelector::new(&f.queue, &mut f.a).next_task().unwrap().unwrap();
        assert_eq!(task.id, id);
    }

    #[test]
    fn test_orphan_classification() {
        let mut f = fixture(&[("doing", "003-001-x.md")]);
        let task = f.queue.list(TaskLocation::Doing).unwrap().remove(0);

        let orphan = TaskSelector::new(&f.queue, &mut f.a).find_orphan().unwrap().unwrap();
        assert_eq!(orphan.kind, OrphanKind::NoLock);

        assert!(f.b.acquire(&task.id).unwrap());
        let selector = TaskSelector::new(&f.queue, &mut f.a);
        assert_eq!(selector.classify(&task).unwrap(), Some(OrphanKind::Locked));
        assert!(selector.find_orphan().unwrap().is_none());
    }

    #[test]
    fn test_stale_orphan_detected() {
        let mut f = fixture(&[("doing", "003-001-x.md")]);
        let id = TaskId::parse("003-001-x").unwrap();
        let dead = LockRecord::new("agent-b", 4444, id.as_str());
        state_file::write_record(&f.a.lock_path(&id), &dead.encode()).unwrap();

        let orphan = TaskSelector::new(&f.queue, &mut f.a).find_orphan().unwrap().unwrap();
        assert_eq!(orphan.kind, OrphanKind::Stale);
    }

    #[test]
    fn test_recover_autonomous_moves_to_todo_and_clears_lock() {
        let mut f = fixture(&[("doing", "003-001-x.md")]);
        let id = TaskId::parse("003-001-x").unwrap();
        let dead = LockRecord::new("agent-b", 4444, id.as_str());
        state_file::write_record(&f.a.lock_path(&id), &dead.encode()).unwrap();

        let mut selector = TaskSelector::new(&f.queue, &mut f.a);
        let orphan = selector.find_orphan().unwrap().unwrap();
        let outcome = selector.recover_orphan(&orphan, true, &Answer(false)).unwrap();

        match outcome {
            RecoveryOutcome::Recovered(task) => assert_eq!(task.location, TaskLocation::Todo),
            other => panic!("expected recovery, got {other:?}"),
        }
        assert!(!f.a.lock_path(&id).exists());
        assert!(!f.a.holds(&id));
    }

    #[test]
    fn test_declined_recovery_leaves_task() {
        let mut f = fixture(&[("doing", "003-001-x.md")]);
        let mut selector = TaskSelector::new(&f.queue, &mut f.a);
        let orphan = selector.find_orphan().unwrap().unwrap();

        let outcome = selector.recover_orphan(&orphan, false, &Answer(false)).unwrap();
        assert_eq!(outcome, RecoveryOutcome::Declined);
        assert_eq!(f.queue.list(TaskLocation::Doing).unwrap().len(), 1);
    }

    #[test]
    fn test_interactive_approval_recovers() {
        let mut f = fixture(&[("doing", "003-001-x.md")]);
        let mut selector = TaskSelector::new(&f.queue, &mut f.a);
        let orphan = selector.find_orphan().unwrap().unwrap();

        let outcome = selector.recover_orphan(&orphan, false, &Answer(true)).unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Recovered(_)));
        assert_eq!(f.queue.list(TaskLocation::Todo).unwrap().len(), 1);
    }

    #[test]
    fn test_orphan_recovered_by_peer_is_skipped() {
        let mut f = fixture(&[("doing", "003-001-x.md")]);
        let orphan = TaskSelector::new(&f.queue, &mut f.a).find_orphan().unwrap().unwrap();

        let by_b = TaskSelector::new(&f.queue, &mut f.b)
            .recover_orphan(&orphan, true, &Answer(true))
            .unwrap();
        assert!(matches!(by_b, RecoveryOutcome::Recovered(_)));

        let by_a = TaskSelector::new(&f.queue, &mut f.a)
            .recover_orphan(&orphan, true, &Answer(true))
            .unwrap();
        assert_eq!(by_a, RecoveryOutcome::Skipped);
        assert!(!f.a.holds(&orphan.task.id));
        assert_eq!(f.queue.list(TaskLocation::Todo).unwrap().len(), 1);
    }
}
