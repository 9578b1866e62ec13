//! Lock contention between agents sharing one locks directory.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};
use common::LivePids;
use taskforge::domain::models::LockRecord;
use taskforge::infrastructure::state_file;
use taskforge::services::LockStatus;
use taskforge::{LockManager, TaskId};
use tempfile::TempDir;

fn manager(dir: &TempDir, agent: &str, pid: u32, live: &[u32]) -> LockManager {
    LockManager::new(dir.path().join("locks"), agent, 7200, Arc::new(LivePids::all_of(live))).with_pid(pid)
}

#[test]
fn test_exactly_one_agent_wins_a_race() {
    let dir = TempDir::new().unwrap();
    let task = TaskId::parse("001-001-contended").unwrap();
    let agents = 8u32;
    let live: Vec<u32> = (1..=agents).collect();
    let barrier = Arc::new(Barrier::new(agents as usize));

    let handles: Vec<_> = (1..=agents)
        .map(|pid| {
            let mut locks = manager(&dir, &format!("agent-{pid}"), pid, &live);
            let barrier = Arc::clone(&barrier);
            let task = task.clone();
            thread::spawn(move || {
                barrier.wait();
                locks.acquire(&task).unwrap()
            })
        })
        .collect();

    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
    assert_eq!(winners, 1);

    let path = dir.path().join("locks/001-001-contended.lock");
    let record = LockRecord::decode(&state_file::read_record(&path).unwrap().unwrap(), &path).unwrap();
    assert!(record.agent_id.starts_with("agent-"));
    assert_eq!(record.task_id, "001-001-contended");
    // The acquisition mutex never outlives an attempt.
    assert!(!dir.path().join("locks/001-001-contended.acquire").exists());
}

#[test]
fn test_peer_lock_blocks_until_released() {
    let dir = TempDir::new().unwrap();
    let task = TaskId::parse("002-001-shared").unwrap();
    let mut a = manager(&dir, "a", 10, &[10, 20]);
    let mut b = manager(&dir, "b", 20, &[10, 20]);

    assert!(a.acquire(&task).unwrap());
    assert!(!b.acquire(&task).unwrap());
    assert!(b.inspect(&task).unwrap().is_locked_by_peer());

    // A peer's lock is never released by someone else.
    assert!(!b.release(&task).unwrap());
    assert!(a.lock_path(&task).exists());

    assert!(a.release(&task).unwrap());
    assert!(b.acquire(&task).unwrap());
}

#[test]
fn test_dead_holder_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let task = TaskId::parse("003-001-crashed").unwrap();
    let mut crashed = manager(&dir, "crashed", 4444, &[4444]);
    assert!(crashed.acquire(&task).unwrap());

    let mut survivor = manager(&dir, "survivor", 20, &[20]);
    assert!(matches!(survivor.inspect(&task).unwrap(), LockStatus::Stale { .. }));
    assert!(survivor.acquire(&task).unwrap());
    assert!(matches!(survivor.inspect(&task).unwrap(), LockStatus::Own(_)));
}

#[test]
fn test_expired_lock_is_reclaimed_even_if_pid_is_alive() {
    let dir = TempDir::new().unwrap();
    let task = TaskId::parse("004-001-slow").unwrap();
    let mut old = LockRecord::new("sleepy", 30, task.as_str());
    old.locked_at = Utc::now() - Duration::hours(3);
    state_file::write_record(&dir.path().join("locks/004-001-slow.lock"), &old.encode()).unwrap();

    let mut b = manager(&dir, "b", 20, &[20, 30]);
    assert!(b.acquire(&task).unwrap());
}

#[test]
fn test_heartbeat_keeps_a_long_lock_fresh() {
    let dir = TempDir::new().unwrap();
    let task = TaskId::parse("005-001-long").unwrap();
    let mut a = manager(&dir, "a", 10, &[10]);
    assert!(a.acquire(&task).unwrap());

    let path = a.lock_path(&task);
    let mut record = LockRecord::decode(&state_file::read_record(&path).unwrap().unwrap(), &path).unwrap();
    record.locked_at = Utc::now() - Duration::hours(3);
    state_file::write_record(&path, &record.encode()).unwrap();

    assert!(a.heartbeat(&task).unwrap());
    let mut b = manager(&dir, "b", 20, &[10, 20]);
    assert!(b.inspect(&task).unwrap().is_locked_by_peer());
    assert!(!b.acquire(&task).unwrap());
}

#[test]
fn test_release_all_frees_every_held_lock() {
    let dir = TempDir::new().unwrap();
    let mut a = manager(&dir, "a", 10, &[10]);
    let ids: Vec<TaskId> = ["001-001-x", "001-002-y", "002-001-z"]
        .iter()
        .map(|raw| TaskId::parse(raw).unwrap())
        .collect();
    for id in &ids {
        assert!(a.acquire(id).unwrap());
    }

    assert_eq!(a.release_all(), 3);
    assert_eq!(a.held().count(), 0);
    assert!(a.list().unwrap().is_empty());
}
