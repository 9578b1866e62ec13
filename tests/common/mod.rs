//! Common test utilities for integration tests
//!
//! Fixtures for a project directory with a task queue, plus the crate's
//! scripted port fakes.

#![allow(dead_code)]

use std::fs;

use tempfile::TempDir;

use taskforge::{Config, TaskLocation};

pub use taskforge::test_support::{adapters_with as adapters, Answer, FixedChange, LivePids, ScriptedRunner};

/// Configuration for `agent_id` in the project at `dir`.
pub fn config(dir: &TempDir, agent_id: &str) -> Config {
    Config {
        project_dir: dir.path().to_path_buf(),
        agent_id: agent_id.to_string(),
        autonomous: true,
        phases: vec!["implement".to_string()],
        ..Config::default()
    }
}

/// Drop a task document into `location`.
pub fn add_task(config: &Config, location: TaskLocation, name: &str) {
    let dir = config.queue_root().join(location.as_str());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), format!("Task {name}\n")).unwrap();
}

/// Task ids currently in `location`, sorted.
pub fn ids_in(config: &Config, location: TaskLocation) -> Vec<String> {
    let dir = config.queue_root().join(location.as_str());
    let mut ids: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.path()
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    ids.sort();
    ids
}
