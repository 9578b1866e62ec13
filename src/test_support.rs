//! Scripted port fakes shared by unit and integration tests.

#![allow(missing_docs)]

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::application::Adapters;
use crate::domain::ports::{
    ChangeDetector, PhaseRequest, PhaseResult, PhaseRunner, ProcessLiveness, RecoveryPrompt,
};

/// Plays back `(exit_code, log text)` pairs; succeeds once the script runs out.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<(i32, String)>>,
    calls: Mutex<Vec<PhaseRequest>>,
    delay: Duration,
}

impl ScriptedRunner {
    pub fn new(script: Vec<(i32, &str)>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(|(c, t)| (c, t.to_string())).collect()),
            ..Self::default()
        }
    }

    /// Yield for `delay` inside every invocation so concurrent agents interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<PhaseRequest> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl PhaseRunner for ScriptedRunner {
    async fn run(&self, request: &PhaseRequest) -> Result<PhaseResult> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let (exit_code, text) = next.unwrap_or_else(|| (0, "done\n".to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(parent) = request.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&request.log_path, text)?;
        Ok(PhaseResult {
            exit_code,
            log_path: request.log_path.clone(),
        })
    }
}

/// Reports a fixed answer for every comparison.
pub struct FixedChange(pub AtomicBool);

impl FixedChange {
    pub fn new(changed: bool) -> Self {
        Self(AtomicBool::new(changed))
    }
}

#[async_trait]
impl ChangeDetector for FixedChange {
    async fn capture_baseline(&self, _project_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn has_changed(&self, _project_dir: &Path) -> Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

pub struct AllAlive;

impl ProcessLiveness for AllAlive {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Only the listed pids are running.
pub struct LivePids(pub HashSet<u32>);

impl LivePids {
    pub fn all_of(pids: &[u32]) -> Self {
        Self(pids.iter().copied().collect())
    }
}

impl ProcessLiveness for LivePids {
    fn is_alive(&self, pid: u32) -> bool {
        self.0.contains(&pid)
    }
}

pub struct Answer(pub bool);

impl RecoveryPrompt for Answer {
    fn confirm(&self, _question: &str) -> bool {
        self.0
    }
}

/// Adapters with a scripted runner and a tree that always changes.
pub fn adapters(script: Vec<(i32, &str)>) -> Adapters {
    adapters_with(Arc::new(ScriptedRunner::new(script)), true)
}

/// Adapters where only this test process counts as a live lock holder.
pub fn adapters_with(runner: Arc<ScriptedRunner>, changed: bool) -> Adapters {
    Adapters {
        runner,
        detector: Arc::new(FixedChange::new(changed)),
        liveness: Arc::new(LivePids::all_of(&[std::process::id()])),
        prompt: Arc::new(Answer(true)),
    }
}
