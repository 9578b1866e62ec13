//! `taskforge recover`

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::domain::ports::{ProcessLiveness, RecoveryPrompt};
use crate::infrastructure::config::ConfigOverrides;
use crate::infrastructure::{SignalProbe, TerminalPrompt};
use crate::services::{LockManager, RecoveryOutcome, TaskQueue, TaskSelector};

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Recover every orphan without asking
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct RecoverReport {
    pub recovered: Vec<String>,
    pub declined: Vec<String>,
    /// Claimed by another agent mid-recovery.
    pub skipped: Vec<String>,
}

impl CommandOutput for RecoverReport {
    fn to_human(&self) -> String {
        if self.recovered.is_empty() && self.declined.is_empty() && self.skipped.is_empty() {
            return "No orphaned tasks.".to_string();
        }
        let mut out = String::new();
        for (label, ids) in [
            ("Recovered to todo/", &self.recovered),
            ("Left in doing/", &self.declined),
            ("Claimed by another agent", &self.skipped),
        ] {
            if !ids.is_empty() {
                let _ = writeln!(out, "{label}: {}", ids.join(", "));
            }
        }
        out.trim_end().to_string()
    }
}

/// Apply the recovery decision to every orphan in `doing/`.
pub fn recover_all(
    config: &Config,
    liveness: Arc<dyn ProcessLiveness>,
    approve_all: bool,
    prompt: &dyn RecoveryPrompt,
) -> Result<RecoverReport> {
    let queue = TaskQueue::new(config.queue_root());
    let mut locks = LockManager::new(config.locks_dir(), config.agent_id.clone(), config.lock.timeout_secs, liveness);
    let mut selector = TaskSelector::new(&queue, &mut locks);

    let orphans = selector.orphans()?;
    let mut report = RecoverReport::default();
    for orphan in orphans {
        let id = orphan.task.id.to_string();
        match selector.recover_orphan(&orphan, approve_all, prompt)? {
            RecoveryOutcome::Recovered(_) => report.recovered.push(id),
            RecoveryOutcome::Declined => report.declined.push(id),
            RecoveryOutcome::Skipped => report.skipped.push(id),
        }
    }
    Ok(report)
}

pub fn execute(args: RecoverArgs, overrides: ConfigOverrides, json_mode: bool) -> Result<()> {
    let (config, _logger) = super::bootstrap(&overrides)?;
    let approve_all = args.yes || config.autonomous;
    let report = recover_all(&config, Arc::new(SignalProbe), approve_all, &TerminalPrompt::new())?;
    output(&report, json_mode);
    Ok(())
}
