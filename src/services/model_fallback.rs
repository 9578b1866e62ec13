//! Model de-escalation on quota and overload failures.
//!
//! When a failed attempt's log looks like the provider refused the call for
//! capacity reasons, later attempts in the same run use a weaker model from
//! the fallback table. The first successful phase restores the original.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use regex::RegexSet;
use tracing::{debug, info};

use crate::domain::models::AgentConfig;

/// Only the end of a log is scanned for signatures.
const SCAN_BYTES: u64 = 64 * 1024;

/// Tracks the active model for one run.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    original: String,
    current: String,
    fallbacks: HashMap<String, String>,
    signatures: RegexSet,
}

impl ModelSelector {
    /// `model` overrides the configured default when given.
    pub fn new(agent: &AgentConfig, model: Option<&str>) -> Result<Self, regex::Error> {
        let original = model.unwrap_or(&agent.model).to_string();
        Ok(Self {
            current: original.clone(),
            original,
            fallbacks: agent.fallback_models.clone(),
            signatures: RegexSet::new(&agent.quota_signatures)?,
        })
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn is_degraded(&self) -> bool {
        self.current != self.original
    }

    /// Resume with the model a previous session had switched to.
    pub fn restore(&mut self, model: &str) {
        if !model.is_empty() {
            self.current = model.to_string();
        }
    }

    pub fn matches_quota(&self, text: &str) -> bool {
        self.signatures.is_match(text)
    }

    /// Inspect a failed attempt's log; returns the new model if one was chosen.
    pub fn on_failure(&mut self, log_path: &Path) -> Option<&str> {
        let tail = read_tail(log_path)?;
        if !self.matches_quota(&tail) {
            return None;
        }
        let Some(next) = self.fallbacks.get(&self.current) else {
            debug!(model = %self.current, "quota failure but no weaker model configured");
            return None;
        };
        info!(from = %self.current, to = %next, "quota or overload detected, switching model");
        self.current.clone_from(next);
        Some(&self.current)
    }

    pub fn on_success(&mut self) {
        if self.is_degraded() {
            info!(from = %self.current, to = %self.original, "phase succeeded, restoring model");
            self.current.clone_from(&self.original);
        }
    }
}

fn read_tail(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    if len > SCAN_BYTES {
        file.seek(SeekFrom::Start(len - SCAN_BYTES)).ok()?;
    }
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
