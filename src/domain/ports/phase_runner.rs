use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Exit code reported when a phase is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// One invocation of the external agent.
#[derive(Debug, Clone)]
pub struct PhaseRequest {
    /// Phase name, for logging only.
    pub phase: String,
    pub prompt: String,
    pub model: String,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Where the captured stdout/stderr must be written.
    pub log_path: PathBuf,
}

/// What the core is allowed to know about a finished invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseResult {
    pub exit_code: i32,
    pub log_path: PathBuf,
}

impl PhaseResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Opaque agent subprocess.
///
/// Dropping the returned future must terminate the underlying process.
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    async fn run(&self, request: &PhaseRequest) -> Result<PhaseResult>;
}
