//! Agent CLI subprocess adapter.
//!
//! Runs `<command> <args..> <model_flag> <model>` in the project directory,
//! feeds the prompt on stdin, and sends stdout and stderr to the attempt log.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::models::AgentConfig;
use crate::domain::ports::{PhaseRequest, PhaseResult, PhaseRunner, TIMEOUT_EXIT_CODE};

/// Exit code reported when the child died from a signal.
const SIGNALLED_EXIT_CODE: i32 = -1;

/// Invokes the configured agent executable once per attempt.
#[derive(Debug, Clone)]
pub struct AgentCliRunner {
    command: String,
    args: Vec<String>,
    model_flag: String,
}

impl AgentCliRunner {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            model_flag: config.model_flag.clone(),
        }
    }

    fn build_command(&self, request: &PhaseRequest, log: &File) -> Result<Command> {
        let stdout = log.try_clone().context("Failed to share log handle with stdout")?;
        let stderr = log.try_clone().context("Failed to share log handle with stderr")?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if !self.model_flag.is_empty() {
            cmd.arg(&self.model_flag).arg(&request.model);
        }
        cmd.current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl PhaseRunner for AgentCliRunner {
    async fn run(&self, request: &PhaseRequest) -> Result<PhaseResult> {
        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let log = File::create(&request.log_path)
            .with_context(|| format!("Failed to create log {}", request.log_path.display()))?;

        let mut child = self
            .build_command(request, &log)?
            .spawn()
            .with_context(|| format!("Failed to spawn agent command '{}'", self.command))?;
        debug!(phase = %request.phase, pid = child.id(), model = %request.model, "agent started");

        // The prompt is fed concurrently so a child that never reads stdin
        // still runs into the phase timeout instead of a full pipe.
        let feeder = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "agent closed stdin before reading the full prompt");
                }
            })
        });

        let exit_code = match timeout(request.timeout, child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for agent process")?;
                status.code().unwrap_or(SIGNALLED_EXIT_CODE)
            }
            Err(_) => {
                warn!(phase = %request.phase, timeout_secs = request.timeout.as_secs(), "agent timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out agent");
                }
                append_note(&request.log_path, &format!(
                    "taskforge: phase '{}' timed out after {}s",
                    request.phase,
                    request.timeout.as_secs()
                ));
                TIMEOUT_EXIT_CODE
            }
        };
        if let Some(feeder) = feeder {
            feeder.abort();
        }

        Ok(PhaseResult {
            exit_code,
            log_path: request.log_path.clone(),
        })
    }
}

fn append_note(path: &std::path::Path, note: &str) {
    let written = OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{note}"));
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "could not annotate log");
    }
}
