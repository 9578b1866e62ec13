//! `taskforge run`

use std::fmt::Write as _;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use console::style;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::{install_signal_handlers, run, OrchestrationContext, RunOutcome, RunSummary};
use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::ConfigOverrides;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Recover orphans without asking
    #[arg(long)]
    pub autonomous: bool,

    /// Start a fresh session even if an interrupted one exists
    #[arg(long)]
    pub no_resume: bool,

    /// Model to start with instead of the configured one
    #[arg(short, long)]
    pub model: Option<String>,

    /// Stop after this many tasks
    #[arg(long)]
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct RunOutput(RunSummary);

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let summary = &self.0;
        let headline = match summary.outcome {
            RunOutcome::Drained => style("queue drained").green().to_string(),
            RunOutcome::IterationLimit => style("iteration limit reached").green().to_string(),
            RunOutcome::Interrupted => style("interrupted").yellow().to_string(),
            RunOutcome::Stagnated => style("stopped: stagnation").red().bold().to_string(),
            RunOutcome::Exhausted => style("stopped: retries exhausted").red().bold().to_string(),
        };

        let mut out = format!(
            "Session {}: {headline} after {} iteration(s)\n",
            summary.session_id, summary.iterations
        );
        if !summary.completed.is_empty() {
            let _ = writeln!(out, "Completed: {}", summary.completed.join(", "));
        }
        if !summary.recovered.is_empty() {
            let _ = writeln!(out, "Recovered orphans: {}", summary.recovered.join(", "));
        }
        if let Some(detail) = &summary.detail {
            let _ = writeln!(out, "{detail}");
        }
        out.trim_end().to_string()
    }
}

/// Process exit status for a finished run.
pub fn exit_status(outcome: RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Drained | RunOutcome::IterationLimit => 0,
        RunOutcome::Stagnated => 2,
        RunOutcome::Exhausted => 3,
        RunOutcome::Interrupted => 130,
    }
}

pub async fn execute(args: RunArgs, mut overrides: ConfigOverrides, json_mode: bool) -> Result<ExitCode> {
    if args.autonomous {
        overrides.autonomous = Some(true);
    }
    if args.no_resume {
        overrides.resume = Some(false);
    }
    let (config, _logger) = super::bootstrap(&overrides)?;

    let token = CancellationToken::new();
    install_signal_handlers(token.clone());

    let adapters = super::adapters(&config, config.autonomous);
    let mut ctx = OrchestrationContext::new(config, adapters, token, args.model.as_deref())?;
    let summary = run(&mut ctx, args.max_iterations).await?;

    let code = ExitCode::from(exit_status(summary.outcome));
    output(&RunOutput(summary), json_mode);
    Ok(code)
}
