//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::infrastructure::config::ConfigOverrides;

pub use output::{handle_error, CommandOutput};

#[derive(Parser, Debug)]
#[command(name = "taskforge")]
#[command(about = "Filesystem-coordinated task orchestrator for autonomous coding agents", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Project directory holding the task queue and state
    #[arg(short = 'C', long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Agent identifier; namespaces locks and per-agent state
    #[arg(short, long, global = true)]
    pub agent_id: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Work through the task queue
    Run(commands::run::RunArgs),

    /// Show session, health, breaker, quota, and lock state
    Status,

    /// Move orphaned tasks from doing/ back to todo/
    Recover(commands::recover::RecoverArgs),

    /// Reset this agent's circuit breaker to CLOSED
    Reset,
}

impl Cli {
    /// Overrides shared by every subcommand.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            project_dir: self.project_dir.clone(),
            agent_id: self.agent_id.clone(),
            ..ConfigOverrides::default()
        }
    }
}

/// Dispatch a parsed command line.
pub async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let overrides = cli.overrides();
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, overrides, cli.json).await,
        Commands::Status => commands::status::execute(overrides, cli.json).map(|()| ExitCode::SUCCESS),
        Commands::Recover(args) => commands::recover::execute(args, overrides, cli.json).map(|()| ExitCode::SUCCESS),
        Commands::Reset => commands::reset::execute(overrides, cli.json).map(|()| ExitCode::SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::parse_from([
            "taskforge",
            "--json",
            "-C",
            "/work",
            "run",
            "--agent-id",
            "w2",
            "--autonomous",
            "--no-resume",
            "--model",
            "sonnet",
            "--max-iterations",
            "4",
        ]);
        assert!(cli.json);
        let overrides = cli.overrides();
        assert_eq!(overrides.agent_id.as_deref(), Some("w2"));
        assert_eq!(overrides.project_dir, Some(PathBuf::from("/work")));
        match cli.command {
            Commands::Run(args) => {
                assert!(args.autonomous);
                assert!(args.no_resume);
                assert_eq!(args.model.as_deref(), Some("sonnet"));
                assert_eq!(args.max_iterations, Some(4));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_recover_yes_flag() {
        let cli = Cli::parse_from(["taskforge", "recover", "--yes"]);
        assert!(matches!(cli.command, Commands::Recover(ref args) if args.yes));
    }
}
