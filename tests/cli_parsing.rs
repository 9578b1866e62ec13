use std::path::PathBuf;

use clap::Parser;
use taskforge::cli::{Cli, Commands};

#[test]
fn test_parse_run_defaults() {
    let cli = Cli::try_parse_from(["taskforge", "run"]).unwrap();
    assert!(!cli.json);
    assert!(cli.project_dir.is_none());
    match cli.command {
        Commands::Run(args) => {
            assert!(!args.autonomous);
            assert!(!args.no_resume);
            assert!(args.model.is_none());
            assert!(args.max_iterations.is_none());
        }
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_global_flags_apply_after_subcommand() {
    let cli = Cli::try_parse_from(["taskforge", "status", "--json", "-C", "/srv/repo", "-a", "w3"]).unwrap();
    assert!(cli.json);
    assert!(matches!(cli.command, Commands::Status));
    let overrides = cli.overrides();
    assert_eq!(overrides.project_dir, Some(PathBuf::from("/srv/repo")));
    assert_eq!(overrides.agent_id.as_deref(), Some("w3"));
    assert!(overrides.autonomous.is_none());
}

#[test]
fn test_parse_reset_and_recover() {
    assert!(matches!(
        Cli::try_parse_from(["taskforge", "reset"]).unwrap().command,
        Commands::Reset
    ));
    match Cli::try_parse_from(["taskforge", "recover", "-y"]).unwrap().command {
        Commands::Recover(args) => assert!(args.yes),
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_rejects_bad_iteration_count() {
    assert!(Cli::try_parse_from(["taskforge", "run", "--max-iterations", "many"]).is_err());
    assert!(Cli::try_parse_from(["taskforge", "frobnicate"]).is_err());
}
