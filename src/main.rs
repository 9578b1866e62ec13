//! Taskforge CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use taskforge::cli::{dispatch, handle_error, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            handle_error(err, json);
            ExitCode::FAILURE
        }
    }
}
