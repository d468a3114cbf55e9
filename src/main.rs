// ABOUTME: Entry point for the keel CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use keel::config::{self, Config};
use keel::error::{EXIT_INVALID_INPUT, Result};
use keel::output::Output;
use keel::types::TagFilter;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_INVALID_INPUT } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = cli.output_mode();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            Output::new(mode).error(&e.to_string());
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let output = Output::new(cli.output_mode());

    match cli.command {
        Commands::Init { application, force } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, application.as_deref(), force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(0)
        }
        Commands::Hosts { tags } => {
            let config = load_config(cli.config)?;
            commands::hosts(config, tags.unwrap_or_else(TagFilter::any), output)?;
            Ok(0)
        }
        Commands::Deploy {
            artifact,
            tags,
            batch,
            max_failure_ratio,
            no_rollback,
        } => {
            let config = load_config(cli.config)?;
            let args = commands::DeployArgs {
                artifact,
                tags,
                batch,
                max_failure_ratio,
                no_rollback,
            };
            commands::deploy(config, args, output).await
        }
        Commands::Status { rollout } => {
            let config = load_config(cli.config)?;
            commands::status(config, rollout, output)?;
            Ok(0)
        }
        Commands::Cancel { rollout } => {
            let config = load_config(cli.config)?;
            commands::cancel(config, rollout, output)?;
            Ok(0)
        }
    }
}

fn load_config(path: Option<std::path::PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path),
        None => Config::discover(&env::current_dir()?),
    }
}
