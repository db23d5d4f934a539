//! autoheal CLI - Main Entry Point
//!
//! Runs end-to-end browser scenarios against a target application with
//! bounded retries and automatic recovery, and inspects or repairs the
//! local engine installation.

use std::path::PathBuf;
use std::process::ExitCode;

use autoheal_orchestrator::OrchestratorConfig;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{install, run, validate, DriverArgs};

/// Exit code for configuration and usage errors
const EXIT_CONFIG: u8 = 2;

/// autoheal - resilient headless-browser automation
#[derive(Parser)]
#[command(name = "autoheal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "AUTOHEAL_CONFIG", default_value = "autoheal.toml", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    driver: DriverArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, install, launch and run the configured scenarios
    Run(run::RunArgs),

    /// Check the engine installation without changing anything
    Validate(validate::ValidateArgs),

    /// Install the engine safely
    Install(install::InstallArgs),

    /// Show version information
    Version,
}

async fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    let config = OrchestratorConfig::load(&cli.config)?;
    match cli.command {
        Commands::Run(args) => run::execute(args, config, &cli.driver, cli.format).await,
        Commands::Validate(args) => validate::execute(args, config, &cli.driver, cli.format).await,
        Commands::Install(args) => install::execute(args, config, cli.format).await,
        Commands::Version => {
            println!("autoheal v{}", autoheal_common::VERSION);
            Ok(true)
        }
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<autoheal_common::Error>() {
        Some(e) if e.is_configuration() => EXIT_CONFIG,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(exit_code(&e))
        }
    }
}
