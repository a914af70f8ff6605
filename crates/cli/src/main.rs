//! ContractProbe CLI - Main Entry Point
//!
//! Runs contract tests against an OpenAPI-described REST service and
//! reports the results.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{diff, plan, run, wait_ready, EXIT_FATAL};

/// ContractProbe - contract tests for REST APIs
#[derive(Parser)]
#[command(name = "contractprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = contractprobe_common::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Base URL of the API under test (overrides the config file)
    #[arg(long, env = "CONTRACTPROBE_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the contract tests
    Run(run::RunArgs),

    /// Show the execution plan
    Plan(plan::PlanArgs),

    /// Wait for the API health endpoint
    WaitReady(wait_ready::WaitReadyArgs),

    /// Diff two JSON documents
    Diff(diff::DiffArgs),

    /// Show version information
    Version,
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = || commands::load_config(&cli.config, cli.base_url.as_deref());

    match cli.command {
        Commands::Run(args) => run::execute(args, config()?, cli.format).await,
        Commands::Plan(args) => plan::execute(args, config()?, cli.format).await,
        Commands::WaitReady(args) => wait_ready::execute(args, config()?, cli.format).await,
        Commands::Diff(args) => diff::execute(args, cli.format).await,
        Commands::Version => {
            println!("ContractProbe v{}", contractprobe_common::VERSION);
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Run events are printed from the event stream, not through tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "{},contractprobe_common::events=off",
                    log_level
                ))
            }),
        )
        .with_target(false)
        .init();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            EXIT_FATAL
        }
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
