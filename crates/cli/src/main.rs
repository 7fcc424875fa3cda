//! apphost CLI - Main Entry Point
//!
//! Publishes, launches and probes test applications with the apphost
//! deployment harness.

use std::path::PathBuf;

use anyhow::Context;
use apphost_harness::HarnessConfig;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{config, deploy, probe};

/// apphost - publish and host web applications for integration tests
#[derive(Parser)]
#[command(name = "apphost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file (TOML)
    #[arg(long, global = true, env = "APPHOST_CONFIG")]
    config: Option<PathBuf>,

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
    /// Restore, publish and launch an application
    Deploy(deploy::DeployArgs),

    /// GET a URL with retries
    Probe(probe::ProbeArgs),

    /// Inspect configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let harness_config = load_config(cli.config.as_ref())?;

    let outcome = match cli.command {
        Commands::Deploy(args) => deploy::execute(args, harness_config, cli.format).await,
        Commands::Probe(args) => probe::execute(args, harness_config).await,
        Commands::Config(cmd) => config::execute(cmd, &harness_config, cli.format),
        Commands::Version => {
            println!("apphost v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = outcome {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
