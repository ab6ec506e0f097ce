use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imagescan::config::{Config, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "imagescan",
    version,
    about = "Recurring vulnerability scans for container images declared in community repositories",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the service configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run reconciliation, execution and maintenance on their schedules
    Run,

    /// Reconcile every owner once and exit
    Reconcile,

    /// Reconcile, run one execution wave and exit when it drains
    Tick,

    /// Validate the configuration
    Check {
        /// Also lint a local scan config YAML file
        #[arg(long)]
        scan_config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    // Initialize tracing/logging
    setup_tracing(&config.logging, cli.log_format.as_deref(), cli.verbose)?;

    tracing::info!(
        config = %cli.config.display(),
        owners = config.communities.len(),
        "imagescan starting"
    );

    match cli.command {
        Commands::Run => commands::run(config).await?,
        Commands::Reconcile => commands::reconcile(config).await?,
        Commands::Tick => commands::tick(config).await?,
        Commands::Check { scan_config } => {
            commands::check(&config, scan_config.as_deref()).await?
        }
    }

    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, format: Option<&str>, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("imagescan=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
            .context("Invalid log level")?
    };

    match format.unwrap_or(&logging.format) {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
