mod commands;
mod server;
mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "azure-exporter")]
#[command(about = "Prometheus exporter for Azure Batch and Storage resources", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll Azure and serve the collected metrics
    Serve {
        /// Path to configuration file (YAML, TOML, or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address override
        #[arg(short, long)]
        address: Option<String>,

        /// Listen port override
        #[arg(short, long)]
        port: Option<u16>,

        /// Update interval override, in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Subscription to scrape
        #[arg(short, long, env = "AZURE_SUBSCRIPTION_ID")]
        subscription: Option<String>,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flags when set
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve {
            config,
            address,
            port,
            interval,
            subscription,
        } => {
            let overrides = commands::serve::Overrides {
                address,
                port,
                interval,
                subscription,
            };
            commands::serve::execute(config, overrides).await?;
        }

        Commands::Validate { config_file } => {
            commands::validate::execute(config_file).await?;
        }
    }

    Ok(())
}
