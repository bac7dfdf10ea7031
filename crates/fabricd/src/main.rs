//! fabricd — the Fabric daemon.
//!
//! Single binary that assembles the VNF policy control plane:
//! - State store (redb, on disk or in memory)
//! - Object model seeded from configuration
//! - Flow-rule engine
//! - Netmaster (VNF and VNF policy managers) restored from the store
//! - Change logger driven by store watches
//!
//! # Usage
//!
//! ```text
//! fabricd run --config /etc/fabric/fabric.toml --data-dir /var/lib/fabric
//! fabricd config --config /etc/fabric/fabric.toml
//! ```

mod daemon;
mod intents;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use fabric_core::FabricConfig;

#[derive(Parser)]
#[command(name = "fabricd", about = "Fabric VNF policy daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane until interrupted.
    Run {
        /// Path to fabric.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory; overrides `store.path` with `<dir>/fabric.redb`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// JSON file of VNF and VNF policy intents to apply after restore.
        #[arg(long)]
        intents: Option<PathBuf>,
    },

    /// Print the effective configuration.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fabricd=debug,fabric=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            intents,
        } => {
            let config = load_config(config.as_deref())?;
            daemon::run(config, data_dir, intents).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FabricConfig> {
    match path {
        Some(path) => FabricConfig::from_file(path),
        None => Ok(FabricConfig::default()),
    }
}
