//! The vault daemon: loads configuration, starts every persona, waits for
//! network health, then runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use vault_config::VaultConfig;
use vault_dispatch::{LocalRouter, Router};
use vault_node::Vault;
use vault_types::{Identity, Key, MatrixChange, NodeId};

#[derive(Parser)]
#[command(name = "vaultd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the vault process.
    Start {
        /// Explicit config file path; highest precedence over XDG/env/defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Run a single in-memory node instead of loading persisted config.
        #[arg(long)]
        development: bool,
        /// Minimum attempts to poll network health before giving up.
        #[arg(long, default_value_t = 50)]
        health_attempts: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Start { config, development, health_attempts } => {
            start(config, development, health_attempts).await
        }
    }
}

async fn start(config_path: Option<PathBuf>, development: bool, health_attempts: u32) -> Result<()> {
    let config = if development {
        VaultConfig::development()
    } else if let Some(path) = config_path {
        VaultConfig::load_from_path(path).context("failed to load configuration")?
    } else {
        VaultConfig::load().context("failed to load configuration")?
    };

    info!(data_dir = %config.node.data_dir.display(), bind = %config.node.bind_address, "starting vaultd");

    // No real overlay transport is wired up yet; a vault runs as a local,
    // simulated single node until a `Router` binding is supplied.
    let self_id: NodeId = Identity::derive_from(config.node.bind_address.as_bytes());
    let router: Arc<dyn Router> = Arc::new(LocalRouter::new(100));
    let no_transfer: Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync> =
        Arc::new(|_, _| None);

    let vault = Vault::new(self_id, &config, router, no_transfer.clone(), no_transfer)
        .context("failed to start vault personas")?;

    vault
        .wait_for_network_health(
            config.network.min_network_health,
            Duration::from_millis(100),
            health_attempts,
        )
        .await
        .context("network health never reached the required threshold")?;

    info!("vault is ready, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;

    info!("shutting down");
    vault.shutdown().await.context("error during shutdown")?;
    info!("vaultd stopped");

    Ok(())
}
