//! Bootstrap and key-management tool for a vault deployment.
//!
//! Mutually exclusive operation groups, mirroring the original bootstrap
//! tool: exactly one of `create-keys`/`load-keys`/`delete-keys`, each with
//! an optional `--print`, followed by at most one of `bootstrap`,
//! `store-verify`, or `test`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use vault_cli::{chunk_test, keychain};
use vault_config::VaultConfig;
use vault_dispatch::{LocalRouter, Router};
use vault_node::Vault;
use vault_types::{Identity, Key, MatrixChange, NodeId};

#[derive(Parser)]
#[command(name = "vault-admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: KeyCommand,
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Create keys and write them to file.
    CreateKeys {
        #[arg(long, default_value_t = 1)]
        pmids_count: usize,
        #[arg(long, default_value = "vaultd-keys.chain")]
        keys_path: PathBuf,
        #[arg(long)]
        print: bool,
        #[command(subcommand)]
        operation: Option<Operation>,
    },
    /// Load keys from file.
    LoadKeys {
        #[arg(long, default_value = "vaultd-keys.chain")]
        keys_path: PathBuf,
        #[arg(long)]
        print: bool,
        #[command(subcommand)]
        operation: Option<Operation>,
    },
    /// Delete the key-chain file.
    DeleteKeys {
        #[arg(long, default_value = "vaultd-keys.chain")]
        keys_path: PathBuf,
    },
}

#[derive(Subcommand)]
enum Operation {
    /// Run bootstrap nodes only, using the first two keys.
    Bootstrap {
        #[arg(long)]
        peer: Option<String>,
    },
    /// Store then verify keys are reachable on the network.
    StoreVerify {
        #[arg(long)]
        peer: Option<String>,
        #[arg(long, default_value_t = 0)]
        key_index: usize,
    },
    /// Run a simple test that stores, fetches, and deletes chunks.
    Test {
        #[arg(long)]
        peer: Option<String>,
        #[arg(long, default_value_t = 0)]
        key_index: usize,
        #[arg(long, default_value = "vaultd-chunks")]
        chunk_path: PathBuf,
        #[arg(long, default_value_t = 1)]
        chunk_set_count: usize,
        #[arg(long, default_value_t = 0)]
        chunk_index: usize,
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
        KeyCommand::CreateKeys { pmids_count, keys_path, print, operation } => {
            let chain = keychain::generate(pmids_count);
            keychain::write(&keys_path, &chain)
                .with_context(|| format!("failed to write keys to {}", keys_path.display()))?;
            println!("Wrote {} keys to {}", chain.len(), keys_path.display());
            if print {
                print_keys(&chain);
            }
            run_operation(operation, &chain).await
        }
        KeyCommand::LoadKeys { keys_path, print, operation } => {
            let chain = keychain::read(&keys_path)
                .with_context(|| format!("failed to load keys from {}", keys_path.display()))?;
            println!("Loaded {} keys from {}", chain.len(), keys_path.display());
            if print {
                print_keys(&chain);
            }
            run_operation(operation, &chain).await
        }
        KeyCommand::DeleteKeys { keys_path } => {
            keychain::delete(&keys_path)
                .with_context(|| format!("failed to delete {}", keys_path.display()))?;
            println!("Deleted {}", keys_path.display());
            Ok(())
        }
    }
}

fn print_keys(chain: &[Identity]) {
    for (i, id) in chain.iter().enumerate() {
        let bootstrap = if i < 2 { " (bootstrap)" } else { "" };
        println!("\t{i}\t{id}{bootstrap}");
    }
}

async fn run_operation(operation: Option<Operation>, chain: &[Identity]) -> Result<()> {
    match operation {
        None => Ok(()),
        Some(Operation::Bootstrap { peer }) => handle_bootstrap(chain, peer.as_deref()).await,
        Some(Operation::StoreVerify { peer, key_index }) => {
            handle_store_verify(chain, peer.as_deref(), key_index)
        }
        Some(Operation::Test { key_index, chunk_path, chunk_set_count, chunk_index, .. }) => {
            handle_test(chain, key_index, &chunk_path, chunk_set_count, chunk_index)
        }
    }
}

async fn handle_bootstrap(chain: &[Identity], peer: Option<&str>) -> Result<()> {
    if chain.len() < 2 {
        bail!("bootstrap requires at least 2 keys, found {}", chain.len());
    }
    let self_id: NodeId = chain[0];
    let mut config = VaultConfig::development();
    if let Some(peer) = peer {
        config.network.bootstrap_peers.push(peer.to_string());
    }
    let router: std::sync::Arc<dyn Router> = std::sync::Arc::new(LocalRouter::new(100));
    let no_transfer: std::sync::Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync> =
        std::sync::Arc::new(|_, _| None);
    let vault = Vault::new(self_id, &config, router, no_transfer.clone(), no_transfer)?;
    vault.wait_for_network_health(
        config.network.min_network_health,
        std::time::Duration::from_millis(10),
        5,
    )
    .await?;
    vault.shutdown().await?;
    println!("Bootstrap pair ready: {} {}", chain[0], chain[1]);
    Ok(())
}

fn handle_store_verify(chain: &[Identity], _peer: Option<&str>, key_index: usize) -> Result<()> {
    let identity = chain.get(key_index).with_context(|| format!("no key at index {key_index}"))?;
    let store_path = std::env::temp_dir().join("vaultd-store-verify");
    let report = chunk_test::run(&store_path, 1, usize::MAX)
        .context("store/verify smoke test failed")?;
    println!("Stored and verified {} chunk(s) for key {}", report.verified, identity);
    Ok(())
}

fn handle_test(
    chain: &[Identity],
    key_index: usize,
    chunk_path: &std::path::Path,
    chunk_set_count: usize,
    chunk_index: usize,
) -> Result<()> {
    let identity = chain.get(key_index).with_context(|| format!("no key at index {key_index}"))?;
    let report = chunk_test::run(chunk_path, chunk_set_count, chunk_index)
        .context("chunk store test failed")?;
    println!(
        "Client {identity}: stored {}, verified {}, deleted {:?}",
        report.stored, report.verified, report.deleted
    );
    Ok(())
}
