//! flexd - overlay store and activation engine CLI.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flexd_core::activator::Activator;
use flexd_core::etc_manager::EtcManager;
use flexd_core::io::fetch::Fetcher;
use flexd_core::manifest::Manifest;
use flexd_core::store::Store;
use flexd_core::systemd::{RecordingSystemdManager, SystemctlManager};

use config::Config;

#[derive(Debug, Parser)]
#[command(name = "flexd")]
#[command(author, version, about = "overlay store and activation engine")]
struct Cli {
    /// Path to an optional flexd.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install every package in the manifest and bring systemd in line with it.
    Apply {
        /// Path to the manifest JSON file.
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Compute, but do not apply, the systemd deltas a manifest would produce.
    /// Does not install packages or touch `/etc` or systemd.
    Diff {
        /// Path to the manifest JSON file.
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Print the currently active generation.
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let default_config_path = PathBuf::from("/etc/flexd/config.toml");
    let config_path = cli.config.as_deref().unwrap_or(&default_config_path);
    let config = Config::load(Some(config_path))?;

    match cli.command {
        Commands::Apply { manifest } => apply(&config, &manifest).await,
        Commands::Diff { manifest } => diff(&config, &manifest).await,
        Commands::Status => status(&config),
    }
}

async fn apply(config: &Config, manifest_path: &PathBuf) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let store = Store::new(&config.root_dir);
    let etc_manager = EtcManager::new(&config.etc_root, store.states_dir());
    let fetcher = Fetcher::new(config.fetch_timeout)?;
    let systemd = Arc::new(SystemctlManager);
    let activator = Activator::new(store, etc_manager, fetcher, systemd);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let deltas = activator.apply_manifest(&manifest, &cancel).await?;
    tracing::info!(
        to_stop = ?deltas.to_stop,
        to_start = ?deltas.to_start,
        to_restart = ?deltas.to_restart,
        to_reload = ?deltas.to_reload,
        "activation complete"
    );
    Ok(())
}

async fn diff(config: &Config, manifest_path: &PathBuf) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let store = Store::new(&config.root_dir);
    let etc_manager = EtcManager::new(&config.etc_root, store.states_dir());
    let fetcher = Fetcher::new(config.fetch_timeout)?;
    let systemd = Arc::new(RecordingSystemdManager::new());
    let activator = Activator::new(store, etc_manager, fetcher, systemd);

    let deltas = activator.plan(&manifest)?;
    println!("stop:    {:?}", deltas.to_stop);
    println!("start:   {:?}", deltas.to_start);
    println!("restart: {:?}", deltas.to_restart);
    println!("reload:  {:?}", deltas.to_reload);
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let store = Store::new(&config.root_dir);
    let etc_manager = EtcManager::new(&config.etc_root, store.states_dir());
    match etc_manager.current_static_target() {
        Some(target) => println!("active generation: {}", target.display()),
        None => println!("no generation has been activated yet"),
    }
    match last_recorded_version(&store)? {
        Some(version) => println!("last recorded manifest version: {version}"),
        None => println!("no manifest has been recorded yet"),
    }
    Ok(())
}

/// The version of the most recently written `<root>/configs/<version>.json`
/// file, by modification time.
fn last_recorded_version(store: &Store) -> Result<Option<String>> {
    let configs_dir = store.configs_dir();
    if !configs_dir.is_dir() {
        return Ok(None);
    }
    let mut latest: Option<(std::time::SystemTime, String)> = None;
    for entry in std::fs::read_dir(configs_dir)? {
        let entry = entry?;
        let modified = entry.metadata()?.modified()?;
        let Some(stem) = entry.path().file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
            latest = Some((modified, stem));
        }
    }
    Ok(latest.map(|(_, version)| version))
}
