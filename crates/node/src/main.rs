//! usage-node - serves filesystem usage snapshots
//!
//! `serve` keeps the newest snapshots open and reloads them as re-scans
//! land; `info` prints record counts of the current snapshots.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use usage_core::mount_path_from_key;
use usage_node::config::Config;
use usage_node::discovery::find_latest_dirs;
use usage_node::provider::{Provider, State};
use usage_storage::BaseDirReader;

/// Usage node configuration
#[derive(Parser, Debug)]
#[command(name = "usage-node")]
#[command(about = "Serve filesystem usage snapshots")]
struct Args {
    /// Directory holding `<version>_<key>` snapshot directories
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Seconds between discovery passes
    #[arg(short, long, default_value = "0")]
    poll_interval: u64,

    /// Delete superseded snapshot directories
    #[arg(long)]
    remove_old: bool,

    /// Group owners CSV (gid,owner)
    #[arg(long)]
    owners: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "")]
    log_level: String,

    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the newest snapshots until interrupted
    Serve,
    /// Print record counts of the newest snapshots
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration from file if specified, otherwise use defaults
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)
            .with_context(|| format!("loading configuration from {:?}", config_path))?,
        None => Config::default(),
    };

    // Override config with command line arguments
    let mut overrides = Config::default();
    overrides.datasets.base_dir = args.base_dir.clone().unwrap_or_default();
    overrides.datasets.required_files.clear();
    overrides.datasets.poll_interval_secs = args.poll_interval;
    overrides.datasets.remove_old = args.remove_old;
    overrides.store.owners_path = args.owners.clone();
    overrides.log.level = args.log_level.clone();
    config.merge(overrides);

    // Initialize logging
    let level = match config.log.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    config.validate()?;
    info!("Dataset directory: {:?}", config.datasets.base_dir);

    match args.command {
        Command::Serve => serve(config).await,
        Command::Info => print_info(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let provider = Provider::open(config).await?;

    provider.on_update(|state| {
        info!("Now serving {} snapshot directories", state.dirs().len());
        for dir in state.dirs() {
            info!("  {:?}", dir);
        }
    });
    provider.on_error(|e| error!("Reload failed: {}", e));

    info!("Usage node is ready, serving {} directories", provider.dirs().len());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    provider.close().await?;
    Ok(())
}

async fn print_info(config: Config) -> anyhow::Result<()> {
    let state = tokio::task::spawn_blocking(move || -> anyhow::Result<State> {
        let datasets = &config.datasets;
        let discovered = find_latest_dirs(&datasets.base_dir, &datasets.required_files)?;
        if discovered.latest.is_empty() {
            anyhow::bail!("no datasets found in {:?}", datasets.base_dir);
        }
        Ok(State::open(discovered.latest, &config)?)
    })
    .await??;

    let tree = state.tree();
    let dir_info = tree.info();
    let base_dir_info = state.base_dirs().info();

    let mut mounts: Vec<_> = tree.mount_timestamps().into_iter().collect();
    mounts.sort();
    for (key, updated_at) in &mounts {
        println!("{}\t{}", mount_path_from_key(key), updated_at.to_rfc3339());
    }

    let (dirs, dir_err) = match dir_info {
        Ok(info) => (info, None),
        Err(e) => (e.partial, Some(e.error)),
    };
    println!("dirs: {}", dirs.num_dirs);
    println!("gutas: {}", dirs.num_gutas);
    println!("parents: {}", dirs.num_parents);
    println!("children: {}", dirs.num_children);

    let (base, base_err) = match base_dir_info {
        Ok(info) => (info, None),
        Err(e) => (e.partial, Some(e.error)),
    };
    println!("group dir combos: {}", base.group_dir_combos);
    println!("group mount combos: {}", base.group_mount_combos);
    println!("group histories: {}", base.group_histories);
    println!("group sub dir combos: {}", base.group_sub_dir_combos);
    println!("group sub dirs: {}", base.group_sub_dirs);
    println!("user dir combos: {}", base.user_dir_combos);
    println!("user sub dir combos: {}", base.user_sub_dir_combos);
    println!("user sub dirs: {}", base.user_sub_dirs);

    state.close()?;

    if let Some(e) = dir_err.or(base_err) {
        return Err(e.into());
    }
    Ok(())
}
