// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::{Context, Result};
use archiver::Archiver;
use clap::{Parser, Subcommand};

mod commands;
mod common;
mod settings;

use settings::{Settings, load_config};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "repository-backup")]
struct Cli {
    /// YAML configuration file; flags and environment variables override it
    #[arg(short, long, env = "BACKUP_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive the repository as a new generation, then prune old generations
    Run,
    /// Delete generations beyond the retention count
    Prune,
    /// List generations, newest first, and the latest manifest
    List {
        /// Show at most this many generations
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.settings)?;
    log::debug!("Configuration: {:?}", config);

    let archiver = Archiver::from_config(config).context("Failed to open the remote store")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Run => commands::run_command(&archiver, &mut out).await,
        Commands::Prune => commands::prune_command(&archiver, &mut out).await,
        Commands::List { limit } => commands::list_command(&archiver, limit, &mut out).await,
    }
}
