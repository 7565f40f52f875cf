//! `mailslice` - browse offline folder caches from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailslice_core::Config;

#[derive(Parser)]
#[command(name = "mailslice", version, about = "Browse offline mail folder caches")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache database (defaults to the platform data directory)
    #[arg(long, global = true, env = "MAILSLICE_DB", value_name = "PATH")]
    db: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "MAILSLICE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached headers, newest first
    List {
        /// Folder to read
        #[arg(short, long)]
        folder: String,
        /// How many days back from now
        #[arg(short, long, default_value_t = 7, value_parser = clap::value_parser!(i64).range(0..))]
        days: i64,
        /// Maximum number of headers (defaults to the configured limit)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the accuracy ranges and block directories of a folder
    Accuracy {
        /// Folder to inspect
        #[arg(short, long)]
        folder: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("mailslice").join("cache.db"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailslice=info,mailslice_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match cli.config.or_else(Config::default_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    let db = cli
        .db
        .or_else(default_db_path)
        .context("No data directory available; pass --db")?;
    let store = commands::open_store(&db).await?;

    match cli.command {
        Commands::List {
            folder,
            days,
            limit,
            json,
        } => commands::list(store, &config, &folder, days, limit, json).await,
        Commands::Accuracy { folder, json } => {
            commands::accuracy(store, &config, &folder, json).await
        }
    }
}
