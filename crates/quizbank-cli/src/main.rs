//! Quizbank CLI
//!
//! Administrative access to the problem cache: raw queries, background
//! saves, vote-threshold sweeps, snapshots and per-user lookups.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quizbank_core::CacheConfig;
use quizbank_store::ProblemCache;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quizbank")]
#[command(author, version, about = "Quizbank - problem cache administration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./quizbank.toml when present)
    #[arg(short, long, global = true, env = "QUIZBANK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backend-native query (SQL, or a key glob for key-value stores)
    #[command(name = "raw-query")]
    RawQuery {
        query: String,
    },

    /// Request a background save
    Bgsave {
        /// Schedule the save if one cannot start right away
        #[arg(long)]
        schedule: bool,
    },

    /// Remove global problems with at least this many votes
    #[command(name = "apply-threshold")]
    ApplyThreshold {
        /// Vote count (defaults to the configured threshold)
        #[arg(long)]
        votes: Option<usize>,
    },

    /// Write every record to a JSON file
    Export {
        path: PathBuf,
    },

    /// Load records from a JSON file written by `export`
    Import {
        path: PathBuf,

        /// Remove every existing record first
        #[arg(long)]
        replace: bool,
    },

    /// List every record a user authored or owns
    Author {
        user_id: i64,
    },

    /// Check a user against field requirements such as `trusted=true`
    Permissions {
        user_id: i64,

        #[arg(short, long = "require", value_parser = commands::lookup::parse_requirement)]
        requirements: Vec<(String, bool)>,
    },
}

/// Cancel long-running maintenance on Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<()> {
    let config = CacheConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let cache = ProblemCache::open(&config)
        .await
        .with_context(|| format!("Failed to open {} backend", config.backend.kind()))?;

    let result = match cli.command {
        Commands::RawQuery { query } => commands::query::raw_query(&cache, &query).await,
        Commands::Bgsave { schedule } => commands::maintenance::bgsave(&cache, schedule).await,
        Commands::ApplyThreshold { votes } => {
            commands::maintenance::apply_threshold(&cache, votes, &cancel_on_ctrl_c()).await
        }
        Commands::Export { path } => commands::snapshot::export(&cache, &path, &cancel_on_ctrl_c())
            .await
            .map(|count| println!("Exported {} records to {}", count, path.display())),
        Commands::Import { path, replace } => {
            commands::snapshot::import(&cache, &path, replace, &cancel_on_ctrl_c())
                .await
                .map(|count| println!("Imported {} records from {}", count, path.display()))
        }
        Commands::Author { user_id } => commands::lookup::author(&cache, user_id).await,
        Commands::Permissions {
            user_id,
            requirements,
        } => commands::lookup::permissions(&cache, user_id, &requirements).await,
    };

    cache.close().await.context("Failed to close backend")?;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "quizbank=debug,quizbank_store=debug,quizbank_core=debug"
        } else {
            "quizbank=info,quizbank_store=warn"
        })
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let result = run(cli).await;
    if let Err(ref e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    result
}
