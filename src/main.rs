//! # Trellis CLI (`trellis`)
//!
//! ## Usage
//!
//! ```bash
//! trellis --config ./config/trellis.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trellis init` | Create the SQLite database and run schema migrations |
//! | `trellis serve` | Start the HTTP server (ingestion + retrieval) |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use trellis::config;
use trellis::db;
use trellis::embedding;
use trellis::extractor::BuiltinExtractor;
use trellis::migrate;
use trellis::pipeline::Pipeline;
use trellis::server::{self, AppState};
use trellis::storage::ObjectStore;
use trellis::tokenizer::HeuristicTokenizer;
use trellis::worker::IngestQueue;

/// Trellis — hierarchical document ingestion and two-phase retrieval
/// for AI assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trellis.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trellis",
    about = "Trellis — hierarchical document ingestion and two-phase retrieval for AI assistants",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trellis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunk_contents, chunks_fts, chunk_vectors).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP server.
    ///
    /// Runs migrations, starts the ingestion worker pool, and serves the
    /// document-management and retrieval API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trellis=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            let storage = ObjectStore::new(cfg.storage.root.clone());
            let extractor = Arc::new(BuiltinExtractor::new(cfg.chunking.extract_timeout_secs));
            let embedder: Arc<dyn embedding::Embedder> =
                embedding::create_embedder(&cfg.embedding)?.into();
            let pipeline = Arc::new(Pipeline::new(
                pool.clone(),
                storage,
                extractor,
                Arc::clone(&embedder),
                &cfg,
            ));
            let queue = IngestQueue::start(
                Arc::clone(&pipeline),
                cfg.ingest.workers,
                cfg.ingest.queue_capacity,
            );

            let state = AppState {
                config: Arc::new(cfg),
                pool,
                queue,
                pipeline,
                embedder,
                tokenizer: Arc::new(HeuristicTokenizer),
            };
            server::run_server(state).await?;
        }
    }

    Ok(())
}
