//! # kb-retrieval CLI (`kbr`)
//!
//! ## Usage
//!
//! ```bash
//! kbr --config ./config/kbr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbr init` | Create the SQLite database and run schema migrations |
//! | `kbr ingest <path\|->` | Chunk, embed, and store a document |
//! | `kbr query "<text>"` | Rank passages in the given knowledge bases |
//! | `kbr kb <action>` | Create, inspect, and edit knowledge bases |
//! | `kbr delete <doc>` | Delete a document and its passages |
//! | `kbr stats` | Show store statistics |
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `warn`), so
//! stdout carries only command output.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kb_retrieval::{config, ingest, kb, migrate, query, stats};
use kb_retrieval_core::models::{ChunkingMode, DocumentId};

/// kb-retrieval CLI: knowledge-base scoped passage retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbr.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbr",
    about = "kb-retrieval: chunk, embed, and search documents scoped by knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbr.toml")]
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
    /// (documents, passages, knowledge_bases, kb_members).
    /// Safe to run repeatedly.
    Init,

    /// Ingest a document, replacing any previous version with the same id.
    Ingest {
        /// File to read, or `-` for stdin.
        path: String,

        /// Document id to store the passages under.
        #[arg(long)]
        doc_id: DocumentId,

        /// Source label shown next to passages (default: the file name).
        #[arg(long)]
        label: Option<String>,

        /// Chunking mode: token, character, or page.
        #[arg(long)]
        mode: Option<ChunkingMode>,

        /// Chunk size in the mode's units.
        #[arg(long)]
        size: Option<usize>,

        /// Overlap in the mode's units.
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Query passages scoped to knowledge bases and/or documents.
    Query {
        /// Query text.
        query: String,

        /// Knowledge base to search (repeatable).
        #[arg(long = "kb")]
        kbs: Vec<String>,

        /// Additional document to search (repeatable).
        #[arg(long = "doc")]
        docs: Vec<DocumentId>,

        /// Maximum passages to return (1–20).
        #[arg(long)]
        max_chunks: usize,

        /// Minimum cosine similarity (0–1).
        #[arg(long)]
        threshold: f32,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage knowledge bases.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Delete a document and its passages.
    Delete {
        /// Document id.
        doc_id: DocumentId,
    },

    /// Show store statistics.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Knowledge-base subcommands.
#[derive(Subcommand)]
enum KbAction {
    /// Create a knowledge base, or rename an existing one.
    Create {
        id: String,
        #[arg(long)]
        name: String,
        /// Embedding model id (default: the configured provider's model).
        #[arg(long)]
        model: Option<String>,
    },
    /// Add a document to a knowledge base.
    Add { kb: String, doc_id: DocumentId },
    /// Remove a document from a knowledge base.
    Remove { kb: String, doc_id: DocumentId },
    /// Show a knowledge base and its members.
    Show {
        kb: String,
        #[arg(long)]
        json: bool,
    },
    /// List knowledge bases.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete a knowledge base. Its documents are kept.
    Delete { kb: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            doc_id,
            label,
            mode,
            size,
            overlap,
        } => {
            let options = ingest::IngestOptions {
                label,
                mode,
                size,
                overlap,
            };
            ingest::run_ingest(&cfg, &path, doc_id, options).await?;
        }
        Commands::Query {
            query,
            kbs,
            docs,
            max_chunks,
            threshold,
            json,
        } => {
            query::run_query(&cfg, &query, kbs, docs, max_chunks, threshold, json).await?;
        }
        Commands::Kb { action } => match action {
            KbAction::Create { id, name, model } => kb::run_create(&cfg, &id, &name, model).await?,
            KbAction::Add { kb: kb_id, doc_id } => kb::run_add(&cfg, &kb_id, doc_id).await?,
            KbAction::Remove { kb: kb_id, doc_id } => kb::run_remove(&cfg, &kb_id, doc_id).await?,
            KbAction::Show { kb: kb_id, json } => kb::run_show(&cfg, &kb_id, json).await?,
            KbAction::List { json } => kb::run_list(&cfg, json).await?,
            KbAction::Delete { kb: kb_id } => kb::run_delete(&cfg, &kb_id).await?,
        },
        Commands::Delete { doc_id } => {
            ingest::run_delete(&cfg, doc_id).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
    }

    Ok(())
}
