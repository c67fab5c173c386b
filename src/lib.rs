//! # kb-retrieval
//!
//! Knowledge-base scoped passage retrieval for retrieval-augmented
//! generation.
//!
//! Documents are split into overlapping passages, each passage is embedded
//! into a fixed-dimension vector, and the vectors are persisted in SQLite.
//! A query is embedded the same way and answered with the most similar
//! passages among the documents of the requested knowledge bases, plus a
//! prompt-ready context block.
//!
//! The algorithms live in [`kb_retrieval_core`]; this crate supplies the
//! SQLite store, the embedding providers, configuration, and the `kbr` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │  kbr CLI │──▶│   Retriever   │──▶│ SqliteStore   │
//! │  (clap)  │   │ chunk + embed │   │ passages, KBs │
//! └──────────┘   └──────┬────────┘   └──────────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │   Embedder    │
//!               │ local/openai/ │
//!               │ ollama/hash   │
//!               └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbr init
//! kbr ingest handbook.txt --doc-id 1
//! kbr kb create support --name "Support docs"
//! kbr kb add support 1
//! kbr query "how do refunds work?" --kb support --max-chunks 5 --threshold 0.3
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector and knowledge-base store |
//! | [`embedding`] | Embedding providers |
//! | [`ingest`] | Document ingestion and deletion |
//! | [`query`] | Scoped similarity queries |
//! | [`kb`] | Knowledge-base management |
//! | [`stats`] | Store statistics |

pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod kb;
pub mod migrate;
pub mod query;
pub mod sqlite_store;
pub mod stats;
