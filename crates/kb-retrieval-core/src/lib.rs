//! # kb-retrieval core
//!
//! Shared, I/O-free logic for kb-retrieval: data models, the passage
//! chunker, the embedding trait and vector math, similarity ranking,
//! context assembly, store traits with an in-memory backend, and the
//! retrieval orchestrator that ties them together.
//!
//! This crate contains no sqlx, filesystem, or network dependencies.
//! Concrete embedding providers and the SQLite store live in the
//! `kb-retrieval` application crate.
//!
//! ## Data Flow
//!
//! ```text
//! ingest: text ──▶ chunk ──▶ embed (per chunk) ──▶ VectorStore::replace_for_document
//! query:  text ──▶ embed ──▶ VectorStore::scan(scope) ──▶ rank ──▶ build_context
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retrieval;
pub mod search;
pub mod store;

pub use error::RetrievalError;
