//! `kbr ingest` and `kbr delete`: the document lifecycle.
//!
//! Ingestion reads a document, chunks it, embeds it, and stores it.
//!
//! The document replaces any previous version stored under the same id.
//! Chunking options fall back to the `[chunking]` section of the config.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

use kb_retrieval_core::models::{ChunkingConfig, ChunkingMode, DocumentId};
use kb_retrieval_core::retrieval::IngestRequest;

use crate::config::Config;
use crate::sqlite_store::open_retriever;

/// Command-line overrides for one ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub label: Option<String>,
    pub mode: Option<ChunkingMode>,
    pub size: Option<usize>,
    pub overlap: Option<usize>,
}

impl IngestOptions {
    /// Merge the overrides over the configured defaults.
    pub fn chunking(&self, defaults: &ChunkingConfig) -> ChunkingConfig {
        ChunkingConfig {
            mode: self.mode.unwrap_or(defaults.mode),
            size: self.size.unwrap_or(defaults.size),
            overlap: self.overlap.unwrap_or(defaults.overlap),
        }
    }
}

/// Read `path`, or stdin when `path` is `-`.
async fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read document from stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read document: {}", path))
}

/// The label used when `--label` is not given: the file name, if any.
fn default_label(path: &str) -> Option<String> {
    if path == "-" {
        return None;
    }
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

pub async fn run_ingest(
    config: &Config,
    path: &str,
    document_id: DocumentId,
    options: IngestOptions,
) -> Result<()> {
    let chunking = options.chunking(&config.chunking);
    let text = read_source(path).await?;
    let label = options.label.clone().or_else(|| default_label(path));

    let retriever = open_retriever(config).await?;
    let report = retriever
        .ingest(IngestRequest {
            document_id,
            label,
            text,
            chunking,
        })
        .await?;

    println!("ingest {}", path);
    println!("  document: {}", report.document_id);
    println!(
        "  chunking: {} (size {}, overlap {})",
        chunking.mode, chunking.size, chunking.overlap
    );
    println!("  passages stored: {}", report.chunks_stored);
    if report.chunks_skipped > 0 {
        println!("  passages skipped: {}", report.chunks_skipped);
    }
    println!("ok");
    Ok(())
}

/// `kbr delete`: remove a document and its passages.
pub async fn run_delete(config: &Config, document_id: DocumentId) -> Result<()> {
    let retriever = open_retriever(config).await?;
    if retriever.delete_document(document_id).await? {
        println!("document {} deleted", document_id);
    } else {
        println!("document {} not found", document_id);
    }
    Ok(())
}
