//! Core data models used throughout kb-retrieval.
//!
//! These types represent the documents, passages, vectors, knowledge bases,
//! and search results that flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identifier assigned to a document by the ingestion caller.
pub type DocumentId = i64;

/// Free-form per-passage metadata (source label, offsets, chunking mode).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A source document. Immutable once stored except by full re-ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    /// Human-readable source name (filename, URL, transcript title).
    pub label: Option<String>,
    pub source_text: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl Document {
    /// The label shown next to this document's passages.
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| default_source_label(self.id))
    }
}

/// Fallback label for documents ingested without one.
pub fn default_source_label(id: DocumentId) -> String {
    format!("document {}", id)
}

/// A bounded slice of a document's text.
///
/// `start_offset` and `end_offset` are UTF-8 byte offsets into the
/// document's source text, and `text` is exactly that slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: DocumentId,
    pub chunk_index: i64,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Tokens in token mode, characters in character and page mode.
    pub unit_count: usize,
    /// The policy that cut this chunk.
    pub mode: ChunkingMode,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// The vector produced for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub document_id: DocumentId,
    pub chunk_index: i64,
    pub vector: Vec<f32>,
    pub model_version: String,
}

/// A persisted passage row, as returned by [`VectorStore::scan`](crate::store::VectorStore::scan).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPassage {
    pub document_id: DocumentId,
    pub chunk_index: i64,
    pub text: String,
    pub vector: Vec<f32>,
    pub model_version: String,
    pub metadata: Metadata,
}

impl StoredPassage {
    /// Source label recorded at ingestion time, or the document fallback.
    pub fn source_label(&self) -> String {
        self.metadata
            .get("source_label")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| default_source_label(self.document_id))
    }
}

/// A named grouping of documents that scopes a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub document_ids: BTreeSet<DocumentId>,
    pub embedding_model_id: String,
}

/// One ranked passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document_id: DocumentId,
    pub chunk_index: i64,
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub source_label: String,
}

/// Per-document relevance: the best score among its ranked passages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub document_id: DocumentId,
    pub source_label: String,
    pub max_score: f32,
    /// Number of this document's passages in the ranking.
    pub passages: usize,
}

/// Aggregate counts over the vector store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_embeddings: u64,
    pub distinct_documents: u64,
    pub avg_chunks_per_document: f64,
}

/// Chunk boundary policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMode {
    /// Fixed token window with token overlap. Units: tokens.
    #[default]
    Token,
    /// Sentence accumulation up to a character budget. Units: characters.
    Character,
    /// Explicit page markers, or fixed-size page estimates. Units: characters.
    Page,
}

impl ChunkingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingMode::Token => "token",
            ChunkingMode::Character => "character",
            ChunkingMode::Page => "page",
        }
    }
}

impl fmt::Display for ChunkingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" => Ok(ChunkingMode::Token),
            "character" | "char" => Ok(ChunkingMode::Character),
            "page" => Ok(ChunkingMode::Page),
            other => Err(format!(
                "unknown chunking mode '{}'. Use token, character, or page.",
                other
            )),
        }
    }
}

/// Chunking parameters. `size` and `overlap` are in the mode's units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub mode: ChunkingMode,
    pub size: usize,
    #[serde(default)]
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(mode: ChunkingMode, size: usize, overlap: usize) -> Self {
        Self {
            mode,
            size,
            overlap,
        }
    }
}
