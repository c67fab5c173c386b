//! Storage abstraction for kb-retrieval.
//!
//! [`VectorStore`] persists documents and their embedded passages;
//! [`KnowledgeBaseStore`] persists named document groupings used to scope
//! queries. Both are implemented by the in-memory backend here and by the
//! SQLite backend in the app crate.
//!
//! Stores never compute similarity. They hand back candidates and the
//! orchestrator ranks them with [`rank`](crate::search::rank).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentId, Embedding, KnowledgeBase, StoredPassage, StoreStats};

/// Persisted vectors and the documents they were cut from.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_for_document`](VectorStore::replace_for_document) | Atomically swap a document's passages |
/// | [`scan`](VectorStore::scan) | Candidate passages, optionally restricted to documents |
/// | [`get_passage`](VectorStore::get_passage) | Point lookup by `(document_id, chunk_index)` |
/// | [`get_document`](VectorStore::get_document) | Fetch a stored document |
/// | [`delete_document`](VectorStore::delete_document) | Remove a document and its passages |
/// | [`stats`](VectorStore::stats) | Aggregate counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert `doc` and replace all of its passages with one row per
    /// embedding. Either the whole replacement commits or nothing changes.
    ///
    /// Every embedding must name a chunk of `doc` (chunks supply text and
    /// offsets), and chunk indices must be unique. Chunks without an
    /// embedding are not persisted.
    ///
    /// Returns the number of passages stored.
    async fn replace_for_document(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<usize>;

    /// All passages, or only those of `document_ids` when given. Order is
    /// unspecified.
    async fn scan(&self, document_ids: Option<&BTreeSet<DocumentId>>) -> Result<Vec<StoredPassage>>;

    async fn get_passage(
        &self,
        document_id: DocumentId,
        chunk_index: i64,
    ) -> Result<Option<StoredPassage>>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Delete a document and its passages. Returns `false` if it did not exist.
    async fn delete_document(&self, id: DocumentId) -> Result<bool>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Knowledge-base records and their document membership.
///
/// Membership refers to document ids, not stored rows: it survives
/// deletion of the document, and a member with no passages simply
/// contributes no candidates.
#[async_trait]
pub trait KnowledgeBaseStore: Send + Sync {
    /// Create a knowledge base, or update the name and model of an existing
    /// one. `kb.document_ids` are added as members.
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()>;

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>>;

    /// All knowledge bases, sorted by id.
    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>>;

    /// Delete a knowledge base and its membership rows. Documents are kept.
    async fn delete_knowledge_base(&self, id: &str) -> Result<bool>;

    /// Returns `false` when the document was already a member. Fails with
    /// [`RetrievalError::UnknownKnowledgeBase`](crate::RetrievalError::UnknownKnowledgeBase)
    /// if the knowledge base does not exist.
    async fn add_document_to_knowledge_base(&self, kb_id: &str, document_id: DocumentId) -> Result<bool>;

    /// Returns `false` when the document was not a member.
    async fn remove_document_from_knowledge_base(
        &self,
        kb_id: &str,
        document_id: DocumentId,
    ) -> Result<bool>;
}

/// Check that a replacement set is self-consistent before writing it.
///
/// Shared by every backend so they reject the same inputs.
pub fn validate_replacement(doc: &Document, chunks: &[Chunk], embeddings: &[Embedding]) -> Result<()> {
    let mut indices = BTreeSet::new();
    for c in chunks {
        if c.document_id != doc.id {
            anyhow::bail!(
                "chunk {} belongs to document {}, not {}",
                c.chunk_index,
                c.document_id,
                doc.id
            );
        }
        if !indices.insert(c.chunk_index) {
            anyhow::bail!("duplicate chunk index {} for document {}", c.chunk_index, doc.id);
        }
    }

    let mut embedded = BTreeSet::new();
    for e in embeddings {
        if e.document_id != doc.id {
            anyhow::bail!(
                "embedding for chunk {} belongs to document {}, not {}",
                e.chunk_index,
                e.document_id,
                doc.id
            );
        }
        if !indices.contains(&e.chunk_index) {
            anyhow::bail!("embedding references unknown chunk {} of document {}", e.chunk_index, doc.id);
        }
        if !embedded.insert(e.chunk_index) {
            anyhow::bail!("duplicate embedding for chunk {} of document {}", e.chunk_index, doc.id);
        }
        if e.vector.is_empty() {
            anyhow::bail!("empty vector for chunk {} of document {}", e.chunk_index, doc.id);
        }
    }
    Ok(())
}

/// Per-passage metadata recorded at write time.
pub fn passage_metadata(doc: &Document, chunk: &Chunk) -> crate::models::Metadata {
    let mut meta = crate::models::Metadata::new();
    meta.insert("source_label".into(), doc.display_label().into());
    meta.insert("start_offset".into(), chunk.start_offset.into());
    meta.insert("end_offset".into(), chunk.end_offset.into());
    meta.insert("unit_count".into(), chunk.unit_count.into());
    meta.insert("chunking_mode".into(), chunk.mode.as_str().into());
    meta.insert("hash".into(), chunk.hash.clone().into());
    meta
}

/// Mean passages per document, `0.0` for an empty store.
pub fn average(total: u64, documents: u64) -> f64 {
    if documents == 0 {
        0.0
    } else {
        total as f64 / documents as f64
    }
}
