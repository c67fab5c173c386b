//! Ingestion and query orchestration.
//!
//! [`Retriever`] composes the chunker, an [`Embedder`], and a store:
//!
//! ```text
//! ingest: validate ─▶ chunk ─▶ initialize ─▶ embed each chunk ─▶ replace_for_document
//! query:  validate ─▶ resolve scope ─▶ embed query ─▶ scan(scope) ─▶ rank ─▶ summarize + render
//! ```
//!
//! Per-chunk embedding failures are logged and skipped. Model load
//! failures, store write failures, and invalid requests are returned, as
//! is an ingestion in which no chunk could be embedded; the previous
//! version of the document stays in place.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::chunk::{chunk_text, validate_config};
use crate::context::{build_context, summarize_sources};
use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::models::{ChunkingConfig, Document, DocumentId, Embedding, SearchResult, SourceSummary, StoreStats};
use crate::search::rank;
use crate::store::{KnowledgeBaseStore, VectorStore};

/// Upper bound on `max_chunks` accepted by [`Retriever::query`].
pub const MAX_CHUNKS_LIMIT: usize = 20;

/// A document to (re-)ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub document_id: DocumentId,
    pub label: Option<String>,
    pub text: String,
    pub chunking: ChunkingConfig,
}

/// Outcome of [`Retriever::ingest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: DocumentId,
    pub chunks_stored: usize,
    /// Chunks whose embedding failed; they are not persisted.
    pub chunks_skipped: usize,
}

/// A scoped similarity query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub knowledge_base_ids: Vec<String>,
    /// Documents searched in addition to the knowledge-base members.
    pub document_ids: Option<BTreeSet<DocumentId>>,
    pub query: String,
    /// In `1..=20`.
    pub max_chunks: usize,
    /// In `0.0..=1.0`.
    pub threshold: f32,
}

/// Outcome of [`Retriever::query`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResponse {
    pub ranked_chunks: Vec<SearchResult>,
    pub sources: Vec<SourceSummary>,
    pub context_block: String,
}

/// Orchestrates ingestion and retrieval over a store and an embedder.
pub struct Retriever<S> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
}

impl<S> Clone for Retriever<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            embedder: Arc::clone(&self.embedder),
        }
    }
}

impl<S> Retriever<S>
where
    S: VectorStore + KnowledgeBaseStore,
{
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Chunk, embed, and atomically store a document, replacing any
    /// passages it had before.
    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestReport, RetrievalError> {
        validate_config(&req.chunking)?;
        let chunks = chunk_text(req.document_id, &req.text, &req.chunking)?;

        let mut embeddings = Vec::with_capacity(chunks.len());
        let mut skipped = 0usize;

        if !chunks.is_empty() {
            self.embedder.initialize().await?;
            let model_version = self.embedder.model_version().to_string();

            for chunk in &chunks {
                match self.embedder.embed(&chunk.text).await {
                    Ok(vector) => embeddings.push(Embedding {
                        document_id: req.document_id,
                        chunk_index: chunk.chunk_index,
                        vector,
                        model_version: model_version.clone(),
                    }),
                    Err(e) => {
                        tracing::warn!(
                            document_id = req.document_id,
                            chunk_index = chunk.chunk_index,
                            error = %e,
                            "skipping chunk"
                        );
                        skipped += 1;
                    }
                }
            }
        }

        // An ingestion that embedded nothing never replaces the stored version.
        if !chunks.is_empty() && embeddings.is_empty() {
            return Err(RetrievalError::EmbeddingFailure(format!(
                "all {} chunks of document {} failed to embed; stored passages left unchanged",
                chunks.len(),
                req.document_id
            )));
        }

        let doc = Document {
            id: req.document_id,
            label: req.label,
            source_text: req.text,
            created_at: chrono::Utc::now().timestamp(),
        };

        let stored = self
            .store
            .replace_for_document(&doc, &chunks, &embeddings)
            .await
            .map_err(|e| RetrievalError::StorageTransactionFailure(format!("{:#}", e)))?;

        tracing::info!(
            document_id = doc.id,
            chunks = chunks.len(),
            stored,
            skipped,
            mode = %req.chunking.mode,
            "ingested document"
        );

        Ok(IngestReport {
            document_id: doc.id,
            chunks_stored: stored,
            chunks_skipped: skipped,
        })
    }

    /// Rank the passages in scope against `req.query`.
    ///
    /// An empty scope or a blank query yields an empty response, not an
    /// error. Unknown knowledge bases contribute nothing.
    pub async fn query(&self, req: QueryRequest) -> Result<QueryResponse, RetrievalError> {
        validate_query(&req)?;

        let scope = self.resolve_scope(&req).await?;
        if scope.is_empty() || req.query.trim().is_empty() {
            tracing::debug!(
                scope = scope.len(),
                "empty scope or blank query, nothing to rank"
            );
            return Ok(QueryResponse::default());
        }

        let query_vec = self.embedder.embed(&req.query).await?;
        let candidates = self
            .store
            .scan(Some(&scope))
            .await
            .map_err(RetrievalError::storage)?;

        let ranked = rank(&query_vec, &candidates, req.max_chunks, req.threshold);
        let sources = summarize_sources(&ranked);
        let context_block = build_context(&ranked);

        tracing::info!(
            scope = scope.len(),
            candidates = candidates.len(),
            returned = ranked.len(),
            sources = sources.len(),
            "query complete"
        );

        Ok(QueryResponse {
            ranked_chunks: ranked,
            sources,
            context_block,
        })
    }

    /// Delete a document and its passages. Knowledge-base membership is kept.
    pub async fn delete_document(&self, id: DocumentId) -> Result<bool, RetrievalError> {
        let deleted = self
            .store
            .delete_document(id)
            .await
            .map_err(|e| RetrievalError::StorageTransactionFailure(format!("{:#}", e)))?;
        tracing::info!(document_id = id, deleted, "delete document");
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<StoreStats, RetrievalError> {
        self.store.stats().await.map_err(RetrievalError::storage)
    }

    async fn resolve_scope(&self, req: &QueryRequest) -> Result<BTreeSet<DocumentId>, RetrievalError> {
        let mut scope = BTreeSet::new();

        for kb_id in &req.knowledge_base_ids {
            let kb = self
                .store
                .get_knowledge_base(kb_id)
                .await
                .map_err(RetrievalError::storage)?;
            match kb {
                Some(kb) => {
                    if !kb.embedding_model_id.is_empty()
                        && kb.embedding_model_id != self.embedder.model_version()
                    {
                        tracing::warn!(
                            knowledge_base = %kb.id,
                            expected = %kb.embedding_model_id,
                            actual = %self.embedder.model_version(),
                            "knowledge base was built with a different embedding model"
                        );
                    }
                    scope.extend(kb.document_ids);
                }
                None => {
                    let err = RetrievalError::UnknownKnowledgeBase(kb_id.clone());
                    tracing::warn!(error = %err, "ignoring knowledge base");
                }
            }
        }

        if let Some(ids) = &req.document_ids {
            scope.extend(ids.iter().copied());
        }

        Ok(scope)
    }
}

fn validate_query(req: &QueryRequest) -> Result<(), RetrievalError> {
    if !(1..=MAX_CHUNKS_LIMIT).contains(&req.max_chunks) {
        return Err(RetrievalError::InvalidQuery(format!(
            "max_chunks must be between 1 and {}, got {}",
            MAX_CHUNKS_LIMIT, req.max_chunks
        )));
    }
    if !req.threshold.is_finite() || !(0.0..=1.0).contains(&req.threshold) {
        return Err(RetrievalError::InvalidQuery(format!(
            "threshold must be between 0 and 1, got {}",
            req.threshold
        )));
    }
    Ok(())
}
