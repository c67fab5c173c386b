//! In-memory [`VectorStore`] and [`KnowledgeBaseStore`] for testing and
//! embedding in other programs.
//!
//! All state sits behind one `std::sync::RwLock`. A replacement is fully
//! validated and built before the write lock is taken, then swapped in
//! with a single map insert, so readers observe either the old or the new
//! passages of a document and never a mix.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::RetrievalError;
use crate::models::{Chunk, Document, DocumentId, Embedding, KnowledgeBase, StoredPassage, StoreStats};

use super::{average, passage_metadata, validate_replacement, KnowledgeBaseStore, VectorStore};

#[derive(Default)]
struct State {
    documents: HashMap<DocumentId, Document>,
    /// Passages keyed by document, ordered by chunk index.
    passages: HashMap<DocumentId, BTreeMap<i64, StoredPassage>>,
    knowledge_bases: BTreeMap<String, KnowledgeBase>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn replace_for_document(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<usize> {
        validate_replacement(doc, chunks, embeddings)?;

        let by_index: HashMap<i64, &Chunk> = chunks.iter().map(|c| (c.chunk_index, c)).collect();
        let mut rows = BTreeMap::new();
        for e in embeddings {
            let chunk = by_index[&e.chunk_index];
            rows.insert(
                e.chunk_index,
                StoredPassage {
                    document_id: doc.id,
                    chunk_index: e.chunk_index,
                    text: chunk.text.clone(),
                    vector: e.vector.clone(),
                    model_version: e.model_version.clone(),
                    metadata: passage_metadata(doc, chunk),
                },
            );
        }
        let stored = rows.len();

        let mut state = self.write()?;
        state.documents.insert(doc.id, doc.clone());
        state.passages.insert(doc.id, rows);
        Ok(stored)
    }

    async fn scan(&self, document_ids: Option<&BTreeSet<DocumentId>>) -> Result<Vec<StoredPassage>> {
        let state = self.read()?;
        let passages = match document_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| state.passages.get(id))
                .flat_map(|rows| rows.values().cloned())
                .collect(),
            None => state
                .passages
                .values()
                .flat_map(|rows| rows.values().cloned())
                .collect(),
        };
        Ok(passages)
    }

    async fn get_passage(
        &self,
        document_id: DocumentId,
        chunk_index: i64,
    ) -> Result<Option<StoredPassage>> {
        let state = self.read()?;
        Ok(state
            .passages
            .get(&document_id)
            .and_then(|rows| rows.get(&chunk_index))
            .cloned())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool> {
        let mut state = self.write()?;
        state.passages.remove(&id);
        Ok(state.documents.remove(&id).is_some())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.read()?;
        let total: u64 = state.passages.values().map(|rows| rows.len() as u64).sum();
        let documents = state.passages.values().filter(|rows| !rows.is_empty()).count() as u64;
        Ok(StoreStats {
            total_embeddings: total,
            distinct_documents: documents,
            avg_chunks_per_document: average(total, documents),
        })
    }
}

#[async_trait]
impl KnowledgeBaseStore for InMemoryStore {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        let mut state = self.write()?;
        let entry = state
            .knowledge_bases
            .entry(kb.id.clone())
            .or_insert_with(|| KnowledgeBase {
                id: kb.id.clone(),
                name: String::new(),
                document_ids: BTreeSet::new(),
                embedding_model_id: String::new(),
            });
        entry.name = kb.name.clone();
        entry.embedding_model_id = kb.embedding_model_id.clone();
        entry.document_ids.extend(kb.document_ids.iter().copied());
        Ok(())
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self.read()?.knowledge_bases.get(id).cloned())
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        Ok(self.read()?.knowledge_bases.values().cloned().collect())
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.knowledge_bases.remove(id).is_some())
    }

    async fn add_document_to_knowledge_base(&self, kb_id: &str, document_id: DocumentId) -> Result<bool> {
        let mut state = self.write()?;
        let kb = state
            .knowledge_bases
            .get_mut(kb_id)
            .ok_or_else(|| RetrievalError::UnknownKnowledgeBase(kb_id.to_string()))?;
        Ok(kb.document_ids.insert(document_id))
    }

    async fn remove_document_from_knowledge_base(
        &self,
        kb_id: &str,
        document_id: DocumentId,
    ) -> Result<bool> {
        let mut state = self.write()?;
        Ok(state
            .knowledge_bases
            .get_mut(kb_id)
            .map(|kb| kb.document_ids.remove(&document_id))
            .unwrap_or(false))
    }
}
