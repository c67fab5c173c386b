//! SQLite-backed [`VectorStore`] and [`KnowledgeBaseStore`].
//!
//! Vectors are stored as little-endian f32 BLOBs next to their dimension
//! and model version; per-passage metadata is stored as JSON text.
//! Similarity is never computed in SQL: [`scan`](VectorStore::scan)
//! returns decoded rows and the caller ranks them.
//!
//! # Write exclusion
//!
//! `replace_for_document` and `delete_document` take a per-document async
//! lock before opening their transaction, so two writers for the same
//! document are serialized while writers for different documents proceed
//! concurrently. Readers rely on SQLite transaction isolation and see
//! either the old or the new passages of a document. A lock is dropped
//! from the table once no writer holds or waits on it.
//!
//! Rows whose vector BLOB does not decode to `dims` floats are skipped by
//! `scan` with a warning and reported as errors by `get_passage`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use kb_retrieval_core::embedding::{blob_to_vec, vec_to_blob};
use kb_retrieval_core::models::{
    Chunk, Document, DocumentId, Embedding, KnowledgeBase, Metadata, StoreStats, StoredPassage,
};
use kb_retrieval_core::store::{average, passage_metadata, validate_replacement, KnowledgeBaseStore, VectorStore};
use kb_retrieval_core::retrieval::Retriever;
use kb_retrieval_core::RetrievalError;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;

const PASSAGE_COLUMNS: &str =
    "document_id, chunk_index, text, vector, dims, model_version, metadata_json";

/// SQLite implementation of the store traits.
pub struct SqliteStore {
    pool: SqlitePool,
    doc_locks: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SqliteStore {
    /// Wrap a pool whose schema has been created by
    /// [`migrate_pool`](crate::migrate::migrate_pool).
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            doc_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn doc_lock(&self, id: DocumentId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .doc_locks
            .lock()
            .map_err(|_| anyhow!("document lock table poisoned"))?;
        Ok(Arc::clone(locks.entry(id).or_default()))
    }

    fn release_lock(&self, id: DocumentId, lock: Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.doc_locks.lock() else {
            return;
        };
        // Only the table and `lock` itself still point at it.
        let idle = locks
            .get(&id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.doc_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    async fn write_replacement(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<usize> {
        let by_index: HashMap<i64, &Chunk> = chunks.iter().map(|c| (c.chunk_index, c)).collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, label, source_text, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                source_text = excluded.source_text,
                created_at = excluded.created_at
            "#,
        )
        .bind(doc.id)
        .bind(&doc.label)
        .bind(&doc.source_text)
        .bind(doc.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM passages WHERE document_id = ?")
            .bind(doc.id)
            .execute(&mut *tx)
            .await?;

        for e in embeddings {
            let chunk = by_index[&e.chunk_index];
            let metadata_json = serde_json::to_string(&passage_metadata(doc, chunk))?;
            sqlx::query(
                r#"
                INSERT INTO passages (document_id, chunk_index, text, vector, dims, model_version, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(doc.id)
            .bind(e.chunk_index)
            .bind(&chunk.text)
            .bind(vec_to_blob(&e.vector))
            .bind(e.vector.len() as i64)
            .bind(&e.model_version)
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert passage {} of document {}", e.chunk_index, doc.id))?;
        }

        tx.commit().await?;
        Ok(embeddings.len())
    }

    async fn delete_rows(&self, id: DocumentId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM passages WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }
}

/// Open the configured database and pair it with the configured embedder.
///
/// The schema must already exist (`kbr init`).
pub async fn open_retriever(config: &Config) -> Result<Retriever<SqliteStore>> {
    let pool = db::connect(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    Ok(Retriever::new(Arc::new(SqliteStore::new(pool)), embedder))
}

fn row_to_passage(row: &SqliteRow) -> Result<StoredPassage> {
    let document_id: DocumentId = row.get("document_id");
    let chunk_index: i64 = row.get("chunk_index");
    let blob: Vec<u8> = row.get("vector");
    let dims: i64 = row.get("dims");

    let Some(vector) = blob_to_vec(&blob) else {
        bail!(
            "passage {} of document {}: vector BLOB has {} bytes, not a multiple of 4",
            chunk_index,
            document_id,
            blob.len()
        );
    };
    if vector.len() as i64 != dims {
        bail!(
            "passage {} of document {}: stored dims {} but vector has {} values",
            chunk_index,
            document_id,
            dims,
            vector.len()
        );
    }

    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json).with_context(|| {
        format!(
            "Failed to parse metadata_json of passage {} of document {}",
            chunk_index, document_id
        )
    })?;
    Ok(StoredPassage {
        document_id,
        chunk_index,
        text: row.get("text"),
        vector,
        model_version: row.get("model_version"),
        metadata,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn replace_for_document(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<usize> {
        validate_replacement(doc, chunks, embeddings)?;

        let lock = self.doc_lock(doc.id)?;
        let result = {
            let _guard = lock.lock().await;
            self.write_replacement(doc, chunks, embeddings).await
        };
        self.release_lock(doc.id, lock);
        result
    }

    async fn scan(&self, document_ids: Option<&BTreeSet<DocumentId>>) -> Result<Vec<StoredPassage>> {
        let rows = match document_ids {
            Some(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let ids_json = serde_json::to_string(ids)?;
                sqlx::query(&format!(
                    "SELECT {} FROM passages WHERE document_id IN (SELECT value FROM json_each(?))",
                    PASSAGE_COLUMNS
                ))
                .bind(ids_json)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {} FROM passages", PASSAGE_COLUMNS))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .iter()
            .filter_map(|row| match row_to_passage(row) {
                Ok(passage) => Some(passage),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable passage");
                    None
                }
            })
            .collect())
    }

    async fn get_passage(
        &self,
        document_id: DocumentId,
        chunk_index: i64,
    ) -> Result<Option<StoredPassage>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM passages WHERE document_id = ? AND chunk_index = ?",
            PASSAGE_COLUMNS
        ))
        .bind(document_id)
        .bind(chunk_index)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_passage).transpose()
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, label, source_text, created_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Document {
            id: r.get("id"),
            label: r.get("label"),
            source_text: r.get("source_text"),
            created_at: r.get("created_at"),
        }))
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool> {
        let lock = self.doc_lock(id)?;
        let result = {
            let _guard = lock.lock().await;
            self.delete_rows(id).await
        };
        self.release_lock(id, lock);
        result
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(DISTINCT document_id) AS documents FROM passages",
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let documents: i64 = row.get("documents");
        let (total, documents) = (total as u64, documents as u64);

        Ok(StoreStats {
            total_embeddings: total,
            distinct_documents: documents,
            avg_chunks_per_document: average(total, documents),
        })
    }
}

/// Member ids of every knowledge base, keyed by knowledge base id.
async fn load_members(pool: &SqlitePool, kb_id: Option<&str>) -> Result<BTreeMap<String, BTreeSet<DocumentId>>> {
    let rows = match kb_id {
        Some(id) => {
            sqlx::query("SELECT knowledge_base_id, document_id FROM kb_members WHERE knowledge_base_id = ?")
                .bind(id)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query("SELECT knowledge_base_id, document_id FROM kb_members")
                .fetch_all(pool)
                .await?
        }
    };

    let mut members: BTreeMap<String, BTreeSet<DocumentId>> = BTreeMap::new();
    for row in rows {
        members
            .entry(row.get("knowledge_base_id"))
            .or_default()
            .insert(row.get("document_id"));
    }
    Ok(members)
}

#[async_trait]
impl KnowledgeBaseStore for SqliteStore {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (id, name, embedding_model_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                embedding_model_id = excluded.embedding_model_id
            "#,
        )
        .bind(&kb.id)
        .bind(&kb.name)
        .bind(&kb.embedding_model_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for doc_id in &kb.document_ids {
            sqlx::query("INSERT OR IGNORE INTO kb_members (knowledge_base_id, document_id) VALUES (?, ?)")
                .bind(&kb.id)
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        let row = sqlx::query("SELECT id, name, embedding_model_id FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut members = load_members(&self.pool, Some(id)).await?;
        Ok(Some(KnowledgeBase {
            id: row.get("id"),
            name: row.get("name"),
            document_ids: members.remove(id).unwrap_or_default(),
            embedding_model_id: row.get("embedding_model_id"),
        }))
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        let rows = sqlx::query("SELECT id, name, embedding_model_id FROM knowledge_bases ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut members = load_members(&self.pool, None).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id: String = row.get("id");
                KnowledgeBase {
                    document_ids: members.remove(&id).unwrap_or_default(),
                    name: row.get("name"),
                    embedding_model_id: row.get("embedding_model_id"),
                    id,
                }
            })
            .collect())
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM kb_members WHERE knowledge_base_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn add_document_to_knowledge_base(&self, kb_id: &str, document_id: DocumentId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM knowledge_bases WHERE id = ?")
            .bind(kb_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(RetrievalError::UnknownKnowledgeBase(kb_id.to_string()).into());
        }

        let inserted = sqlx::query("INSERT OR IGNORE INTO kb_members (knowledge_base_id, document_id) VALUES (?, ?)")
            .bind(kb_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(inserted > 0)
    }

    async fn remove_document_from_knowledge_base(
        &self,
        kb_id: &str,
        document_id: DocumentId,
    ) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM kb_members WHERE knowledge_base_id = ? AND document_id = ?")
            .bind(kb_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }
}
