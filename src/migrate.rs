//! Idempotent schema migrations.
//!
//! | Table | Key | Contents |
//! |-------|-----|----------|
//! | `documents` | `id` | label, source text, creation time |
//! | `passages` | `(document_id, chunk_index)` | text, f32 BLOB vector, dims, model version, metadata JSON |
//! | `knowledge_bases` | `id` | name, embedding model id |
//! | `kb_members` | `(knowledge_base_id, document_id)` | membership |
//!
//! `kb_members.document_id` has no foreign key: membership
//! outlives the document it names.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            label TEXT,
            source_text TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS passages (
            document_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            vector BLOB NOT NULL,
            dims INTEGER NOT NULL,
            model_version TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            embedding_model_id TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_members (
            knowledge_base_id TEXT NOT NULL,
            document_id INTEGER NOT NULL,
            PRIMARY KEY (knowledge_base_id, document_id),
            FOREIGN KEY (knowledge_base_id) REFERENCES knowledge_bases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_members_document_id ON kb_members(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_passages_model_version ON passages(model_version)")
        .execute(pool)
        .await?;

    Ok(())
}
