//! `kbr kb ...`: knowledge-base management.

use anyhow::Result;
use std::collections::BTreeSet;

use kb_retrieval_core::models::{DocumentId, KnowledgeBase};
use kb_retrieval_core::store::KnowledgeBaseStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

fn format_members(ids: &BTreeSet<DocumentId>) -> String {
    if ids.is_empty() {
        return "(none)".to_string();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Create or rename a knowledge base. The embedding model defaults to
/// the configured provider's model.
pub async fn run_create(config: &Config, id: &str, name: &str, model: Option<String>) -> Result<()> {
    let embedding_model_id = match model {
        Some(m) => m,
        None => create_embedder(&config.embedding)?
            .model_version()
            .to_string(),
    };
    let store = open_store(config).await?;
    store
        .create_knowledge_base(&KnowledgeBase {
            id: id.to_string(),
            name: name.to_string(),
            document_ids: BTreeSet::new(),
            embedding_model_id,
        })
        .await?;
    println!("knowledge base {} saved", id);
    Ok(())
}

pub async fn run_add(config: &Config, kb_id: &str, document_id: DocumentId) -> Result<()> {
    let store = open_store(config).await?;
    if store.add_document_to_knowledge_base(kb_id, document_id).await? {
        println!("added document {} to {}", document_id, kb_id);
    } else {
        println!("document {} already in {}", document_id, kb_id);
    }
    Ok(())
}

pub async fn run_remove(config: &Config, kb_id: &str, document_id: DocumentId) -> Result<()> {
    let store = open_store(config).await?;
    if store
        .remove_document_from_knowledge_base(kb_id, document_id)
        .await?
    {
        println!("removed document {} from {}", document_id, kb_id);
    } else {
        println!("document {} not in {}", document_id, kb_id);
    }
    Ok(())
}

pub async fn run_show(config: &Config, kb_id: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let kb = store
        .get_knowledge_base(kb_id)
        .await?
        .ok_or_else(|| kb_retrieval_core::RetrievalError::UnknownKnowledgeBase(kb_id.to_string()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&kb)?);
        return Ok(());
    }
    println!("id:        {}", kb.id);
    println!("name:      {}", kb.name);
    println!("model:     {}", kb.embedding_model_id);
    println!("documents: {}", format_members(&kb.document_ids));
    Ok(())
}

pub async fn run_list(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let kbs = store.list_knowledge_bases().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&kbs)?);
        return Ok(());
    }
    if kbs.is_empty() {
        println!("No knowledge bases.");
        return Ok(());
    }
    println!("{:<20} {:<24} {:<20} DOCUMENTS", "ID", "NAME", "MODEL");
    for kb in &kbs {
        println!(
            "{:<20} {:<24} {:<20} {}",
            kb.id,
            kb.name,
            kb.embedding_model_id,
            format_members(&kb.document_ids)
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, kb_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    if store.delete_knowledge_base(kb_id).await? {
        println!("knowledge base {} deleted", kb_id);
    } else {
        println!("knowledge base {} not found", kb_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_members() {
        assert_eq!(format_members(&BTreeSet::new()), "(none)");
        let ids: BTreeSet<DocumentId> = [3, 1, 2].into_iter().collect();
        assert_eq!(format_members(&ids), "1, 2, 3");
    }
}
