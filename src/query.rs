//! `kbr query`: rank stored passages against a question.

use anyhow::Result;
use std::collections::BTreeSet;

use kb_retrieval_core::models::DocumentId;
use kb_retrieval_core::retrieval::{QueryRequest, QueryResponse};

use crate::config::Config;
use crate::sqlite_store::open_retriever;

/// Print a response as human-readable text.
fn print_response(response: &QueryResponse) {
    if response.ranked_chunks.is_empty() {
        println!("No results.");
        return;
    }

    for (i, r) in response.ranked_chunks.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (document {}, chunk {})",
            i + 1,
            r.score,
            r.source_label,
            r.document_id,
            r.chunk_index
        );
        let preview: String = r.text.trim().chars().take(240).collect();
        println!("    {}", preview.replace('\n', " "));
        println!();
    }

    println!("Sources:");
    for s in &response.sources {
        println!(
            "  {} (document {}): max {:.4}, {} passage(s)",
            s.source_label, s.document_id, s.max_score, s.passages
        );
    }
}

pub async fn run_query(
    config: &Config,
    query: &str,
    knowledge_base_ids: Vec<String>,
    document_ids: Vec<DocumentId>,
    max_chunks: usize,
    threshold: f32,
    json: bool,
) -> Result<()> {
    let retriever = open_retriever(config).await?;

    let document_ids: Option<BTreeSet<DocumentId>> = if document_ids.is_empty() {
        None
    } else {
        Some(document_ids.into_iter().collect())
    };

    let response = retriever
        .query(QueryRequest {
            knowledge_base_ids,
            document_ids,
            query: query.to_string(),
            max_chunks,
            threshold,
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}
