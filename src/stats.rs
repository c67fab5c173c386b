//! Store statistics.
//!
//! Used by `kbr stats` to show what is indexed: passage and document
//! counts, a per-model breakdown, and when the last document arrived.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::sqlite_store::open_retriever;

/// Passage counts for one embedding model.
struct ModelStats {
    model_version: String,
    dims: i64,
    passages: i64,
    documents: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let retriever = open_retriever(config).await?;
    let stats = retriever.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let pool = retriever.store().pool();

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let total_kbs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_bases")
        .fetch_one(pool)
        .await?;
    let last_ingest: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM documents")
        .fetch_one(pool)
        .await?;

    let model_rows = sqlx::query(
        r#"
        SELECT
            model_version,
            MAX(dims) AS dims,
            COUNT(*) AS passages,
            COUNT(DISTINCT document_id) AS documents
        FROM passages
        GROUP BY model_version
        ORDER BY passages DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let models: Vec<ModelStats> = model_rows
        .iter()
        .map(|row| ModelStats {
            model_version: row.get("model_version"),
            dims: row.get("dims"),
            passages: row.get("passages"),
            documents: row.get("documents"),
        })
        .collect();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("kb-retrieval store stats");
    println!("========================");
    println!();
    println!("  Database:         {}", config.db.path.display());
    println!("  Size:             {}", format_bytes(db_size));
    println!();
    println!("  Documents:        {}", total_docs);
    println!("  With passages:    {}", stats.distinct_documents);
    println!("  Passages:         {}", stats.total_embeddings);
    println!("  Avg per document: {:.1}", stats.avg_chunks_per_document);
    println!("  Knowledge bases:  {}", total_kbs);
    println!(
        "  Last ingest:      {}",
        last_ingest
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !models.is_empty() {
        println!();
        println!("  By model:");
        println!(
            "  {:<28} {:>6} {:>10} {:>6}",
            "MODEL", "DIMS", "PASSAGES", "DOCS"
        );
        println!("  {}", "-".repeat(54));
        for m in &models {
            println!(
                "  {:<28} {:>6} {:>10} {:>6}",
                m.model_version, m.dims, m.passages, m.documents
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
