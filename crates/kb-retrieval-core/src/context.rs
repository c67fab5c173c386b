//! Turning a ranking into something a caller can hand to a language model.
//!
//! [`build_context`] renders ranked passages as a numbered, source-labelled
//! block followed by a grounding instruction. [`summarize_sources`] reduces
//! the ranking to one entry per document.

use std::collections::BTreeMap;

use crate::models::{DocumentId, SearchResult, SourceSummary};

const CONTEXT_HEADER: &str = "Relevant context:";
const GROUNDING_INSTRUCTION: &str = "Answer the question using only the context above. \
If the context does not contain the answer, say that you do not know.";

/// Render ranked passages as a prompt-ready context block.
///
/// Returns an empty string for an empty ranking.
///
/// # Example
///
/// ```rust
/// use kb_retrieval_core::context::build_context;
/// use kb_retrieval_core::models::SearchResult;
///
/// let ranked = vec![SearchResult {
///     document_id: 1,
///     chunk_index: 0,
///     text: "  Rust has no garbage collector.\n".to_string(),
///     score: 0.871,
///     source_label: "rust-book".to_string(),
/// }];
/// let block = build_context(&ranked);
/// assert!(block.starts_with("Relevant context:\n\n[1] rust-book (relevance: 0.87)\n"));
/// assert!(block.contains("Rust has no garbage collector.\n\n"));
/// assert!(build_context(&[]).is_empty());
/// ```
pub fn build_context(ranked: &[SearchResult]) -> String {
    if ranked.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(CONTEXT_HEADER);
    out.push_str("\n\n");
    for (i, r) in ranked.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} (relevance: {:.2})\n{}\n\n",
            i + 1,
            r.source_label,
            r.score,
            r.text.trim()
        ));
    }
    out.push_str(GROUNDING_INSTRUCTION);
    out
}

/// Group a ranking by document, keeping each document's best score.
///
/// Sorted by `max_score` descending, then `document_id` ascending.
pub fn summarize_sources(ranked: &[SearchResult]) -> Vec<SourceSummary> {
    let mut by_doc: BTreeMap<DocumentId, SourceSummary> = BTreeMap::new();

    for r in ranked {
        by_doc
            .entry(r.document_id)
            .and_modify(|s| {
                s.max_score = s.max_score.max(r.score);
                s.passages += 1;
            })
            .or_insert_with(|| SourceSummary {
                document_id: r.document_id,
                source_label: r.source_label.clone(),
                max_score: r.score,
                passages: 1,
            });
    }

    let mut sources: Vec<SourceSummary> = by_doc.into_values().collect();
    sources.sort_by(|a, b| {
        b.max_score
            .total_cmp(&a.max_score)
            .then(a.document_id.cmp(&b.document_id))
    });
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(doc: DocumentId, idx: i64, score: f32, text: &str) -> SearchResult {
        SearchResult {
            document_id: doc,
            chunk_index: idx,
            text: text.to_string(),
            score,
            source_label: format!("doc-{}", doc),
        }
    }

    #[test]
    fn test_build_context_empty() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_build_context_format() {
        let ranked = vec![
            result(2, 3, 0.9149, "  first passage \n"),
            result(1, 0, 0.5, "second passage"),
        ];
        let expected = "Relevant context:\n\n\
            [1] doc-2 (relevance: 0.91)\nfirst passage\n\n\
            [2] doc-1 (relevance: 0.50)\nsecond passage\n\n\
            Answer the question using only the context above. \
            If the context does not contain the answer, say that you do not know.";
        assert_eq!(build_context(&ranked), expected);
    }

    #[test]
    fn test_build_context_preserves_rank_order() {
        let ranked = vec![
            result(1, 0, 0.3, "low"),
            result(1, 1, 0.9, "high"),
        ];
        let block = build_context(&ranked);
        let low = block.find("low").unwrap();
        let high = block.find("high").unwrap();
        assert!(low < high);
    }

    #[test]
    fn test_summarize_sources_max_score_per_document() {
        let ranked = vec![
            result(1, 0, 0.95, "a"),
            result(2, 0, 0.90, "b"),
            result(1, 1, 0.40, "c"),
            result(3, 2, 0.90, "d"),
            result(2, 5, 0.10, "e"),
        ];
        let sources = summarize_sources(&ranked);
        let order: Vec<(DocumentId, usize)> =
            sources.iter().map(|s| (s.document_id, s.passages)).collect();
        assert_eq!(order, vec![(1, 2), (2, 2), (3, 1)]);
        assert!((sources[0].max_score - 0.95).abs() < 1e-6);
        assert!((sources[1].max_score - 0.90).abs() < 1e-6);
        assert_eq!(sources[2].source_label, "doc-3");
    }

    #[test]
    fn test_summarize_sources_empty() {
        assert!(summarize_sources(&[]).is_empty());
    }
}
