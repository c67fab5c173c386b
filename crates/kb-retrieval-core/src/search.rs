//! Brute-force similarity ranking over stored passages.
//!
//! [`rank`] is a pure function: it scores every candidate against the
//! query vector, keeps those at or above the threshold, and returns the
//! top `top_k`. It needs no store and no model, so it can be exercised
//! with synthetic vectors.
//!
//! # Algorithm
//!
//! 1. Skip candidates whose dimension differs from the query's.
//! 2. `score = cosine_similarity(query, candidate)` (`0` on zero norms).
//! 3. Keep `score >= threshold`.
//! 4. Sort by score (desc), then `(document_id, chunk_index)` (asc).
//! 5. Truncate to `top_k`.
//!
//! Cost is `O(N·D)` for `N` candidates of dimension `D`; there is no index.

use crate::embedding::cosine_similarity;
use crate::models::{SearchResult, StoredPassage};

/// Rank `candidates` against `query_vec`.
pub fn rank<'a, I>(query_vec: &[f32], candidates: I, top_k: usize, threshold: f32) -> Vec<SearchResult>
where
    I: IntoIterator<Item = &'a StoredPassage>,
{
    if query_vec.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let mut scanned = 0usize;
    let mut mismatched = 0usize;

    let mut scored: Vec<(f32, &StoredPassage)> = candidates
        .into_iter()
        .filter_map(|p| {
            scanned += 1;
            if p.vector.len() != query_vec.len() {
                mismatched += 1;
                return None;
            }
            let score = cosine_similarity(query_vec, &p.vector);
            (score >= threshold).then_some((score, p))
        })
        .collect();

    if mismatched > 0 {
        tracing::debug!(
            expected = query_vec.len(),
            skipped = mismatched,
            "skipped candidates with mismatched dimensions"
        );
    }

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.total_cmp(sa)
            .then(a.document_id.cmp(&b.document_id))
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    scored.truncate(top_k);

    tracing::debug!(
        scanned,
        returned = scored.len(),
        threshold,
        top_k,
        "ranked candidates"
    );

    scored
        .into_iter()
        .map(|(score, p)| SearchResult {
            document_id: p.document_id,
            chunk_index: p.chunk_index,
            text: p.text.clone(),
            score,
            source_label: p.source_label(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentId, Metadata};

    fn passage(doc: DocumentId, idx: i64, vector: Vec<f32>) -> StoredPassage {
        StoredPassage {
            document_id: doc,
            chunk_index: idx,
            text: format!("doc {} chunk {}", doc, idx),
            vector,
            model_version: "test".to_string(),
            metadata: Metadata::new(),
        }
    }

    fn fixture() -> Vec<StoredPassage> {
        vec![
            passage(1, 0, vec![1.0, 0.0, 0.0]),
            passage(1, 1, vec![0.9, 0.1, 0.0]),
            passage(2, 0, vec![0.0, 1.0, 0.0]),
            passage(2, 1, vec![0.7, 0.7, 0.0]),
            passage(3, 0, vec![-1.0, 0.0, 0.0]),
            passage(3, 1, vec![0.5, 0.5, 0.5]),
        ]
    }

    #[test]
    fn test_rank_orders_descending() {
        let results = rank(&[1.0, 0.0, 0.0], &fixture(), 10, -1.0);
        assert_eq!(results.len(), 6);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!((results[0].document_id, results[0].chunk_index), (1, 0));
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[5].document_id, 3);
        assert!((results[5].score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_threshold_filters() {
        let threshold = 0.6;
        let results = rank(&[1.0, 0.0, 0.0], &fixture(), 10, threshold);
        assert!(results.iter().all(|r| r.score >= threshold));
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_rank_top_k_bound() {
        let candidates = fixture();
        let passing = rank(&[1.0, 0.0, 0.0], &candidates, 100, 0.0).len();
        for k in 1..=8 {
            let results = rank(&[1.0, 0.0, 0.0], &candidates, k, 0.0);
            assert_eq!(results.len(), k.min(passing));
        }
        assert!(rank(&[1.0, 0.0, 0.0], &candidates, 0, 0.0).is_empty());
    }

    #[test]
    fn test_rank_ties_break_by_document_then_chunk() {
        let candidates = vec![
            passage(5, 2, vec![1.0, 0.0]),
            passage(2, 7, vec![2.0, 0.0]),
            passage(5, 0, vec![3.0, 0.0]),
            passage(2, 1, vec![0.5, 0.0]),
        ];
        let results = rank(&[1.0, 0.0], &candidates, 10, 0.0);
        let order: Vec<(DocumentId, i64)> = results
            .iter()
            .map(|r| (r.document_id, r.chunk_index))
            .collect();
        assert_eq!(order, vec![(2, 1), (2, 7), (5, 0), (5, 2)]);
    }

    #[test]
    fn test_rank_skips_dimension_mismatch() {
        let mut candidates = fixture();
        candidates.push(passage(9, 0, vec![1.0, 0.0]));
        candidates.push(passage(9, 1, vec![]));
        let results = rank(&[1.0, 0.0, 0.0], &candidates, 20, -1.0);
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.document_id != 9));
    }

    #[test]
    fn test_rank_zero_vector_scores_zero() {
        let candidates = vec![passage(1, 0, vec![0.0, 0.0])];
        let results = rank(&[1.0, 0.0], &candidates, 5, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 0.0);
        assert!(rank(&[1.0, 0.0], &candidates, 5, 0.01).is_empty());
    }

    #[test]
    fn test_rank_empty_inputs() {
        assert!(rank(&[1.0], &Vec::<StoredPassage>::new(), 5, 0.0).is_empty());
        assert!(rank(&[], &fixture(), 5, 0.0).is_empty());
    }

    #[test]
    fn test_rank_uses_source_label_metadata() {
        let mut p = passage(4, 0, vec![1.0]);
        p.metadata.insert(
            "source_label".to_string(),
            serde_json::Value::String("handbook.pdf".to_string()),
        );
        let unlabeled = passage(5, 0, vec![1.0]);
        let results = rank(&[1.0], [&p, &unlabeled], 5, 0.0);
        assert_eq!(results[0].source_label, "handbook.pdf");
        assert_eq!(results[1].source_label, "document 5");
    }
}
