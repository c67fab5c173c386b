//! Embedding trait, text preprocessing, and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! plus pure helpers shared by all of them: [`preprocess_text`],
//! [`normalize_l2`], [`cosine_similarity`], and the BLOB codec used by the
//! SQLite store.
//!
//! Concrete model-backed providers (fastembed, tract, OpenAI, Ollama)
//! live in the `kb-retrieval` app crate. [`HashingEmbedder`] lives here
//! because it is pure and deterministic.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::RetrievalError;

/// Punctuation kept by [`preprocess_text`]; everything else that is not a
/// letter, digit, or whitespace is dropped.
const ALLOWED_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '\'', '"', '(', ')', '-', '/', '&', '%', '…', '。', '、', '！',
    '？',
];

/// A text embedding backend.
///
/// Implementations load their model at most once: [`initialize`](Embedder::initialize)
/// is idempotent and safe under concurrent callers, and [`embed`](Embedder::embed)
/// initializes lazily on first use. Returned vectors are L2-normalized and
/// have exactly [`dims`](Embedder::dims) components.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier stored next to every vector (e.g. `"all-minilm-l6-v2"`).
    fn model_version(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Load the model. A failure is surfaced, never replaced by fake vectors.
    async fn initialize(&self) -> Result<(), RetrievalError>;

    /// Embed one passage or query.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Normalize text before vectorization.
///
/// Collapses whitespace runs to a single space, drops characters outside
/// the allow-list (letters of any script, digits, basic punctuation),
/// trims, and truncates to `max_chars` characters.
pub fn preprocess_text(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(text.len().min(max_chars * 4));
    let mut count = 0usize;
    let mut pending_space = false;

    for c in text.chars() {
        if count >= max_chars {
            break;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if !(c.is_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c)) {
            continue;
        }
        if pending_space && count > 0 {
            out.push(' ');
            count += 1;
            if count >= max_chars {
                break;
            }
        }
        pending_space = false;
        out.push(c);
        count += 1;
    }

    out.truncate(out.trim_end().len());
    out
}

/// Preprocess and reject input that has nothing left to embed.
pub fn prepare_input(text: &str, max_chars: usize) -> Result<String, RetrievalError> {
    let cleaned = preprocess_text(text, max_chars);
    if cleaned.is_empty() {
        return Err(RetrievalError::EmbeddingFailure(
            "input is empty after preprocessing".to_string(),
        ));
    }
    Ok(cleaned)
}

/// Check a provider's output length and normalize it.
pub fn finish_vector(vector: Vec<f32>, dims: usize) -> Result<Vec<f32>, RetrievalError> {
    if vector.len() != dims {
        return Err(RetrievalError::EmbeddingFailure(
            RetrievalError::DimensionMismatch {
                expected: dims,
                actual: vector.len(),
            }
            .to_string(),
        ));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(RetrievalError::EmbeddingFailure(
            "model returned non-finite values".to_string(),
        ));
    }
    Ok(normalize_l2(vector))
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use kb_retrieval_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), Some(v));
/// assert_eq!(blob_to_vec(&blob[..5]), None);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. `None` if the length is not a
/// multiple of 4.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Compute cosine similarity between two embedding vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
///
/// Returns `0.0` when either norm is zero, and for vectors of different
/// lengths (callers skip those before scoring).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Deterministic signed feature-hashing embedder.
///
/// Each lowercase word of the preprocessed text is hashed (SHA-256) into
/// one of `dims` buckets with a ±1 sign; the counts are L2-normalized.
/// Texts sharing vocabulary score high, identical texts score exactly 1.
/// Needs no model download, which makes it the provider for offline runs
/// and tests.
pub struct HashingEmbedder {
    model_version: String,
    dims: usize,
    max_chars: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize, max_chars: usize) -> Self {
        Self {
            model_version: format!("hash-{}", dims),
            dims,
            max_chars,
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn initialize(&self) -> Result<(), RetrievalError> {
        if self.dims == 0 {
            return Err(RetrievalError::ModelInitializationFailure(
                "hashing embedder needs dims > 0".to_string(),
            ));
        }
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.initialize().await?;
        let cleaned = prepare_input(text, self.max_chars)?;

        let mut vector = vec![0.0f32; self.dims];
        let mut any = false;
        for word in cleaned.unicode_words() {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
            any = true;
        }

        if !any {
            return Err(RetrievalError::EmbeddingFailure(
                "no words to embed".to_string(),
            ));
        }

        finish_vector(vector, self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), Some(vec));
        assert_eq!(blob_to_vec(&[]), Some(Vec::new()));
        assert_eq!(blob_to_vec(&[0, 0, 128, 63, 7]), None);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let v = vec![0.3, -1.2, 4.0];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_preprocess_collapses_and_filters() {
        let out = preprocess_text("  Hello,\n\n  wörld!  <b>$$$</b>  안녕 42  ", 100);
        assert_eq!(out, "Hello, wörld! b/b 안녕 42");
    }

    #[test]
    fn test_preprocess_truncates() {
        let out = preprocess_text("abcdefghij klmnop", 5);
        assert_eq!(out, "abcde");
        assert_eq!(preprocess_text("ab cd", 3), "ab");
    }

    #[test]
    fn test_prepare_input_rejects_empty() {
        let err = prepare_input("  $$$ ###  ", 100).unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingFailure(_)));
    }

    #[test]
    fn test_finish_vector_checks_dims() {
        assert!(finish_vector(vec![1.0, 2.0], 3).is_err());
        let v = finish_vector(vec![3.0, 4.0], 2).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64, 1000);
        let a = e.embed("the quick brown fox").await.unwrap();
        let b = e.embed("The  quick brown   fox").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(e.model_version(), "hash-64");
    }

    #[tokio::test]
    async fn test_hashing_embedder_similarity_tracks_overlap() {
        let e = HashingEmbedder::new(256, 1000);
        let q = e.embed("rust ownership borrowing lifetimes").await.unwrap();
        let near = e.embed("ownership and borrowing in rust").await.unwrap();
        let far = e.embed("gardening tomatoes in summer").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_hashing_embedder_rejects_zero_dims() {
        let e = HashingEmbedder::new(0, 100);
        assert!(matches!(
            e.initialize().await,
            Err(RetrievalError::ModelInitializationFailure(_))
        ));
    }
}
