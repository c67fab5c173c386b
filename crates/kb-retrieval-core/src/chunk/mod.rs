//! Passage chunker with token, character, and page boundary policies.
//!
//! [`chunk_text`] is the single entry point. It validates the
//! [`ChunkingConfig`], delegates span selection to the mode's splitter,
//! and turns each span into a [`Chunk`] with a dense index and a SHA-256
//! hash of its text.
//!
//! # Modes
//!
//! | Mode | Units | Boundaries |
//! |------|-------|------------|
//! | `token` | word tokens | fixed window, token overlap, sentence end preferred |
//! | `character` | characters | whole sentences, word-aligned character overlap |
//! | `page` | characters | page markers, else ~2,500-char pages cut at sentence ends |
//!
//! # Guarantees
//!
//! - Empty or whitespace-only text yields zero chunks.
//! - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
//! - Offsets are byte offsets and `chunk.text == text[start_offset..end_offset]`.
//! - Token and character chunks cover the text without gaps.
//! - The same input and config always produce the same chunks.
//!
//! # Example
//!
//! ```rust
//! use kb_retrieval_core::chunk::chunk_text;
//! use kb_retrieval_core::models::{ChunkingConfig, ChunkingMode};
//!
//! let config = ChunkingConfig::new(ChunkingMode::Token, 500, 50);
//! let chunks = chunk_text(7, "Hello world. Second sentence.", &config).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

mod character;
mod page;
mod token;

use sha2::{Digest, Sha256};

use crate::error::RetrievalError;
use crate::models::{Chunk, ChunkingConfig, ChunkingMode, DocumentId};

/// Characters treated as sentence terminals by the token and page splitters.
pub(crate) const SENTENCE_TERMINALS: &[char] = &['.', '!', '?', '。', '！', '？', '…'];

/// A byte range selected by a splitter, with its size in the mode's units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    units: usize,
}

/// Reject configs that cannot make progress.
pub fn validate_config(config: &ChunkingConfig) -> Result<(), RetrievalError> {
    if config.size == 0 {
        return Err(RetrievalError::InvalidChunkConfig(
            "size must be > 0".to_string(),
        ));
    }
    if config.overlap >= config.size {
        return Err(RetrievalError::InvalidChunkConfig(format!(
            "overlap ({}) must be smaller than size ({})",
            config.overlap, config.size
        )));
    }
    Ok(())
}

/// Split `text` into ordered passages according to `config`.
pub fn chunk_text(
    document_id: DocumentId,
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, RetrievalError> {
    validate_config(config)?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let spans = match config.mode {
        ChunkingMode::Token => token::split(text, config.size, config.overlap),
        ChunkingMode::Character => character::split(text, config.size, config.overlap),
        ChunkingMode::Page => page::split(text),
    };

    let chunks: Vec<Chunk> = spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| make_chunk(document_id, i as i64, text, span, config.mode))
        .collect();

    tracing::debug!(
        document_id,
        mode = %config.mode,
        size = config.size,
        overlap = config.overlap,
        chunks = chunks.len(),
        "chunked document"
    );

    Ok(chunks)
}

/// SHA-256 hex digest of a passage's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: DocumentId, index: i64, text: &str, span: Span, mode: ChunkingMode) -> Chunk {
    let slice = &text[span.start..span.end];
    Chunk {
        document_id,
        chunk_index: index,
        text: slice.to_string(),
        start_offset: span.start,
        end_offset: span.end,
        unit_count: span.units,
        mode,
        hash: content_hash(slice),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unicode_segmentation::UnicodeSegmentation;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn cfg(mode: ChunkingMode, size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(mode, size, overlap)
    }

    /// Every byte of `text` lies inside some chunk.
    fn assert_covers(text: &str, chunks: &[Chunk]) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[chunks.len() - 1].end_offset, text.len());
        for pair in chunks.windows(2) {
            assert!(
                pair[1].start_offset <= pair[0].end_offset,
                "gap between chunk {} and {}",
                pair[0].chunk_index,
                pair[1].chunk_index
            );
            assert!(pair[1].start_offset >= pair[0].start_offset);
        }
        for c in chunks {
            assert_eq!(c.text, &text[c.start_offset..c.end_offset]);
        }
    }

    fn token_starts(text: &str) -> Vec<usize> {
        text.split_word_bound_indices()
            .filter(|(_, w)| !w.chars().all(char::is_whitespace))
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        for mode in [ChunkingMode::Token, ChunkingMode::Character, ChunkingMode::Page] {
            assert!(chunk_text(1, "", &cfg(mode, 10, 2)).unwrap().is_empty());
            assert!(chunk_text(1, "  \n\t ", &cfg(mode, 10, 2))
                .unwrap()
                .is_empty());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = chunk_text(1, "text", &cfg(ChunkingMode::Token, 0, 0)).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidChunkConfig(_)));
        let err = chunk_text(1, "text", &cfg(ChunkingMode::Character, 10, 10)).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidChunkConfig(_)));
        let err = chunk_text(1, "", &cfg(ChunkingMode::Page, 10, 11)).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidChunkConfig(_)));
    }

    #[test]
    fn test_token_windows_1200_tokens() {
        let text = words(1200);
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Token, 500, 50)).unwrap();
        assert_eq!(chunks.len(), 3);

        let starts = token_starts(&text);
        assert_eq!(chunks[0].start_offset, starts[0]);
        assert_eq!(chunks[1].start_offset, starts[450]);
        assert_eq!(chunks[2].start_offset, starts[900]);
        assert_eq!(chunks[0].end_offset, starts[500]);
        assert_eq!(chunks[1].end_offset, starts[950]);
        assert_eq!(chunks[2].end_offset, text.len());

        assert_eq!(chunks[0].unit_count, 500);
        assert_eq!(chunks[1].unit_count, 500);
        assert_eq!(chunks[2].unit_count, 300);
        assert!(chunks[1].text.starts_with("w450 "));
        assert!(chunks[2].text.ends_with("w1199"));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.document_id, 1);
        }
    }

    #[test]
    fn test_token_prefers_sentence_end() {
        let text = "a b c d e f. g h i j k l m n o p.";
        let chunks = chunk_text(1, text, &cfg(ChunkingMode::Token, 10, 2)).unwrap();
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].unit_count, 7);
        assert!(chunks[0].text.trim_end().ends_with("f."));
        assert_covers(text, &chunks);
    }

    #[test]
    fn test_token_overlap_bound() {
        let text = sentences(120);
        let overlap = 12;
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Token, 60, overlap)).unwrap();
        let starts = token_starts(&text);
        for pair in chunks.windows(2) {
            let shared = starts
                .iter()
                .filter(|&&s| s >= pair[1].start_offset && s < pair[0].end_offset)
                .count();
            assert!(shared <= overlap, "shared {} tokens", shared);
        }
        for c in &chunks {
            assert!(c.unit_count <= 60);
        }
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_token_zero_overlap_has_no_gaps() {
        let text = words(95);
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Token, 10, 0)).unwrap();
        assert_eq!(chunks.len(), 10);
        assert_covers(&text, &chunks);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_covered() {
        let text = "   alpha beta gamma   ";
        let chunks = chunk_text(1, text, &cfg(ChunkingMode::Token, 10, 2)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].unit_count, 3);
        assert_covers(text, &chunks);

        let text = format!("\n\n  {}  \n", words(25));
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Token, 10, 2)).unwrap();
        assert!(chunks.len() > 1);
        assert_covers(&text, &chunks);

        let text = format!("  {}\n\n", sentences(10));
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Character, 120, 20)).unwrap();
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_character_accumulates_sentences() {
        let text = sentences(40);
        let overlap = 20;
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Character, 200, overlap)).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.unit_count <= 200, "chunk has {} chars", c.unit_count);
            assert_eq!(c.unit_count, c.text.chars().count());
        }
        for pair in chunks.windows(2) {
            let shared = if pair[1].start_offset < pair[0].end_offset {
                text[pair[1].start_offset..pair[0].end_offset].chars().count()
            } else {
                0
            };
            assert!(shared <= overlap, "shared {} chars", shared);
            // Overlap tails start on a word boundary.
            let before = text[..pair[1].start_offset].chars().next_back();
            assert!(before.map_or(true, char::is_whitespace));
        }
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_character_oversized_sentence_kept_whole() {
        let long = format!("{}.", "x".repeat(300));
        let text = format!("Short one. {} Another short one.", long);
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Character, 100, 10)).unwrap();
        let big = chunks
            .iter()
            .find(|c| c.text.contains(&long))
            .expect("oversized sentence present");
        assert!(big.unit_count > 100);
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_character_multibyte_text() {
        let text = "안녕하세요. 이것은 테스트 문장입니다. 페이지를 나누는 실험입니다. ".repeat(20);
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Character, 60, 10)).unwrap();
        assert!(chunks.len() > 1);
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_page_form_feed_markers() {
        let page = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(3);
        let text = format!("{}\x0C{}\x0C{}", page, page, page);
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Page, 500, 0)).unwrap();
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(!c.text.contains('\x0C'));
            assert_eq!(c.text, c.text.trim());
        }
    }

    #[test]
    fn test_page_labelled_markers_and_short_pages() {
        let body = "This page contains enough words to survive the minimum page length filter easily. ".repeat(2);
        let text = format!(
            "Page 1\n{}\nPage 2\ntoo short\n페이지 3\n{}\n=== Page ===\n{}",
            body, body, body
        );
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Page, 500, 0)).unwrap();
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(!c.text.contains("Page 2"));
            assert!(!c.text.contains("too short"));
            assert!(c.unit_count >= 100);
        }
    }

    #[test]
    fn test_page_fallback_cuts_at_sentence_end() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit sed do. ".repeat(120);
        let chunks = chunk_text(1, &text, &cfg(ChunkingMode::Page, 500, 0)).unwrap();
        assert!(chunks.len() >= 3);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.text.ends_with('.'));
            assert!(c.unit_count >= 2300 && c.unit_count <= 2700, "{}", c.unit_count);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = sentences(60);
        for mode in [ChunkingMode::Token, ChunkingMode::Character, ChunkingMode::Page] {
            let config = cfg(mode, 40, 8);
            let c1 = chunk_text(3, &text, &config).unwrap();
            let c2 = chunk_text(3, &text, &config).unwrap();
            assert_eq!(c1, c2);
        }
    }

    #[test]
    fn test_hash_matches_text() {
        let chunks = chunk_text(1, &words(30), &cfg(ChunkingMode::Token, 10, 2)).unwrap();
        for c in &chunks {
            assert_eq!(c.hash, content_hash(&c.text));
        }
    }
}
