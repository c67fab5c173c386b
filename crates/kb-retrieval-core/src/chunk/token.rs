//! Fixed token windows with token overlap.
//!
//! Tokens are Unicode word-boundary segments that are not whitespace, so
//! punctuation counts as its own token. A window that stops short of the
//! end of the text is pulled back to just after its last sentence
//! terminal, as long as it keeps at least `max(overlap + 1, size / 2)`
//! tokens. Each window's byte range runs up to the start of the next
//! token, so consecutive windows never leave a gap. The first window
//! starts at byte 0 and the last one ends at the end of the text, so
//! leading and trailing whitespace are covered too.

use unicode_segmentation::UnicodeSegmentation;

use super::{Span, SENTENCE_TERMINALS};

pub(super) fn split(text: &str, size: usize, overlap: usize) -> Vec<Span> {
    let tokens: Vec<(usize, usize)> = text
        .split_word_bound_indices()
        .filter(|(_, w)| !w.chars().all(char::is_whitespace))
        .map(|(i, w)| (i, i + w.len()))
        .collect();

    let n = tokens.len();
    if n == 0 {
        return Vec::new();
    }

    let min_window = (overlap + 1).max(size / 2);
    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + size).min(n);

        if end < n {
            if let Some(t) = (start + min_window - 1..end)
                .rev()
                .find(|&t| is_terminal(&text[tokens[t].0..tokens[t].1]))
            {
                end = t + 1;
            }
        }

        let start_offset = if spans.is_empty() { 0 } else { tokens[start].0 };
        let end_offset = if end < n { tokens[end].0 } else { text.len() };
        spans.push(Span {
            start: start_offset,
            end: end_offset,
            units: end - start,
        });

        if end >= n {
            break;
        }
        start = end - overlap;
    }

    spans
}

fn is_terminal(token: &str) -> bool {
    token.chars().all(|c| SENTENCE_TERMINALS.contains(&c))
}
