//! Sentence accumulation under a character budget.
//!
//! Sentences come from Unicode sentence segmentation and keep their
//! trailing whitespace, so adjacent sentences tile the text exactly.

use unicode_segmentation::UnicodeSegmentation;

use super::Span;

pub(super) fn split(text: &str, size: usize, overlap: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    // (start, end, chars) of the chunk being built.
    let mut current: Option<(usize, usize, usize)> = None;

    for (idx, sentence) in text.split_sentence_bound_indices() {
        let s_end = idx + sentence.len();
        let s_chars = sentence.chars().count();

        let Some((start, end, chars)) = current else {
            current = Some((idx, s_end, s_chars));
            continue;
        };

        // Whitespace never starts or ends a chunk of its own.
        if chars + s_chars <= size
            || text[start..end].trim().is_empty()
            || sentence.trim().is_empty()
        {
            current = Some((start, s_end, chars + s_chars));
            continue;
        }

        spans.push(Span {
            start,
            end,
            units: chars,
        });

        if s_chars >= size {
            // Oversized sentence: its own chunk, no overlap prefix.
            current = Some((idx, s_end, s_chars));
            continue;
        }

        let budget = overlap.min(size - s_chars);
        let tail = overlap_start(text, start, end, budget);
        let tail_chars = text[tail..end].chars().count();
        current = Some((tail, s_end, tail_chars + s_chars));
    }

    if let Some((start, end, chars)) = current {
        if !text[start..end].trim().is_empty() {
            spans.push(Span {
                start,
                end,
                units: chars,
            });
        }
    }

    spans
}

/// Byte offset where the word-aligned overlap tail of `text[start..end]`
/// begins. The tail holds at most `budget` characters; `end` means no tail.
fn overlap_start(text: &str, start: usize, end: usize, budget: usize) -> usize {
    if budget == 0 {
        return end;
    }
    let slice = &text[start..end];
    let cut = slice
        .char_indices()
        .rev()
        .nth(budget - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut pos = cut;
    let mid_word = slice[..cut]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace());
    if mid_word {
        match slice[cut..].find(char::is_whitespace) {
            Some(ws) => pos = cut + ws,
            None => return end,
        }
    }

    let skip = slice[pos..]
        .find(|c: char| !c.is_whitespace())
        .unwrap_or(slice.len() - pos);
    start + pos + skip
}
