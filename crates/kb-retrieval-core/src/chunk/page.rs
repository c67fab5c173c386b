//! Page splitting for extracted documents.
//!
//! Explicit page markers win: form feeds, `Page N` / `페이지 N` lines, and
//! `=== Page ===` style rules. Without any marker the text is cut into
//! estimated pages of [`PAGE_CHARS`] characters, each extended by up to
//! [`PAGE_LOOKAHEAD`] characters to finish the current sentence. Pages
//! shorter than [`MIN_PAGE_CHARS`] after trimming are dropped.

use regex::Regex;
use std::sync::LazyLock;

use super::Span;

pub const PAGE_CHARS: usize = 2500;
pub const PAGE_LOOKAHEAD: usize = 200;
pub const MIN_PAGE_CHARS: usize = 100;

static PAGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)\x0C|^[ \t]*(?:page[ \t]+\d+|페이지[ \t]*\d+|=+[ \t]*page[ \t]*\d*[ \t]*=+)[ \t\r]*$",
    )
    .expect("page marker pattern compiles")
});

pub(super) fn split(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut pos = 0usize;
    let mut found_marker = false;

    for m in PAGE_MARKER.find_iter(text) {
        found_marker = true;
        push_page(text, pos, m.start(), &mut spans);
        pos = m.end();
    }

    if found_marker {
        push_page(text, pos, text.len(), &mut spans);
        return spans;
    }

    while pos < text.len() {
        let target = advance_chars(text, pos, PAGE_CHARS);
        let end = if target >= text.len() {
            text.len()
        } else {
            let window_end = advance_chars(text, target, PAGE_LOOKAHEAD);
            text[target..window_end]
                .char_indices()
                .find(|(_, c)| matches!(c, '.' | '!' | '?' | '。' | '\n'))
                .map(|(i, c)| target + i + c.len_utf8())
                .unwrap_or(target)
        };
        push_page(text, pos, end, &mut spans);
        pos = end;
    }

    spans
}

fn push_page(text: &str, start: usize, end: usize, spans: &mut Vec<Span>) {
    let raw = &text[start..end];
    let lead = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();
    let units = trimmed.chars().count();
    if units < MIN_PAGE_CHARS {
        return;
    }
    let page_start = start + lead;
    spans.push(Span {
        start: page_start,
        end: page_start + trimmed.len(),
        units,
    });
}

/// Byte offset `n` characters after `from`, clamped to the text length.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}
