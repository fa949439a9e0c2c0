//! Text helpers: markdown-aware word counting and length targets.

use std::sync::LazyLock;

use regex::Regex;

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());

/// Bodies the source reports for removed content.
const DELETED_MARKERS: &[&str] = &["[deleted]", "[removed]"];

/// Count words after reducing markdown emphasis, inline code and links to their text.
pub fn count_words(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = CODE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    text.split_whitespace().count()
}

/// Target TLDR length: 17% of the source, clamped to 40..=400 words.
pub fn summary_target_words(source_words: usize) -> usize {
    (source_words * 17 / 100).clamp(40, 400)
}

/// Whether a body is exactly a removal marker.
pub fn is_removal_marker(body: &str) -> bool {
    DELETED_MARKERS.contains(&body.trim())
}

/// Whether a body is empty or a removal marker.
pub fn is_deleted_body(body: &str) -> bool {
    body.trim().is_empty() || is_removal_marker(body)
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
