//! Search query construction.
//!
//! Full-text searches run in tiers (exact phrase, then prefix, then loose
//! token matching); each tier has its own builder here. The substring
//! backend gets a `LIKE` pattern builder instead.

use regex::Regex;
use std::sync::LazyLock;

/// Terms containing anything beyond word characters must be quoted to stay
/// a single FTS5 token.
static NEEDS_QUOTING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W").unwrap());

/// Escape a single term for an FTS5 query.
pub fn escape_term(term: &str) -> String {
    if NEEDS_QUOTING.is_match(term) {
        format!("\"{}\"", term.replace('"', "\"\""))
    } else {
        term.to_string()
    }
}

/// Exact phrase query: all terms adjacent and in order.
///
/// "social survey" → `"social survey"`
pub fn phrase_query(text: &str) -> String {
    let cleaned = text.trim().to_lowercase();
    if cleaned.is_empty() {
        return String::new();
    }
    format!("\"{}\"", cleaned.replace('"', "\"\""))
}

/// Prefix query: every term must match as a prefix.
///
/// "soc surv" → `soc* surv*`
pub fn prefix_query(text: &str) -> String {
    terms_of(text)
        .iter()
        .map(|term| format!("{}*", escape_term(term)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Loose query: any term may match.
///
/// "social survey" → `social OR survey`
pub fn token_query(text: &str) -> String {
    terms_of(text)
        .iter()
        .map(|term| escape_term(term))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// `LIKE` pattern for the substring backend, with `%`, `_`, and the escape
/// character themselves escaped.
pub fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for c in text.trim().to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("%{}%", escaped)
}

fn terms_of(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
