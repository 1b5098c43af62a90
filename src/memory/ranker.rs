//! Keyword ranking over stored memories
//!
//! Scores are the number of distinct query keywords an entry contains. When
//! nothing matches, the most recent entries are used instead so a gated turn
//! still gets some continuity.

use crate::memory::MemoryEntry;

/// Number of entries included in a context string
pub const DEFAULT_CONTEXT_LIMIT: usize = 5;

/// Entries used when no keyword matches
pub const RECENT_FALLBACK: usize = 3;

/// Words too common to carry meaning in a query
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "but", "did", "do", "for", "how", "i", "in", "is", "it",
    "me", "my", "of", "on", "or", "so", "that", "the", "to", "was", "what", "with", "you",
];

/// Lowercase tokens without punctuation or stop words
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|s| !s.is_empty() && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

/// Count of query tokens found in the content
pub fn calculate_score(content: &str, query_tokens: &[String]) -> usize {
    let content_lower = content.to_lowercase();
    query_tokens
        .iter()
        .filter(|token| content_lower.contains(token.as_str()))
        .count()
}

/// Picks the entries most relevant to `query`, best first
pub fn rank<'a>(entries: &'a [MemoryEntry], query: &str, limit: usize) -> Vec<&'a MemoryEntry> {
    let tokens = tokenize(query);
    let mut scored: Vec<(usize, &MemoryEntry)> = entries
        .iter()
        .map(|entry| (calculate_score(&entry.content, &tokens), entry))
        .filter(|(score, _)| *score > 0)
        .collect();

    if scored.is_empty() {
        let mut recent: Vec<&MemoryEntry> = entries.iter().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(RECENT_FALLBACK.min(limit));
        return recent;
    }

    // Ties go to the newer entry
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.timestamp.cmp(&a.1.timestamp)));
    scored.into_iter().take(limit).map(|(_, e)| e).collect()
}

/// Renders ranked entries as a bullet list; empty when there are none
pub fn render_context(entries: &[&MemoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("- {}", entry.content))
        .collect::<Vec<_>>()
        .join("\n")
}
