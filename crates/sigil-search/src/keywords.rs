//! Deterministic keyword derivation.
//!
//! The same pipeline runs over indexed content and over live search
//! queries; relevance depends on the two matching exactly.

/// Punctuation stripped before tokenization.
const PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '"', '\'', '`', '(', ')', '[', ']', '{', '}', '<', '>', '/',
    '\\', '|', '@', '#', '$', '%', '^', '&', '*', '-', '_', '=', '+', '~',
];

/// English stop-words removed from keyword strings.
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "down", "during", "each", "few", "for", "from", "further", "had", "has", "have",
    "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into", "is",
    "it", "its", "just", "me", "more", "most", "my", "no", "nor", "not", "now", "of", "off",
    "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "would", "you", "your", "yours",
];

/// Reduce raw text to a normalized keyword string.
///
/// Pipeline: lowercase, newlines to spaces, punctuation to spaces, collapse
/// repeated whitespace, drop stop-words, rejoin with single spaces.
pub fn keywordize(text: &str) -> String {
    let lowered = text.to_lowercase();

    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c == '\n' || c == '\r' || PUNCTUATION.contains(&c) {
                ' '
            } else {
                c
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| !STOP_WORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}
