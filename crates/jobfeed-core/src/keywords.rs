//! Keyword tokenizer shared by the résumé matcher.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "will", "with", "have", "had", "were", "been",
    "this",
];

/// Lower-cased alphanumeric tokens longer than two characters, minus stopwords.
///
/// Tokens are word runs (letters, digits, underscore); a token containing an
/// underscore is not alphanumeric and is discarded whole.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() > 2)
        .filter(|token| token.chars().all(char::is_alphanumeric))
        .filter(|token| !STOPWORDS.contains(token))
        .map(ToString::to_string)
        .collect()
}
