//! Lightweight text utilities shared by retrieval, relevance scoring and
//! focus tracking. Deterministic and allocation-light; no NLP models.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do",
    "does", "doing", "for", "from", "had", "has", "have", "having", "he", "her", "here",
    "hers", "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "like",
    "me", "more", "most", "my", "no", "not", "now", "of", "on", "only", "or", "our", "out",
    "over", "please", "she", "should", "so", "some", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "too", "up", "very", "was", "we",
    "were", "what", "when", "where", "which", "while", "who", "why", "will", "with", "would",
    "you", "your", "yours", "tell", "know", "want", "need", "get", "got",
];

/// Lowercased alphanumeric tokens of `text`, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Content-bearing keywords: tokens of at least three characters that are
/// not stopwords. Duplicates are removed, first occurrence wins.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Fraction of `terms` that occur as tokens in `text` (0.0 when `terms` is empty).
pub fn term_overlap(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens: BTreeSet<String> = tokenize(text).into_iter().collect();
    let hits = terms.iter().filter(|t| tokens.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

/// Truncate `text` to at most `max_chars` characters, appending `…` when cut.
/// The result never exceeds `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_drop_stopwords_and_short_tokens() {
        let kw = keywords("What is my sister's favourite coffee shop? The coffee one!");
        assert_eq!(kw, vec!["sister", "favourite", "coffee", "shop", "one"]);
    }

    #[test]
    fn keywords_of_greeting_are_empty() {
        assert!(keywords("hi").is_empty());
    }

    #[test]
    fn overlap_counts_fraction_of_terms() {
        let terms = vec!["coffee".to_string(), "paris".to_string()];
        assert_eq!(term_overlap(&terms, "I like coffee."), 0.5);
        assert_eq!(term_overlap(&[], "anything"), 0.0);
    }

    #[test]
    fn truncate_respects_char_budget() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        let cut = truncate_chars("héllo wörld", 6);
        assert_eq!(cut.chars().count(), 6);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
