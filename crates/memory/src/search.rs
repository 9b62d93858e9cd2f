//! Keyword + importance scoring shared by the in-process backends.

use chrono::Utc;
use concierge_core::memory::{MemoryEntry, MemoryQuery};
use concierge_core::text;
use std::cmp::Ordering;

const KEYWORD_WEIGHT: f32 = 0.75;
const IMPORTANCE_WEIGHT: f32 = 0.25;

/// Score, filter and order `entries` for `query`.
///
/// Queries without keywords rank by importance alone; otherwise an entry
/// must share at least one keyword with the query (content or tags).
pub(crate) fn rank<'a>(
    entries: impl Iterator<Item = &'a MemoryEntry>,
    query: &MemoryQuery,
) -> Vec<MemoryEntry> {
    let terms = text::keywords(&query.text);

    let mut results: Vec<MemoryEntry> = entries
        .filter(|e| e.user_id == query.user_id)
        .filter(|e| query.include_archived || !e.archived)
        .filter(|e| query.tags.is_empty() || query.tags.iter().any(|t| e.tags.contains(t)))
        .filter_map(|e| {
            let score = if terms.is_empty() {
                e.importance
            } else {
                let haystack = format!("{} {}", e.content, e.tags.join(" "));
                let overlap = text::term_overlap(&terms, &haystack);
                if overlap <= 0.0 {
                    return None;
                }
                KEYWORD_WEIGHT * overlap + IMPORTANCE_WEIGHT * e.importance
            };
            let mut hit = e.clone();
            hit.score = score;
            hit.last_accessed = Utc::now();
            Some(hit)
        })
        .filter(|e| e.score >= query.min_score)
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    results.truncate(query.limit);
    results
}
