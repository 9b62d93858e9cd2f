//! Focus-aware reranking and compression of long-term memory records.

use async_trait::async_trait;
use concierge_core::context::{ContextOptimizer, MemoryRecord};
use concierge_core::error::MemoryError;
use concierge_core::text;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Reranks records by overlap with the query and the carried focus topics,
/// drops duplicates and shortens long records.
#[derive(Debug, Clone)]
pub struct FocusOptimizer {
    /// Records longer than this are truncated.
    pub max_record_chars: usize,
    /// Weight of the fresh relevance score against the retriever's score.
    pub relevance_weight: f32,
}

impl Default for FocusOptimizer {
    fn default() -> Self {
        Self {
            max_record_chars: 600,
            relevance_weight: 0.6,
        }
    }
}

fn normalize(content: &str) -> String {
    text::tokenize(content).join(" ")
}

#[async_trait]
impl ContextOptimizer for FocusOptimizer {
    async fn optimize(
        &self,
        records: Vec<MemoryRecord>,
        focus: &[String],
        query: &str,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let mut terms = text::keywords(query);
        for topic in focus {
            let topic = topic.to_lowercase();
            if !terms.contains(&topic) {
                terms.push(topic);
            }
        }

        let mut seen = HashSet::new();
        let mut out: Vec<MemoryRecord> = Vec::with_capacity(records.len());
        for mut record in records {
            let key = normalize(&record.content);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            if !terms.is_empty() {
                let relevance = text::term_overlap(&terms, &record.content);
                record.score = (self.relevance_weight * relevance
                    + (1.0 - self.relevance_weight) * record.score)
                    .clamp(0.0, 1.0);
            }
            if record.content.chars().count() > self.max_record_chars {
                record.content = text::truncate_chars(&record.content, self.max_record_chars);
                record.metadata.insert("compressed".into(), "true".into());
            }
            record.metadata.insert("optimized".into(), "true".into());
            out.push(record);
        }

        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(out)
    }
}
