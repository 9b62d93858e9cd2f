//! Retrieval-side collaborators: where turn context comes from.
//!
//! Long-term memory arrives as text made of blank-line separated records;
//! knowledge-base documents arrive as loosely shaped JSON values whose
//! content is extracted during injection.

use crate::error::MemoryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One discrete long-term memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Relevance in 0.0–1.0.
    #[serde(default)]
    pub score: f32,
}

impl MemoryRecord {
    /// A record with default metadata (`source=ltm`, `type=memory`).
    pub fn new(content: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".into(), "ltm".into());
        metadata.insert("type".into(), "memory".into());
        Self {
            content: content.into(),
            metadata,
            score: 0.5,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }
}

/// Split long-term memory text into records on blank-line boundaries.
pub fn parse_memory_records(text: &str) -> Vec<MemoryRecord> {
    let mut records = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(MemoryRecord::new(current.join("\n")));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        records.push(MemoryRecord::new(current.join("\n")));
    }
    records
}

/// Render records as long-term memory text (inverse of `parse_memory_records`).
pub fn render_memory_records(records: &[MemoryRecord]) -> String {
    records
        .iter()
        .map(|r| r.content.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Relevance-scoring long-term memory retriever.
#[async_trait]
pub trait LtmRetriever: Send + Sync {
    async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;
}

/// Legacy tag-keyed retrieval, used when the scoring retriever is absent or failing.
#[async_trait]
pub trait TaggedMemoryRetriever: Send + Sync {
    async fn retrieve_by_tags(
        &self,
        user_id: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Option<String>, MemoryError>;
}

/// Reranks and compresses records with the turn's focus areas in mind.
#[async_trait]
pub trait ContextOptimizer: Send + Sync {
    async fn optimize(
        &self,
        records: Vec<MemoryRecord>,
        focus: &[String],
        query: &str,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;
}

/// External knowledge base queried for retrieval-augmented context.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn query_knowledge_base(
        &self,
        user_id: &str,
        user_input: &str,
    ) -> Result<Vec<serde_json::Value>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_blank_lines() {
        let text = "Likes green tea\nespecially sencha\n\n  \nLives in Porto\n\n";
        let records = parse_memory_records(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "Likes green tea\nespecially sencha");
        assert_eq!(records[1].content, "Lives in Porto");
        assert_eq!(records[0].metadata["source"], "ltm");
    }

    #[test]
    fn parse_empty_text_yields_nothing() {
        assert!(parse_memory_records("").is_empty());
        assert!(parse_memory_records("\n\n \n").is_empty());
    }

    #[test]
    fn render_joins_with_blank_lines() {
        let records = vec![MemoryRecord::new("a"), MemoryRecord::new(" "), MemoryRecord::new("b")];
        assert_eq!(render_memory_records(&records), "a\n\nb");
    }
}
