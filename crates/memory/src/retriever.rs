//! Long-term memory retrieval over any `MemoryBackend`.
//!
//! One type serves both retrieval tiers: scored retrieval (keyword overlap,
//! importance, recency) and the legacy tag-keyed lookup that the context
//! service falls back to.

use async_trait::async_trait;
use chrono::Utc;
use concierge_core::context::{LtmRetriever, MemoryRecord, TaggedMemoryRetriever};
use concierge_core::error::MemoryError;
use concierge_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use std::cmp::Ordering;
use std::sync::Arc;

const RECENCY_WEIGHT: f32 = 0.15;
/// Days after which the recency bonus has halved.
const RECENCY_HALF_LIFE_DAYS: f32 = 14.0;

pub struct StoreRetriever {
    backend: Arc<dyn MemoryBackend>,
}

impl StoreRetriever {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }

    fn recency(entry: &MemoryEntry) -> f32 {
        let age_days = (Utc::now() - entry.created_at).num_seconds().max(0) as f32 / 86_400.0;
        1.0 / (1.0 + age_days / RECENCY_HALF_LIFE_DAYS)
    }

    fn to_record(entry: &MemoryEntry, score: f32) -> MemoryRecord {
        let mut record = MemoryRecord::new(entry.content.clone()).with_score(score);
        record.metadata.insert("memory_id".into(), entry.id.clone());
        record
            .metadata
            .insert("created_at".into(), entry.created_at.to_rfc3339());
        if !entry.tags.is_empty() {
            record.metadata.insert("tags".into(), entry.tags.join(","));
        }
        record
    }
}

#[async_trait]
impl LtmRetriever for StoreRetriever {
    async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let hits = self
            .backend
            .search(MemoryQuery::new(user_id, query).with_limit(limit.saturating_mul(2).max(limit)))
            .await?;

        let mut scored: Vec<(f32, &MemoryEntry)> = hits
            .iter()
            .map(|e| {
                let score = (1.0 - RECENCY_WEIGHT) * e.score + RECENCY_WEIGHT * Self::recency(e);
                (score, e)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, e)| Self::to_record(e, score))
            .collect())
    }
}

#[async_trait]
impl TaggedMemoryRetriever for StoreRetriever {
    async fn retrieve_by_tags(
        &self,
        user_id: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Option<String>, MemoryError> {
        if tags.is_empty() || limit == 0 {
            return Ok(None);
        }
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();

        let mut matches: Vec<MemoryEntry> = self
            .backend
            .list(user_id, false)
            .await?
            .into_iter()
            .filter(|e| {
                e.tags.iter().any(|t| wanted.contains(&t.to_lowercase()))
                    || concierge_core::text::tokenize(&e.content)
                        .iter()
                        .any(|t| wanted.contains(t))
            })
            .collect();

        matches.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        matches.truncate(limit);

        if matches.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            matches
                .iter()
                .map(|e| e.content.trim())
                .collect::<Vec<_>>()
                .join("\n\n"),
        ))
    }
}
