//! Memory lifecycle maintenance: aging, consolidation, archiving.

use crate::learning::EXPLICIT_TAG;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::error::MemoryError;
use concierge_core::memory::{LifecycleManager, LifecycleReport, MemoryBackend, MemoryEntry};
use concierge_core::text;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Idle time before an entry starts losing importance.
const GRACE_DAYS: f32 = 1.0;

pub struct DecayLifecycleManager {
    backend: Arc<dyn MemoryBackend>,
    decay_per_day: f32,
    archive_threshold: f32,
}

impl DecayLifecycleManager {
    pub fn new(backend: Arc<dyn MemoryBackend>, decay_per_day: f32, archive_threshold: f32) -> Self {
        Self {
            backend,
            decay_per_day: decay_per_day.max(0.0),
            archive_threshold,
        }
    }

    /// Reduce importance by the idle time since the later of last access and
    /// last maintenance. Returns true when the entry changed.
    fn age(&self, entry: &mut MemoryEntry, now: DateTime<Utc>) -> bool {
        if self.decay_per_day == 0.0 {
            return false;
        }
        let since = entry
            .last_maintained
            .map_or(entry.last_accessed, |m| m.max(entry.last_accessed));
        let idle_days = (now - since).num_seconds().max(0) as f32 / 86_400.0;
        if idle_days < GRACE_DAYS {
            return false;
        }
        entry.importance = (entry.importance - self.decay_per_day * idle_days).max(0.0);
        entry.last_maintained = Some(now);
        true
    }

    fn is_explicit(entry: &MemoryEntry) -> bool {
        entry.tags.iter().any(|t| t == EXPLICIT_TAG)
    }
}

#[async_trait]
impl LifecycleManager for DecayLifecycleManager {
    fn name(&self) -> &str {
        "decay"
    }

    async fn maintain(&self, user_id: &str) -> Result<LifecycleReport, MemoryError> {
        let now = Utc::now();
        let mut report = LifecycleReport::default();
        let entries = self.backend.list(user_id, false).await?;

        // Consolidate entries with the same normalized content into the most
        // important one (oldest on ties). Content without word tokens has no
        // key and is never merged.
        let mut groups: HashMap<String, Vec<MemoryEntry>> = HashMap::new();
        let mut unkeyed = Vec::new();
        for entry in entries {
            let key = text::tokenize(&entry.content).join(" ");
            if key.is_empty() {
                unkeyed.push(vec![entry]);
            } else {
                groups.entry(key).or_default().push(entry);
            }
        }

        let mut survivors = Vec::with_capacity(groups.len() + unkeyed.len());
        for mut group in groups.into_values().chain(unkeyed) {
            group.sort_by(|a, b| {
                b.importance
                    .partial_cmp(&a.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
            let mut keeper = group.remove(0);
            let mut changed = !group.is_empty();
            for dup in group {
                for tag in dup.tags {
                    if !keeper.tags.contains(&tag) {
                        keeper.tags.push(tag);
                    }
                }
                keeper.last_accessed = keeper.last_accessed.max(dup.last_accessed);
                self.backend.delete(&dup.id).await?;
                report.consolidated += 1;
            }

            if self.age(&mut keeper, now) {
                report.aged += 1;
                changed = true;
            }
            if !keeper.archived && keeper.importance < self.archive_threshold && !Self::is_explicit(&keeper) {
                keeper.archived = true;
                report.archived += 1;
                changed = true;
            }
            if changed {
                survivors.push(keeper);
            }
        }

        for entry in survivors {
            self.backend.update(entry).await?;
        }

        debug!(
            user_id,
            aged = report.aged,
            consolidated = report.consolidated,
            archived = report.archived,
            "Memory maintenance complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;
    use chrono::Duration;

    fn idle(content: &str, days: i64, importance: f32) -> MemoryEntry {
        let mut entry = MemoryEntry::new("u1", content).with_importance(importance);
        entry.created_at = Utc::now() - Duration::days(days);
        entry.last_accessed = entry.created_at;
        entry
    }

    #[tokio::test]
    async fn ages_idle_entries_once_per_period() {
        let backend = Arc::new(InMemoryBackend::new());
        let id = backend.store(idle("Plays chess", 10, 0.5)).await.unwrap();
        let manager = DecayLifecycleManager::new(backend.clone(), 0.02, 0.1);

        let first = manager.maintain("u1").await.unwrap();
        assert_eq!(first.aged, 1);
        let aged = backend.get(&id).await.unwrap().unwrap();
        assert!((aged.importance - 0.3).abs() < 0.01);

        let second = manager.maintain("u1").await.unwrap();
        assert_eq!(second.aged, 0);
    }

    #[tokio::test]
    async fn consolidates_duplicates_and_merges_tags() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .store(MemoryEntry::new("u1", "Vegetarian").with_tags(vec!["food".into()]))
            .await
            .unwrap();
        backend
            .store(
                MemoryEntry::new("u1", "vegetarian!")
                    .with_tags(vec!["diet".into()])
                    .with_importance(0.8),
            )
            .await
            .unwrap();
        let manager = DecayLifecycleManager::new(backend.clone(), 0.0, 0.1);

        let report = manager.maintain("u1").await.unwrap();
        assert_eq!(report.consolidated, 1);

        let left = backend.list("u1", true).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].importance, 0.8);
        assert!(left[0].tags.contains(&"food".to_string()));
        assert!(left[0].tags.contains(&"diet".to_string()));
    }

    #[tokio::test]
    async fn symbol_only_entries_are_not_merged() {
        let backend = Arc::new(InMemoryBackend::new());
        for content in ["🎉🎉", "👍", "☕ !"] {
            backend.store(MemoryEntry::new("u1", content)).await.unwrap();
        }
        let manager = DecayLifecycleManager::new(backend.clone(), 0.0, 0.1);

        let report = manager.maintain("u1").await.unwrap();
        assert_eq!(report.consolidated, 0);

        let mut left: Vec<String> = backend.list("u1", true).await.unwrap().into_iter().map(|e| e.content).collect();
        left.sort();
        let mut expected = vec!["🎉🎉".to_string(), "👍".to_string(), "☕ !".to_string()];
        expected.sort();
        assert_eq!(left, expected);
    }

    #[tokio::test]
    async fn archives_below_threshold_but_not_explicit() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.store(idle("Old trivia", 30, 0.2)).await.unwrap();
        backend
            .store(idle("Blood type O negative", 30, 0.2).with_tags(vec![EXPLICIT_TAG.into()]))
            .await
            .unwrap();
        let manager = DecayLifecycleManager::new(backend.clone(), 0.02, 0.1);

        let report = manager.maintain("u1").await.unwrap();
        assert_eq!(report.archived, 1);
        let visible = backend.list("u1", false).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].content, "Blood type O negative");
    }
}
