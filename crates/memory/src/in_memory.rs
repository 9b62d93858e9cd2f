//! In-memory backend: useful for testing and ephemeral sessions.

use crate::search;
use async_trait::async_trait;
use concierge_core::error::MemoryError;
use concierge_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An in-memory backend that stores memories in a Vec.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Clone)]
pub struct InMemoryBackend {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        self.entries.write().await.push(entry);
        Ok(id)
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError> {
        let mut entries = self.entries.write().await;
        let results = search::rank(entries.iter(), &query);
        for hit in &results {
            if let Some(e) = entries.iter_mut().find(|e| e.id == hit.id) {
                e.last_accessed = hit.last_accessed;
            }
        }
        Ok(results)
    }

    async fn update(&self, entry: MemoryEntry) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => {
                *slot = entry;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < len_before)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn list(&self, user_id: &str, include_archived: bool) -> Result<Vec<MemoryEntry>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.user_id == user_id && (include_archived || !e.archived))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.entries.read().await.len())
    }

    async fn clear_user(&self, user_id: &str) -> Result<usize, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| e.user_id != user_id);
        Ok(len_before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_retrieve() {
        let mem = InMemoryBackend::new();
        let id = mem.store(MemoryEntry::new("u1", "Works at a bakery")).await.unwrap();
        assert!(!id.is_empty());

        let entry = mem.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.content, "Works at a bakery");
    }

    #[tokio::test]
    async fn search_is_scoped_to_user() {
        let mem = InMemoryBackend::new();
        mem.store(MemoryEntry::new("u1", "Runs every Sunday morning")).await.unwrap();
        mem.store(MemoryEntry::new("u2", "Runs a small bookshop")).await.unwrap();

        let results = mem.search(MemoryQuery::new("u1", "runs")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("Sunday"));
    }

    #[tokio::test]
    async fn update_replaces_entry() {
        let mem = InMemoryBackend::new();
        let id = mem.store(MemoryEntry::new("u1", "Has one cat")).await.unwrap();

        let mut entry = mem.get(&id).await.unwrap().unwrap();
        entry.content = "Has two cats".into();
        assert!(mem.update(entry).await.unwrap());
        assert_eq!(mem.get(&id).await.unwrap().unwrap().content, "Has two cats");

        let mut ghost = MemoryEntry::new("u1", "nobody");
        ghost.id = "missing".into();
        assert!(!mem.update(ghost).await.unwrap());
    }

    #[tokio::test]
    async fn delete_entry() {
        let mem = InMemoryBackend::new();
        let id = mem.store(MemoryEntry::new("u1", "To be deleted")).await.unwrap();
        assert_eq!(mem.count().await.unwrap(), 1);

        assert!(mem.delete(&id).await.unwrap());
        assert_eq!(mem.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_user_leaves_others() {
        let mem = InMemoryBackend::new();
        mem.store(MemoryEntry::new("u1", "Entry 1")).await.unwrap();
        mem.store(MemoryEntry::new("u1", "Entry 2")).await.unwrap();
        mem.store(MemoryEntry::new("u2", "Entry 3")).await.unwrap();

        assert_eq!(mem.clear_user("u1").await.unwrap(), 2);
        assert_eq!(mem.count().await.unwrap(), 1);
        assert!(mem.list("u1", true).await.unwrap().is_empty());
    }
}
