//! File-based memory backend: persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `MemoryEntry`. Entries are loaded into memory
//! on creation and the whole file is rewritten on every mutation, via a
//! temporary sibling file renamed into place.

use crate::search;
use async_trait::async_trait;
use concierge_core::error::MemoryError;
use concierge_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A file-backed memory store using JSONL (one JSON object per line).
pub struct FileBackend {
    path: PathBuf,
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl FileBackend {
    /// Open the store at `path`. A missing file starts empty and is created
    /// on first write; corrupted lines are skipped.
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "File memory backend loaded");
        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<MemoryEntry> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory entry");
                    None
                }
            })
            .collect()
    }

    /// Rewrite the file from `entries`.
    async fn flush(&self, entries: &[MemoryEntry]) -> Result<(), MemoryError> {
        let mut content = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| MemoryError::Storage(format!("Failed to serialize memory entry: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::Storage(format!("Failed to create memory directory: {e}")))?;
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to replace memory file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();
        let mut entries = self.entries.write().await;
        entries.push(entry);
        self.flush(&entries).await?;
        Ok(id)
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError> {
        // Access times are refreshed in memory only; they reach disk with the
        // next mutation.
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
        let Some(slot) = entries.iter_mut().find(|e| e.id == entry.id) else {
            return Ok(false);
        };
        *slot = entry;
        self.flush(&entries).await?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| e.id != id);
        let deleted = entries.len() < len_before;
        if deleted {
            self.flush(&entries).await?;
        }
        Ok(deleted)
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
        let removed = len_before - entries.len();
        if removed > 0 {
            self.flush(&entries).await?;
        }
        Ok(removed)
    }
}
