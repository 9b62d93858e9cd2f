//! A small keyword-scored knowledge base.
//!
//! Documents are either added directly or loaded from a directory of
//! `.md`/`.txt` files. Results are returned as JSON objects
//! (`id`, `title`, `content`, `score`) so the injection step can treat them
//! like any other retrieval source.

use async_trait::async_trait;
use concierge_core::context::KnowledgeBase;
use concierge_core::error::MemoryError;
use concierge_core::text;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Restrict the document to one user; `None` is shared.
    #[serde(default)]
    pub user_id: Option<String>,
}

pub struct InMemoryKnowledgeBase {
    documents: RwLock<Vec<KnowledgeDocument>>,
    limit: usize,
}

impl InMemoryKnowledgeBase {
    pub fn new(limit: usize) -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            limit,
        }
    }

    pub async fn add_document(&self, document: KnowledgeDocument) {
        self.documents.write().await.push(document);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Load every `.md` and `.txt` file in `dir` as a shared document.
    /// Unreadable files are skipped.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize, MemoryError> {
        let mut reader = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| MemoryError::KnowledgeBase(format!("{}: {e}", dir.display())))?;

        let mut loaded = 0;
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|e| MemoryError::KnowledgeBase(e.to_string()))?
        {
            let path = item.path();
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
            if !is_text {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let title = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("untitled")
                        .to_string();
                    self.add_document(KnowledgeDocument {
                        id: path.display().to_string(),
                        title,
                        content,
                        user_id: None,
                    })
                    .await;
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable knowledge file"),
            }
        }
        debug!(dir = %dir.display(), loaded, "Knowledge base loaded");
        Ok(loaded)
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn query_knowledge_base(
        &self,
        user_id: &str,
        user_input: &str,
    ) -> Result<Vec<serde_json::Value>, MemoryError> {
        let terms = text::keywords(user_input);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().await;
        let mut hits: Vec<(f32, &KnowledgeDocument)> = documents
            .iter()
            .filter(|d| d.user_id.as_deref().is_none_or(|owner| owner == user_id))
            .map(|d| (text::term_overlap(&terms, &format!("{} {}", d.title, d.content)), d))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        hits.truncate(self.limit);

        Ok(hits
            .into_iter()
            .map(|(score, d)| {
                serde_json::json!({
                    "id": d.id,
                    "title": d.title,
                    "content": d.content,
                    "score": score,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, content: &str, owner: Option<&str>) -> KnowledgeDocument {
        KnowledgeDocument {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            user_id: owner.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn returns_scored_json_documents() {
        let kb = InMemoryKnowledgeBase::new(5);
        kb.add_document(doc("1", "Refund policy", "Refunds are processed within 5 days", None)).await;
        kb.add_document(doc("2", "Opening hours", "Open 9 to 5 on weekdays", None)).await;

        let hits = kb.query_knowledge_base("u1", "how long do refunds take").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["title"], "Refund policy");
        assert!(hits[0]["score"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn private_documents_scoped_to_owner() {
        let kb = InMemoryKnowledgeBase::new(5);
        kb.add_document(doc("1", "Lease", "Apartment lease renews in May", Some("u2"))).await;

        assert!(kb.query_knowledge_base("u1", "lease renewal").await.unwrap().is_empty());
        assert_eq!(kb.query_knowledge_base("u2", "lease renewal").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_dir_reads_text_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wifi.md"), "Guest wifi password is on the fridge").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let kb = InMemoryKnowledgeBase::new(5);
        assert_eq!(kb.load_dir(dir.path()).await.unwrap(), 1);
        let hits = kb.query_knowledge_base("u1", "wifi password").await.unwrap();
        assert_eq!(hits[0]["title"], "wifi");
    }
}
