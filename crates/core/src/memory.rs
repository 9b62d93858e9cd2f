//! Long-term memory: durable, cross-conversation facts about a user.
//!
//! `MemoryBackend` is the store. `LearningManager` writes into it after a
//! turn; `LifecycleManager` ages, consolidates and archives what is there.

use crate::agent::ToolProvenance;
use crate::error::MemoryError;
use crate::message::ConversationId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory
    pub id: String,

    /// Owner of the memory
    pub user_id: String,

    /// The content of the memory
    pub content: String,

    /// Tags for categorization and legacy lookup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Source of the memory (conversation ID, explicit request, etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// When this memory was last accessed
    pub last_accessed: DateTime<Utc>,

    /// How much this memory matters (0.0–1.0); decays when unused
    #[serde(default = "default_importance")]
    pub importance: f32,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,

    /// Archived memories are kept but excluded from retrieval
    #[serde(default)]
    pub archived: bool,

    /// Last lifecycle pass that aged this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_maintained: Option<DateTime<Utc>>,
}

fn default_importance() -> f32 {
    0.5
}

impl MemoryEntry {
    /// A new entry with an auto-assigned (empty) id; backends fill it in.
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            user_id: user_id.into(),
            content: content.into(),
            tags: Vec::new(),
            source: None,
            created_at: now,
            last_accessed: now,
            importance: default_importance(),
            score: 0.0,
            archived: false,
            last_maintained: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A query for searching memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Owner whose memories are searched
    pub user_id: String,

    /// The search text
    pub text: String,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum relevance score threshold
    #[serde(default)]
    pub min_score: f32,

    /// Filter by tags (any match)
    #[serde(default)]
    pub tags: Vec<String>,

    /// Include archived entries
    #[serde(default)]
    pub include_archived: bool,
}

fn default_limit() -> usize {
    10
}

impl MemoryQuery {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            limit: default_limit(),
            min_score: 0.0,
            tags: Vec::new(),
            include_archived: false,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// The memory store.
///
/// Implementations: in-memory (for testing), JSONL file.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Store a new memory entry. Returns its id.
    async fn store(&self, entry: MemoryEntry) -> Result<String, MemoryError>;

    /// Search memories by query.
    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Replace an existing entry (matched by id). Returns false if absent.
    async fn update(&self, entry: MemoryEntry) -> Result<bool, MemoryError>;

    /// Delete a memory by ID.
    async fn delete(&self, id: &str) -> Result<bool, MemoryError>;

    /// Get a memory by ID.
    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError>;

    /// All memories of a user, oldest first.
    async fn list(&self, user_id: &str, include_archived: bool) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Get total memory count.
    async fn count(&self) -> Result<usize, MemoryError>;

    /// Remove all memories of a user.
    async fn clear_user(&self, user_id: &str) -> Result<usize, MemoryError>;
}

/// Everything a learning pass may look at.
#[derive(Debug, Clone)]
pub struct LearningInput<'a> {
    pub user_id: &'a str,
    pub conversation_id: &'a ConversationId,
    pub user_input: &'a str,
    pub response: &'a str,
    /// The fact the user explicitly asked to remember, if any.
    pub explicit_request: Option<&'a str>,
    pub tools: &'a [ToolProvenance],
}

/// What a learning pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub stored: usize,
    pub explicit: bool,
}

/// Turns finished exchanges into long-term memories.
#[async_trait]
pub trait LearningManager: Send + Sync {
    fn name(&self) -> &str;

    async fn learn(&self, input: &LearningInput<'_>) -> Result<LearningOutcome, MemoryError>;
}

/// What a maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub aged: usize,
    pub consolidated: usize,
    pub archived: usize,
}

/// Ages, consolidates and archives a user's memory store.
#[async_trait]
pub trait LifecycleManager: Send + Sync {
    fn name(&self) -> &str;

    async fn maintain(&self, user_id: &str) -> Result<LifecycleReport, MemoryError>;
}
