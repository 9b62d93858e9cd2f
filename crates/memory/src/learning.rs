//! Learning from finished exchanges.
//!
//! Explicit "remember …" requests are stored with high importance. Without
//! one, substantive exchanges are auto-saved at lower importance when
//! `auto_save` is on.

use async_trait::async_trait;
use concierge_core::error::MemoryError;
use concierge_core::memory::{
    LearningInput, LearningManager, LearningOutcome, MemoryBackend, MemoryEntry,
};
use concierge_core::text;
use std::sync::Arc;
use tracing::debug;

pub const EXPLICIT_TAG: &str = "explicit";
pub const EXCHANGE_TAG: &str = "exchange";

const EXPLICIT_IMPORTANCE: f32 = 0.9;
const EXCHANGE_IMPORTANCE: f32 = 0.4;
const MAX_TAG_KEYWORDS: usize = 5;
const MAX_EXCHANGE_CHARS: usize = 500;

pub struct MemoryLearningManager {
    backend: Arc<dyn MemoryBackend>,
    auto_save: bool,
    /// Inputs shorter than this are never auto-saved.
    min_exchange_chars: usize,
}

impl MemoryLearningManager {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            backend,
            auto_save: true,
            min_exchange_chars: 40,
        }
    }

    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn with_min_exchange_chars(mut self, chars: usize) -> Self {
        self.min_exchange_chars = chars;
        self
    }

    fn tags_for(text: &str, extra: &str) -> Vec<String> {
        let mut tags: Vec<String> = text::keywords(text).into_iter().take(MAX_TAG_KEYWORDS).collect();
        tags.push(extra.to_string());
        tags
    }

    async fn already_known(&self, user_id: &str, fact: &str) -> Result<bool, MemoryError> {
        let normalized = fact.trim().to_lowercase();
        Ok(self
            .backend
            .list(user_id, true)
            .await?
            .iter()
            .any(|e| e.content.trim().to_lowercase() == normalized))
    }
}

#[async_trait]
impl LearningManager for MemoryLearningManager {
    fn name(&self) -> &str {
        "store"
    }

    async fn learn(&self, input: &LearningInput<'_>) -> Result<LearningOutcome, MemoryError> {
        if let Some(fact) = input.explicit_request.map(str::trim).filter(|f| !f.is_empty()) {
            if self.already_known(input.user_id, fact).await? {
                debug!(user_id = %input.user_id, "Explicit memory already stored");
                return Ok(LearningOutcome { stored: 0, explicit: true });
            }
            let entry = MemoryEntry::new(input.user_id, fact)
                .with_tags(Self::tags_for(fact, EXPLICIT_TAG))
                .with_importance(EXPLICIT_IMPORTANCE)
                .with_source(input.conversation_id.as_str());
            self.backend.store(entry).await?;
            return Ok(LearningOutcome { stored: 1, explicit: true });
        }

        if !self.auto_save
            || input.user_input.trim().chars().count() < self.min_exchange_chars
            || input.response.trim().is_empty()
        {
            return Ok(LearningOutcome::default());
        }

        let content = text::truncate_chars(
            &format!(
                "User said: {}\nAssistant replied: {}",
                input.user_input.trim(),
                input.response.trim()
            ),
            MAX_EXCHANGE_CHARS,
        );
        let mut tags = Self::tags_for(input.user_input, EXCHANGE_TAG);
        for tool in input.tools {
            let tag = format!("tool:{}", tool.name);
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        let entry = MemoryEntry::new(input.user_id, content)
            .with_tags(tags)
            .with_importance(EXCHANGE_IMPORTANCE)
            .with_source(input.conversation_id.as_str());
        self.backend.store(entry).await?;
        Ok(LearningOutcome { stored: 1, explicit: false })
    }
}
