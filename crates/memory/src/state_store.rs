//! In-process conversation store: for tests and ephemeral runs.
//!
//! States are kept in their serialized form so a load behaves exactly like
//! one from a durable store: only what survives JSON comes back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::error::StorageError;
use concierge_core::storage::{self, InteractionRecord, StorageManager};
use concierge_core::{AgentState, ConversationId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    states: HashMap<ConversationId, (String, DateTime<Utc>)>,
    active: HashMap<String, ConversationId>,
    interactions: Vec<InteractionRecord>,
}

#[derive(Default)]
pub struct InMemoryStateStore {
    inner: RwLock<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the last-activity time of a conversation.
    pub async fn set_conversation_timestamp(&self, conversation_id: &ConversationId, at: DateTime<Utc>) {
        if let Some(slot) = self.inner.write().await.states.get_mut(conversation_id) {
            slot.1 = at;
        }
    }

    /// Replace a stored snapshot with raw text, bypassing serialization.
    pub async fn put_raw_state(&self, conversation_id: &ConversationId, user_id: &str, raw: &str) {
        let mut inner = self.inner.write().await;
        inner
            .states
            .insert(conversation_id.clone(), (raw.to_string(), Utc::now()));
        inner.active.insert(user_id.to_string(), conversation_id.clone());
    }

    pub async fn interaction_count(&self) -> usize {
        self.inner.read().await.interactions.len()
    }
}

#[async_trait]
impl StorageManager for InMemoryStateStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save_state(
        &self,
        conversation_id: &ConversationId,
        state: &AgentState,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let raw = storage::encode_state(state)?;
        let mut inner = self.inner.write().await;
        inner
            .states
            .insert(conversation_id.clone(), (raw, Utc::now()));
        inner.active.insert(user_id.to_string(), conversation_id.clone());
        Ok(())
    }

    async fn load_state(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<AgentState>, StorageError> {
        let inner = self.inner.read().await;
        inner
            .states
            .get(conversation_id)
            .map(|(raw, _)| storage::decode_state(conversation_id, raw))
            .transpose()
    }

    async fn get_conversation_timestamp(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.inner.read().await.states.get(conversation_id).map(|(_, at)| *at))
    }

    async fn get_active_conversation(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationId>, StorageError> {
        Ok(self.inner.read().await.active.get(user_id).cloned())
    }

    async fn log_agent_interaction(&self, record: &InteractionRecord) -> Result<(), StorageError> {
        self.inner.write().await.interactions.push(record.clone());
        Ok(())
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .interactions
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
