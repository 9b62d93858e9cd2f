//! Durable conversation storage.
//!
//! The store owns three things: serialized `AgentState` snapshots keyed by
//! conversation, the "active conversation" pointer per user (with its last
//! activity timestamp), and the append-only interaction log.

use crate::agent::{AgentState, Termination, ToolProvenance};
use crate::error::StorageError;
use crate::message::ConversationId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed turn, as written to the interaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub conversation_id: ConversationId,
    pub user_id: String,
    pub user_input: String,
    pub response: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolProvenance>,
    pub termination: Termination,
    pub steps: u32,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Persistence boundary for conversation state.
#[async_trait]
pub trait StorageManager: Send + Sync {
    /// Backend name for logs (e.g. "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Persist the full state and mark the conversation as the user's active
    /// one, stamping its last-activity time.
    async fn save_state(
        &self,
        conversation_id: &ConversationId,
        state: &AgentState,
        user_id: &str,
    ) -> Result<(), StorageError>;

    /// Load a previously saved state. `Ok(None)` when nothing was saved.
    async fn load_state(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<AgentState>, StorageError>;

    /// Last activity of a conversation. `Ok(None)` when unknown.
    async fn get_conversation_timestamp(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// The user's current conversation, if any.
    async fn get_active_conversation(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationId>, StorageError>;

    /// Append one record to the interaction log.
    async fn log_agent_interaction(&self, record: &InteractionRecord) -> Result<(), StorageError>;

    /// Most recent interactions of a user, newest first.
    async fn recent_interactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, StorageError>;
}

/// Serialize a state snapshot for storage.
pub fn encode_state(state: &AgentState) -> Result<String, StorageError> {
    serde_json::to_string(state).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Decode a stored snapshot, reporting which conversation was unreadable.
pub fn decode_state(conversation_id: &ConversationId, raw: &str) -> Result<AgentState, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
        conversation_id: conversation_id.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StateConfig;

    #[test]
    fn state_snapshot_survives_encoding() {
        let id = ConversationId::from("conv-1");
        let mut state = AgentState::new(id.clone(), "u1", StateConfig::default());
        state.reset_for_turn("book a table");
        state.append_user_input("book a table");

        let raw = encode_state(&state).unwrap();
        let decoded = decode_state(&id, &raw).unwrap();
        assert_eq!(decoded.conversation_history.len(), 1);
        assert_eq!(decoded.user_id, "u1");
    }

    #[test]
    fn corrupt_snapshot_names_the_conversation() {
        let id = ConversationId::from("conv-9");
        let err = decode_state(&id, "{not json").unwrap_err();
        match err {
            StorageError::Corrupt { conversation_id, .. } => assert_eq!(conversation_id, "conv-9"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
