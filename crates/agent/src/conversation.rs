//! Resume-or-start decision for a user's next turn.

use concierge_config::AppConfig;
use concierge_core::agent::{AgentState, StateConfig};
use concierge_core::message::ConversationId;
use concierge_core::storage::StorageManager;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A state ready for the turn, and whether it continues an earlier conversation.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation_id: ConversationId,
    pub state: AgentState,
    pub resumed: bool,
}

pub struct ConversationService {
    storage: Arc<dyn StorageManager>,
    state_config: StateConfig,
    resume_window: Duration,
}

impl ConversationService {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            storage,
            state_config: StateConfig::default(),
            resume_window: Duration::minutes(30),
        }
    }

    pub fn from_config(storage: Arc<dyn StorageManager>, config: &AppConfig) -> Self {
        Self::new(storage)
            .with_state_config(config.context.state.clone())
            .with_resume_window(config.conversation.resume_window())
    }

    pub fn with_state_config(mut self, config: StateConfig) -> Self {
        self.state_config = config;
        self
    }

    pub fn with_resume_window(mut self, window: Duration) -> Self {
        self.resume_window = window;
        self
    }

    /// Resolve the conversation for `user_id` and prepare its state for
    /// `user_input`.
    ///
    /// Continues the active conversation when its last activity is inside
    /// the resume window and its state loads; otherwise starts a new one.
    /// The superseded conversation is left in storage. Storage failures
    /// start a new conversation rather than failing the turn.
    pub async fn get_conversation_context(&self, user_id: &str, user_input: &str) -> ConversationContext {
        let mut context = match self.resume(user_id).await {
            Some((conversation_id, state)) => ConversationContext {
                conversation_id,
                state,
                resumed: true,
            },
            None => {
                let conversation_id = ConversationId::new();
                debug!(user_id, conversation_id = %conversation_id, "Starting new conversation");
                ConversationContext {
                    state: AgentState::new(conversation_id.clone(), user_id, self.state_config.clone()),
                    conversation_id,
                    resumed: false,
                }
            }
        };
        context.state.reset_for_turn(user_input);
        context
    }

    async fn resume(&self, user_id: &str) -> Option<(ConversationId, AgentState)> {
        let conversation_id = match self.storage.get_active_conversation(user_id).await {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id, error = %e, "Active conversation lookup failed");
                return None;
            }
        };

        // A missing timestamp is not proof of expiry; let the load decide.
        match self.storage.get_conversation_timestamp(&conversation_id).await {
            Ok(Some(last_activity)) if Utc::now() - last_activity > self.resume_window => {
                info!(
                    user_id,
                    conversation_id = %conversation_id,
                    idle_minutes = (Utc::now() - last_activity).num_minutes(),
                    "Conversation expired"
                );
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(user_id, conversation_id = %conversation_id, error = %e, "Conversation timestamp lookup failed");
                return None;
            }
        }

        match self.storage.load_state(&conversation_id).await {
            Ok(Some(mut state)) if state.user_id == user_id => {
                state.conversation_id = conversation_id.clone();
                state.config = self.state_config.clone();
                state.apply_size_limits();
                debug!(
                    user_id,
                    conversation_id = %conversation_id,
                    messages = state.conversation_history.len(),
                    "Resuming conversation"
                );
                Some((conversation_id, state))
            }
            Ok(Some(_)) => {
                warn!(user_id, conversation_id = %conversation_id, "Stored state belongs to another user");
                None
            }
            Ok(None) => {
                debug!(user_id, conversation_id = %conversation_id, "Active conversation has no stored state");
                None
            }
            Err(e) => {
                warn!(user_id, conversation_id = %conversation_id, error = %e, "Conversation state failed to load");
                None
            }
        }
    }
}
