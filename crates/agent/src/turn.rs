//! The single entrypoint for handling one user turn.

use crate::background::{BackgroundJob, BackgroundWorker};
use crate::context::{ContextInjectionService, ContextService};
use crate::conversation::ConversationService;
use crate::loop_runner::AgentLoop;
use concierge_core::agent::Termination;
use concierge_core::error::Result;
use concierge_core::event::{DomainEvent, EventBus};
use concierge_core::message::ConversationId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

/// Idle per-user locks are pruned once the table grows past this.
const LOCK_TABLE_PRUNE_AT: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub conversation_id: ConversationId,
    pub response: String,
    pub termination: Termination,
    pub steps: u32,
    pub resumed: bool,
}

/// Runs turns end to end and serializes them per user.
///
/// A user's next turn waits until the previous one is persisted, so there
/// is never more than one live state per conversation.
pub struct TurnHandler {
    conversations: ConversationService,
    context: ContextService,
    injection: ContextInjectionService,
    agent_loop: AgentLoop,
    background: Arc<BackgroundWorker>,
    event_bus: Arc<EventBus>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnHandler {
    pub fn new(
        conversations: ConversationService,
        context: ContextService,
        injection: ContextInjectionService,
        agent_loop: AgentLoop,
        background: Arc<BackgroundWorker>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            conversations,
            context,
            injection,
            agent_loop,
            background,
            event_bus,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn background(&self) -> &Arc<BackgroundWorker> {
        &self.background
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= LOCK_TABLE_PRUNE_AT {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Handle one utterance and return the response.
    ///
    /// Only planner failures surface as errors; the turn is then dropped
    /// unpersisted and can be retried from the last stored state. On
    /// success the background job is queued before this returns.
    pub async fn handle_turn(&self, user_id: &str, user_input: &str) -> Result<TurnResponse> {
        let started_at = Utc::now();
        let guard = self.user_lock(user_id).lock_owned().await;

        let ctx = self.conversations.get_conversation_context(user_id, user_input).await;
        let conversation_id = ctx.conversation_id;
        let resumed = ctx.resumed;
        let mut state = ctx.state;

        self.event_bus.publish(DomainEvent::TurnStarted {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            resumed,
            timestamp: started_at,
        });

        state.refresh_focus();
        let enhanced = self.context.get_enhanced_context(user_id, user_input, &state).await;
        self.injection
            .inject_context(&mut state, Some(&enhanced.rag_context), enhanced.ltm_context.as_deref())
            .await;

        let outcome = match self.agent_loop.execute_loop(&mut state, user_input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(user_id, conversation_id = %conversation_id, error = %e, "Turn failed");
                return Err(e.into());
            }
        };
        let responded_at = Utc::now();

        info!(
            user_id,
            conversation_id = %conversation_id,
            termination = %outcome.termination,
            steps = outcome.steps,
            latency_ms = (responded_at - started_at).num_milliseconds(),
            "Turn completed"
        );
        self.event_bus.publish(DomainEvent::TurnCompleted {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            termination: outcome.termination.to_string(),
            steps: outcome.steps,
            timestamp: responded_at,
        });

        self.background.submit(BackgroundJob {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.clone(),
            user_input: user_input.to_string(),
            response: outcome.response.clone(),
            state,
            termination: outcome.termination,
            steps: outcome.steps,
            started_at,
            responded_at,
            turn_guard: Some(guard),
        });

        Ok(TurnResponse {
            conversation_id,
            response: outcome.response,
            termination: outcome.termination,
            steps: outcome.steps,
            resumed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundService;
    use crate::test_helpers::{FailingPlanner, ScriptedPlanner, registry};
    use crate::tool_exec::ToolExecutionService;
    use concierge_core::Error;
    use concierge_core::planner::{Action, Planner};
    use concierge_core::storage::StorageManager;
    use concierge_memory::InMemoryStateStore;

    fn handler(planner: Arc<dyn Planner>, storage: Arc<InMemoryStateStore>) -> TurnHandler {
        let bus = Arc::new(EventBus::default());
        let tools = Arc::new(ToolExecutionService::new(registry(), bus.clone()));
        let background = Arc::new(BackgroundWorker::spawn(
            Arc::new(BackgroundService::new(storage.clone(), bus.clone())),
            1,
            8,
        ));
        TurnHandler::new(
            ConversationService::new(storage),
            ContextService::new(),
            ContextInjectionService::new(),
            AgentLoop::new(planner, tools),
            background,
            bus,
        )
    }

    #[tokio::test]
    async fn first_turn_starts_and_second_resumes() {
        let storage = Arc::new(InMemoryStateStore::new());
        let planner = Arc::new(ScriptedPlanner::always(Action::final_answer("Sure.")));
        let handler = handler(planner, storage.clone());

        let first = handler.handle_turn("u1", "book a table").await.unwrap();
        assert!(!first.resumed);
        assert_eq!(first.response, "Sure.");

        let second = handler.handle_turn("u1", "for four people").await.unwrap();
        assert!(second.resumed);
        assert_eq!(second.conversation_id, first.conversation_id);

        handler.background().shutdown().await;
        let state = storage.load_state(&first.conversation_id).await.unwrap().unwrap();
        assert_eq!(state.conversation_history.len(), 4);
        assert_eq!(storage.interaction_count().await, 2);
    }

    #[tokio::test]
    async fn planner_failure_is_returned_and_not_persisted() {
        let storage = Arc::new(InMemoryStateStore::new());
        let handler = handler(Arc::new(FailingPlanner), storage.clone());

        let err = handler.handle_turn("u1", "hello").await.unwrap_err();
        assert!(matches!(err, Error::Planner(_)));

        handler.background().shutdown().await;
        assert_eq!(storage.interaction_count().await, 0);
        assert!(storage.get_active_conversation("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_is_released_after_failure() {
        let storage = Arc::new(InMemoryStateStore::new());
        let handler = handler(Arc::new(FailingPlanner), storage);
        assert!(handler.handle_turn("u1", "a").await.is_err());
        assert!(handler.handle_turn("u1", "b").await.is_err());
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let storage = Arc::new(InMemoryStateStore::new());
        let planner = Arc::new(ScriptedPlanner::always(Action::final_answer("ok")));
        let handler = handler(planner, storage);

        let a = handler.handle_turn("alice", "hi").await.unwrap();
        let b = handler.handle_turn("bob", "hi").await.unwrap();
        assert_ne!(a.conversation_id, b.conversation_id);
    }
}
