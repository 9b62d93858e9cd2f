//! Shared test doubles for the orchestration tests.

use async_trait::async_trait;
use concierge_core::agent::{AgentState, StateConfig};
use concierge_core::context::{
    ContextOptimizer, KnowledgeBase, LtmRetriever, MemoryRecord, TaggedMemoryRetriever,
};
use concierge_core::error::{MemoryError, PlannerError, ProviderError, StorageError, ToolError};
use concierge_core::memory::{LearningInput, LearningManager, LearningOutcome};
use concierge_core::message::{ConversationId, Message, MessageToolCall};
use concierge_core::metrics::{MetricsSink, TurnMetrics};
use concierge_core::planner::{Action, Planner};
use concierge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use concierge_core::storage::{InteractionRecord, StorageManager};
use concierge_core::tool::{Tool, ToolContext, ToolRegistry};
use concierge_memory::InMemoryStateStore;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A fresh state for user `u1` with `input` as the current turn.
pub fn state(input: &str) -> AgentState {
    let mut s = AgentState::new(ConversationId::from("c1"), "u1", StateConfig::default());
    s.reset_for_turn(input);
    s
}

// ── Planners ──────────────────────────────────────────────────────────────

/// Returns scripted actions in order, then repeats the fallback.
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<Action>>,
    fallback: Action,
    calls: AtomicUsize,
}

impl ScriptedPlanner {
    pub const FORCED_ANSWER: &'static str = "Here is what I have so far.";

    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            script: Mutex::new(actions.into()),
            fallback: Action::Unrecognized {
                kind: "script_exhausted".into(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(action: Action) -> Self {
        Self {
            fallback: action,
            ..Self::new(Vec::new())
        }
    }

    pub fn choose_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn choose_action(&self, _state: &AgentState) -> Result<Action, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn force_finish(&self, _state: &AgentState) -> Result<String, PlannerError> {
        Ok(Self::FORCED_ANSWER.into())
    }
}

pub struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn choose_action(&self, _state: &AgentState) -> Result<Action, PlannerError> {
        Err(PlannerError::Inference("model unavailable".into()))
    }

    async fn force_finish(&self, _state: &AgentState) -> Result<String, PlannerError> {
        Err(PlannerError::Inference("model unavailable".into()))
    }
}

pub struct SlowPlanner;

#[async_trait]
impl Planner for SlowPlanner {
    async fn choose_action(&self, _state: &AgentState) -> Result<Action, PlannerError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(Action::final_answer("too late"))
    }

    async fn force_finish(&self, _state: &AgentState) -> Result<String, PlannerError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok("too late".into())
    }
}

// ── Tools ─────────────────────────────────────────────────────────────────

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes its arguments"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({"args": arguments, "caller": ctx.caller_id}))
    }
}

struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "backend offline".into(),
        })
    }
}

struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panics"
    }
    fn description(&self) -> &str {
        "Panics when run"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        panic!("tool bug");
    }
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Takes too long"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(serde_json::json!("finally"))
    }
}

/// Registry with `echo`, `broken`, `panics` and `slow`.
pub fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    registry.register(Box::new(BrokenTool));
    registry.register(Box::new(PanickingTool));
    registry.register(Box::new(SlowTool));
    Arc::new(registry)
}

// ── Provider ──────────────────────────────────────────────────────────────

/// Returns scripted responses in order and remembers the last request.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    last_request: Mutex<Option<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last_request: Mutex::new(None),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, thought: &str, answer: &str) -> Self {
        let mut msg = Message::assistant(thought);
        msg.tool_calls = tool_calls;
        Self::new(vec![response(msg), make_text_response(answer)])
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *self.last_request.lock().unwrap() = Some(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "no scripted response left".into(),
            })
    }
}

fn response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    response(Message::assistant(text))
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

// ── Memory collaborators ──────────────────────────────────────────────────

pub struct FailingRetriever;

#[async_trait]
impl LtmRetriever for FailingRetriever {
    async fn retrieve(&self, _user_id: &str, _query: &str, _limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        Err(MemoryError::QueryFailed("index offline".into()))
    }
}

#[async_trait]
impl TaggedMemoryRetriever for FailingRetriever {
    async fn retrieve_by_tags(
        &self,
        _user_id: &str,
        _tags: &[String],
        _limit: usize,
    ) -> Result<Option<String>, MemoryError> {
        Err(MemoryError::QueryFailed("tag index offline".into()))
    }
}

pub struct FailingOptimizer;

#[async_trait]
impl ContextOptimizer for FailingOptimizer {
    async fn optimize(
        &self,
        _records: Vec<MemoryRecord>,
        _focus: &[String],
        _query: &str,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        Err(MemoryError::OptimizationFailed("reranker crashed".into()))
    }
}

pub struct FailingKnowledgeBase;

#[async_trait]
impl KnowledgeBase for FailingKnowledgeBase {
    async fn query_knowledge_base(&self, _user_id: &str, _user_input: &str) -> Result<Vec<serde_json::Value>, MemoryError> {
        Err(MemoryError::KnowledgeBase("search cluster down".into()))
    }
}

pub struct FailingLearning;

#[async_trait]
impl LearningManager for FailingLearning {
    fn name(&self) -> &str {
        "failing"
    }

    async fn learn(&self, _input: &LearningInput<'_>) -> Result<LearningOutcome, MemoryError> {
        Err(MemoryError::Storage("memory store full".into()))
    }
}

/// Captures every recorded turn.
#[derive(Default)]
pub struct RecordingMetrics {
    pub turns: Mutex<Vec<TurnMetrics>>,
}

impl MetricsSink for RecordingMetrics {
    fn record_turn(&self, metrics: &TurnMetrics) {
        self.turns.lock().unwrap().push(metrics.clone());
    }
}

// ── Storage ───────────────────────────────────────────────────────────────

/// Wraps an in-memory store. `save_state` fails the first
/// `failures_before_success` times; lookups can be made to fail.
pub struct FlakyStorage {
    pub inner: InMemoryStateStore,
    save_failures_left: AtomicUsize,
    pub save_attempts: AtomicUsize,
    fail_lookups: bool,
    save_delay: Duration,
}

impl FlakyStorage {
    pub fn new(failures_before_success: usize) -> Self {
        Self {
            inner: InMemoryStateStore::new(),
            save_failures_left: AtomicUsize::new(failures_before_success),
            save_attempts: AtomicUsize::new(0),
            fail_lookups: false,
            save_delay: Duration::ZERO,
        }
    }

    pub fn failing_lookups() -> Self {
        Self {
            fail_lookups: true,
            ..Self::new(0)
        }
    }

    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    fn lookup_guard(&self) -> Result<(), StorageError> {
        if self.fail_lookups {
            Err(StorageError::Backend("database unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageManager for FlakyStorage {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn save_state(&self, conversation_id: &ConversationId, state: &AgentState, user_id: &str) -> Result<(), StorageError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.save_delay.is_zero() {
            tokio::time::sleep(self.save_delay).await;
        }
        let should_fail = self
            .save_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StorageError::Backend("write conflict".into()));
        }
        self.inner.save_state(conversation_id, state, user_id).await
    }

    async fn load_state(&self, conversation_id: &ConversationId) -> Result<Option<AgentState>, StorageError> {
        self.lookup_guard()?;
        self.inner.load_state(conversation_id).await
    }

    async fn get_conversation_timestamp(&self, conversation_id: &ConversationId) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.lookup_guard()?;
        self.inner.get_conversation_timestamp(conversation_id).await
    }

    async fn get_active_conversation(&self, user_id: &str) -> Result<Option<ConversationId>, StorageError> {
        self.lookup_guard()?;
        self.inner.get_active_conversation(user_id).await
    }

    async fn log_agent_interaction(&self, record: &InteractionRecord) -> Result<(), StorageError> {
        self.inner.log_agent_interaction(record).await
    }

    async fn recent_interactions(&self, user_id: &str, limit: usize) -> Result<Vec<InteractionRecord>, StorageError> {
        self.inner.recent_interactions(user_id, limit).await
    }
}
