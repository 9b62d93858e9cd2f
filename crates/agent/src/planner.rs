//! LLM-backed planner.
//!
//! Builds a prompt from the state (instructions, injected memory, focus,
//! history), offers the registered tools, and maps the provider's reply to
//! an [`Action`]:
//!
//! - a native tool call becomes `Action::ToolCall`
//! - a JSON object with a `type` tag is read as a structured action
//! - any other text becomes `Action::FinalAnswer`
//! - an empty reply or malformed tool arguments become `Action::Unrecognized`

use async_trait::async_trait;
use concierge_config::{AgentConfig, ProviderConfig};
use concierge_core::agent::AgentState;
use concierge_core::error::PlannerError;
use concierge_core::message::{Message, Role};
use concierge_core::planner::{Action, Planner};
use concierge_core::provider::{Provider, ProviderRequest};
use concierge_core::tool::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_SYSTEM_PROMPT: &str = "You are Concierge, a personal assistant. \
Use the memory and documents below when they are relevant. \
Call a tool when you need information or need to act; otherwise answer the user directly and concisely.";

const FORCE_FINISH_PROMPT: &str = "You have used all available steps. \
Do not call any tools. Give the user your best answer now using what you already know.";

pub struct LlmPlanner {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            temperature: 0.3,
            max_tokens: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        provider_config: &ProviderConfig,
        agent_config: &AgentConfig,
    ) -> Self {
        let mut planner = Self::new(provider, tools, provider_config.model.clone())
            .with_temperature(provider_config.temperature)
            .with_max_tokens(provider_config.max_tokens);
        if let Some(prompt) = &agent_config.system_prompt {
            planner = planner.with_system_prompt(prompt.clone());
        }
        planner
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn system_message(&self, state: &AgentState) -> Message {
        let mut prompt = self.system_prompt.clone();

        if !state.memory_context.is_empty() {
            prompt.push_str("\n\n## What you know\n");
            for block in &state.memory_context {
                prompt.push_str(&format!("- [{}] {}\n", block.source, block.content));
            }
        }

        if !state.focus.is_empty() {
            prompt.push_str(&format!("\nCurrent topics: {}\n", state.focus.join(", ")));
        }

        Message::system(prompt)
    }

    /// Tool observations are replayed as user-side text: the history does
    /// not keep the provider's tool-call ids, so native tool messages could
    /// not be paired with their calls.
    fn history_messages(state: &AgentState) -> Vec<Message> {
        state
            .conversation_history
            .iter()
            .map(|m| match m.role {
                Role::Tool => {
                    let tool = m.tool_name.as_deref().unwrap_or("tool");
                    Message::user(format!("[{tool} result]\n{}", m.content))
                }
                _ => Message {
                    metadata: serde_json::Map::new(),
                    ..m.clone()
                },
            })
            .collect()
    }

    fn request(&self, messages: Vec<Message>, with_tools: bool) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: if with_tools { self.tools.definitions() } else { Vec::new() },
        }
    }

    fn to_action(message: &Message) -> Action {
        if let Some(call) = message.tool_calls.first() {
            let raw = call.arguments.trim();
            let args = if raw.is_empty() {
                Ok(Value::Object(serde_json::Map::new()))
            } else {
                serde_json::from_str::<Value>(raw)
            };
            return match args {
                Ok(args) => Action::tool_call(call.name.clone(), args),
                Err(_) => Action::Unrecognized {
                    kind: "malformed_tool_call".into(),
                },
            };
        }

        let content = message.content.trim();
        if content.is_empty() {
            return Action::Unrecognized {
                kind: "empty_response".into(),
            };
        }
        structured_action(content).unwrap_or_else(|| Action::final_answer(content))
    }
}

/// Read a JSON object with a `type` tag as an action. Unknown tags are
/// carried as `Unrecognized`; plain text returns `None`.
fn structured_action(content: &str) -> Option<Action> {
    if !content.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(content).ok()?;
    let kind = value.get("type")?.as_str()?.to_string();
    Some(serde_json::from_value::<Action>(value).unwrap_or(Action::Unrecognized { kind }))
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn choose_action(&self, state: &AgentState) -> Result<Action, PlannerError> {
        let mut messages = vec![self.system_message(state)];
        messages.extend(Self::history_messages(state));

        let response = self.provider.complete(self.request(messages, true)).await?;
        let action = Self::to_action(&response.message);
        debug!(
            conversation_id = %state.conversation_id,
            model = %response.model,
            tokens = response.usage.as_ref().map(|u| u.total_tokens),
            action = action.kind(),
            "Planner response"
        );
        Ok(action)
    }

    async fn force_finish(&self, state: &AgentState) -> Result<String, PlannerError> {
        let mut messages = vec![self.system_message(state)];
        messages.extend(Self::history_messages(state));
        messages.push(Message::system(FORCE_FINISH_PROMPT));

        let response = self.provider.complete(self.request(messages, false)).await?;
        let answer = response.message.content.trim();
        if answer.is_empty() {
            return Err(PlannerError::InvalidResponse("empty forced answer".into()));
        }
        Ok(answer.to_string())
    }
}
