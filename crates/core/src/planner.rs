//! Planner trait and the actions it produces.
//!
//! The planner is the LLM-backed decision function of the loop: given the
//! current state it either answers or asks for a tool. Anything else it
//! emits is carried as an explicit `Unrecognized` variant so callers match
//! exhaustively instead of falling through.

use crate::agent::AgentState;
use crate::error::PlannerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The planner's decision for one loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Terminal answer for the user.
    FinalAnswer { output: String },

    /// Run a named tool with JSON arguments.
    ToolCall {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },

    /// Output the loop does not know how to act on.
    Unrecognized { kind: String },
}

impl Action {
    pub fn final_answer(output: impl Into<String>) -> Self {
        Self::FinalAnswer { output: output.into() }
    }

    pub fn tool_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCall { name: name.into(), args }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::FinalAnswer { .. } => "final_answer",
            Self::ToolCall { .. } => "tool_call",
            Self::Unrecognized { kind } => kind,
        }
    }
}

/// Maps state to the next action.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Decide what to do next.
    async fn choose_action(&self, state: &AgentState) -> Result<Action, PlannerError>;

    /// Produce a best-effort answer once the step budget is exhausted.
    async fn force_finish(&self, state: &AgentState) -> Result<String, PlannerError>;
}
