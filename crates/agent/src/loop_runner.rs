//! The bounded plan/act loop.

use crate::tool_exec::ToolExecutionService;
use concierge_core::agent::{AgentState, Termination};
use concierge_core::error::PlannerError;
use concierge_core::planner::{Action, Planner};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one loop execution. The state itself is mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Text for the user. On a tool failure this is the failing tool's name.
    pub response: String,
    pub termination: Termination,
    pub steps: u32,
}

/// Drives the planner until it answers, a tool fails, or the step budget
/// runs out.
pub struct AgentLoop {
    planner: Arc<dyn Planner>,
    tools: Arc<ToolExecutionService>,
    max_steps: u32,
    planner_timeout: Duration,
}

impl AgentLoop {
    pub fn new(planner: Arc<dyn Planner>, tools: Arc<ToolExecutionService>) -> Self {
        Self {
            planner,
            tools,
            max_steps: 6,
            planner_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_planner_timeout(mut self, timeout: Duration) -> Self {
        self.planner_timeout = timeout;
        self
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Run the loop for `user_input`.
    ///
    /// The input is appended to the history unless it is already the last
    /// user message, so re-running a turn does not duplicate it. Every
    /// iteration consumes one step whatever the planner returns. Planner
    /// failures and timeouts are the only errors.
    pub async fn execute_loop(
        &self,
        state: &mut AgentState,
        user_input: &str,
    ) -> Result<LoopOutcome, PlannerError> {
        state.append_user_input(user_input);

        while state.step_count < self.max_steps {
            state.step_count += 1;
            let step = state.step_count;

            let action = self.bounded(self.planner.choose_action(state)).await?;
            debug!(
                conversation_id = %state.conversation_id,
                step,
                action = action.kind(),
                "Planner chose action"
            );

            match action {
                Action::FinalAnswer { output } => {
                    state.append_assistant(&output);
                    return Ok(LoopOutcome {
                        response: output,
                        termination: Termination::FinalAnswer,
                        steps: step,
                    });
                }
                Action::ToolCall { name, args } => {
                    let caller = state.user_id.clone();
                    let execution = self.tools.execute_and_update(&name, &args, state, &caller).await;
                    if !execution.success {
                        info!(
                            conversation_id = %state.conversation_id,
                            step,
                            tool = %name,
                            "Tool failure ends the turn"
                        );
                        return Ok(LoopOutcome {
                            response: name,
                            termination: Termination::ToolFailure,
                            steps: step,
                        });
                    }
                }
                Action::Unrecognized { kind } => {
                    warn!(
                        conversation_id = %state.conversation_id,
                        step,
                        kind = %kind,
                        "Ignoring unrecognized planner action"
                    );
                }
            }
        }

        info!(
            conversation_id = %state.conversation_id,
            max_steps = self.max_steps,
            "Step budget exhausted, forcing an answer"
        );
        let output = self.bounded(self.planner.force_finish(state)).await?;
        // The forced answer is what the user sees, so history records it too.
        state.append_assistant(&output);
        Ok(LoopOutcome {
            response: output,
            termination: Termination::ForcedFinish,
            steps: state.step_count,
        })
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, PlannerError>>,
    ) -> Result<T, PlannerError> {
        tokio::time::timeout(self.planner_timeout, call)
            .await
            .map_err(|_| PlannerError::Timeout {
                timeout_secs: self.planner_timeout.as_secs(),
            })?
    }
}
