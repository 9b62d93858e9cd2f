//! Turn orchestration for Concierge.
//!
//! One turn runs as:
//!
//! 1. **Resolve** the conversation: resume a recent one or start fresh
//! 2. **Gather** long-term memory and knowledge-base context
//! 3. **Inject** the best of it into the state within a character budget
//! 4. **Plan/act**: ask the planner for an action, run tools, repeat until
//!    a final answer or the step budget runs out
//! 5. **Respond**, then hand the finished state to the background pipeline
//!    (persist, learn, maintain memory, log, record metrics)
//!
//! [`TurnHandler`] wires these together; each stage is usable on its own.

pub mod background;
pub mod context;
pub mod conversation;
pub mod loop_runner;
pub mod planner;
pub mod tool_exec;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use background::{
    BackgroundJob, BackgroundReport, BackgroundService, BackgroundWorker, detect_remember_request,
};
pub use context::{
    ContextInjectionService, ContextService, EnhancedContext, InjectionReport, QualityMetrics,
    RelevanceValidator, extract_content,
};
pub use conversation::{ConversationContext, ConversationService};
pub use loop_runner::{AgentLoop, LoopOutcome};
pub use planner::LlmPlanner;
pub use tool_exec::{ToolExecution, ToolExecutionService};
pub use turn::{TurnHandler, TurnResponse};
