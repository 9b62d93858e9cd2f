//! Executes one tool call and reconciles its result into the state.

use concierge_core::agent::{AgentState, render_tool_output};
use concierge_core::error::ToolError;
use concierge_core::event::{DomainEvent, EventBus};
use concierge_core::tool::{CALLER_ID_KEY, ToolRegistry};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of a single tool call as seen by the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    /// Rendered tool output, or a description of the failure.
    pub output: String,
    pub success: bool,
    pub duration_ms: u64,
}

pub struct ToolExecutionService {
    registry: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
    timeout: Duration,
}

impl ToolExecutionService {
    pub fn new(registry: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            event_bus,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run `name` with `args` on behalf of `caller_id`.
    ///
    /// Errors, timeouts and panics are reported as `success = false` and
    /// leave the state untouched. On success exactly one tool-role history
    /// entry is appended and `last_tool_result` is updated.
    pub async fn execute_and_update(
        &self,
        name: &str,
        args: &Value,
        state: &mut AgentState,
        caller_id: &str,
    ) -> ToolExecution {
        let start = Instant::now();
        let result = self.run_guarded(name, with_caller(args, caller_id)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: name.to_string(),
            success: result.is_ok(),
            duration_ms,
            timestamp: chrono::Utc::now(),
        });

        match result {
            Ok(value) => {
                debug!(
                    conversation_id = %state.conversation_id,
                    tool = name,
                    duration_ms,
                    "Tool succeeded"
                );
                let output = render_tool_output(&value);
                state.record_tool_result(name, args.clone(), value);
                ToolExecution {
                    output,
                    success: true,
                    duration_ms,
                }
            }
            Err(e) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    tool = name,
                    error = %e,
                    "Tool failed"
                );
                ToolExecution {
                    output: e.to_string(),
                    success: false,
                    duration_ms,
                }
            }
        }
    }

    async fn run_guarded(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let call = tokio::time::timeout(self.timeout, self.registry.run_tool(name, args));
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(ToolError::Timeout {
                tool_name: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
            Err(_panic) => Err(ToolError::Panicked {
                tool_name: name.to_string(),
            }),
        }
    }
}

/// Copy of `args` carrying the caller under the reserved key. Non-object
/// arguments are wrapped as `{"input": args}`.
fn with_caller(args: &Value, caller_id: &str) -> Value {
    let mut prepared = match args {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("input".into(), other.clone());
            map
        }
    };
    prepared.insert(CALLER_ID_KEY.into(), Value::String(caller_id.to_string()));
    Value::Object(prepared)
}
