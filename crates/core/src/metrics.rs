//! Turn-level metrics boundary.

use crate::agent::Termination;
use crate::message::ConversationId;
use serde::{Deserialize, Serialize};

/// Outcome and latency of one completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub user_id: String,
    pub conversation_id: ConversationId,
    pub termination: Termination,
    pub steps: u32,
    pub tool_calls: usize,
    /// Time from turn start until the response was handed back.
    pub response_latency_ms: u64,
    /// Time from turn start until the background pipeline reached metrics.
    pub total_latency_ms: u64,
    pub memory_blocks: usize,
}

/// Receives per-turn metrics. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn record_turn(&self, metrics: &TurnMetrics);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_turn(&self, _metrics: &TurnMetrics) {}
}
