//! Data model for turn traces, spans, and usage summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Turn start until the response was handed back.
    Response,
    /// Response hand-off until the background pipeline finished.
    Background,
    /// Top-level turn (user message → background done).
    Turn,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response => write!(f, "response"),
            Self::Background => write!(f, "background"),
            Self::Turn => write!(f, "turn"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub id: String,
    /// Parent span id (None for root spans).
    pub parent_id: Option<String>,
    /// What kind of work this represents.
    pub kind: SpanKind,
    /// Human-readable label.
    pub label: String,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// A finished span of the given kind.
    pub fn completed(kind: SpanKind, label: impl Into<String>, duration_ms: u64, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            kind,
            label: label.into(),
            duration_ms,
            success,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the parent span.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// A collection of spans representing one conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace id.
    pub id: String,
    /// Conversation id this trace belongs to.
    pub conversation_id: String,
    pub user_id: String,
    /// How the loop ended ("final_answer", "tool_failure", "forced_finish").
    pub termination: String,
    pub steps: u32,
    pub tool_calls: usize,
    /// All spans in this trace.
    pub spans: Vec<Span>,
    /// When the trace was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Trace {
    /// Total duration in milliseconds (the root span, if any).
    pub fn total_duration_ms(&self) -> u64 {
        self.spans
            .iter()
            .find(|s| s.kind == SpanKind::Turn)
            .map_or(0, |s| s.duration_ms)
    }

    /// Response latency in milliseconds.
    pub fn response_ms(&self) -> u64 {
        self.spans
            .iter()
            .find(|s| s.kind == SpanKind::Response)
            .map_or(0, |s| s.duration_ms)
    }
}

// ── Summary ───────────────────────────────────────────────────────────────

/// Running totals since engine creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub turns: u64,
    pub final_answers: u64,
    pub tool_failures: u64,
    pub forced_finishes: u64,
    pub total_steps: u64,
    pub total_tool_calls: u64,
    /// Tool executions observed on the event bus.
    pub tool_executions: u64,
    pub failed_tool_executions: u64,
    pub background_failures: u64,
    pub memories_learned: u64,
    pub mean_response_ms: f64,
    pub max_response_ms: u64,
    pub trace_count: usize,
}

impl TelemetrySummary {
    /// Mean planner steps per turn.
    pub fn mean_steps(&self) -> f64 {
        if self.turns == 0 {
            0.0
        } else {
            self.total_steps as f64 / self.turns as f64
        }
    }
}
