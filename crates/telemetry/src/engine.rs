//! Thread-safe telemetry engine: turns per-turn metrics and domain events
//! into traces and running totals.

use crate::TelemetryError;
use crate::model::*;
use chrono::Utc;
use concierge_core::{DomainEvent, MetricsSink, Termination, TurnMetrics};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// The core telemetry engine.
///
/// Thread-safe via `RwLock`. Keeps the most recent `max_traces` turn
/// traces and totals that never reset.
pub struct TelemetryEngine {
    traces: RwLock<VecDeque<Trace>>,
    totals: RwLock<TelemetrySummary>,
    max_traces: usize,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TelemetryEngine {
    pub fn new(max_traces: usize) -> Self {
        Self {
            traces: RwLock::new(VecDeque::new()),
            totals: RwLock::new(TelemetrySummary::default()),
            max_traces: max_traces.max(1),
        }
    }

    // ── Recording ─────────────────────────────────────────────────────

    /// Build a trace for one turn and fold it into the totals.
    pub fn record(&self, metrics: &TurnMetrics) -> String {
        let success = metrics.termination != Termination::ToolFailure;
        let root = Span::completed(SpanKind::Turn, "turn", metrics.total_latency_ms, success)
            .with_metadata("memory_blocks", metrics.memory_blocks.into());
        let response = Span::completed(
            SpanKind::Response,
            metrics.termination.as_str(),
            metrics.response_latency_ms,
            success,
        )
        .with_parent(&root.id)
        .with_metadata("steps", metrics.steps.into());
        let background = Span::completed(
            SpanKind::Background,
            "background",
            metrics
                .total_latency_ms
                .saturating_sub(metrics.response_latency_ms),
            true,
        )
        .with_parent(&root.id);

        let trace = Trace {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: metrics.conversation_id.to_string(),
            user_id: metrics.user_id.clone(),
            termination: metrics.termination.as_str().to_string(),
            steps: metrics.steps,
            tool_calls: metrics.tool_calls,
            spans: vec![root, response, background],
            recorded_at: Utc::now(),
        };
        let id = trace.id.clone();

        {
            let mut totals = write(&self.totals);
            let previous = totals.turns as f64;
            totals.turns += 1;
            match metrics.termination {
                Termination::FinalAnswer => totals.final_answers += 1,
                Termination::ToolFailure => totals.tool_failures += 1,
                Termination::ForcedFinish => totals.forced_finishes += 1,
            }
            totals.total_steps += u64::from(metrics.steps);
            totals.total_tool_calls += metrics.tool_calls as u64;
            totals.mean_response_ms = (totals.mean_response_ms * previous
                + metrics.response_latency_ms as f64)
                / totals.turns as f64;
            totals.max_response_ms = totals.max_response_ms.max(metrics.response_latency_ms);
        }

        let mut traces = write(&self.traces);
        while traces.len() >= self.max_traces {
            traces.pop_front();
        }
        traces.push_back(trace);
        id
    }

    /// Fold one domain event into the totals.
    pub fn observe(&self, event: &DomainEvent) {
        let mut totals = write(&self.totals);
        match event {
            DomainEvent::ToolExecuted { success, .. } => {
                totals.tool_executions += 1;
                if !success {
                    totals.failed_tool_executions += 1;
                }
            }
            DomainEvent::BackgroundStageFailed { .. } => totals.background_failures += 1,
            DomainEvent::MemoryLearned { stored, .. } => totals.memories_learned += *stored as u64,
            DomainEvent::TurnStarted { .. } | DomainEvent::TurnCompleted { .. } => {}
        }
    }

    /// Consume events from a bus until it closes. Lagged receivers skip ahead.
    pub fn spawn_event_listener(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<Arc<DomainEvent>>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => engine.observe(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Telemetry listener lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Get a specific trace by ID.
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        read(&self.traces).iter().find(|t| t.id == trace_id).cloned()
    }

    /// List recent traces (most recent first).
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        read(&self.traces).iter().rev().take(limit).cloned().collect()
    }

    /// Get traces for a specific conversation.
    pub fn traces_for_conversation(&self, conversation_id: &str) -> Vec<Trace> {
        read(&self.traces)
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Number of traces currently retained.
    pub fn trace_count(&self) -> usize {
        read(&self.traces).len()
    }

    /// Running totals snapshot.
    pub fn summary(&self) -> TelemetrySummary {
        let mut summary = read(&self.totals).clone();
        summary.trace_count = self.trace_count();
        summary
    }

    /// Retained traces and the summary as pretty JSON.
    pub fn export_json(&self) -> Result<String, TelemetryError> {
        let traces: Vec<Trace> = read(&self.traces).iter().cloned().collect();
        let doc = serde_json::json!({
            "summary": self.summary(),
            "traces": traces,
        });
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Drop traces recorded before `cutoff`.
    pub fn prune_before(&self, cutoff: chrono::DateTime<Utc>) -> usize {
        let mut traces = write(&self.traces);
        let before = traces.len();
        traces.retain(|t| t.recorded_at >= cutoff);
        before - traces.len()
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new(500)
    }
}

impl MetricsSink for TelemetryEngine {
    fn record_turn(&self, metrics: &TurnMetrics) {
        let trace_id = self.record(metrics);
        tracing::debug!(
            trace_id = %trace_id,
            user_id = %metrics.user_id,
            conversation_id = %metrics.conversation_id,
            termination = %metrics.termination,
            steps = metrics.steps,
            response_ms = metrics.response_latency_ms,
            "Turn recorded"
        );
    }
}
