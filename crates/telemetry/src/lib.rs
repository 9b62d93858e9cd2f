//! Turn tracing and running totals for Concierge.
//!
//! The engine implements `MetricsSink`: the background pipeline reports
//! every finished turn, and an optional event-bus listener tallies tool
//! executions, learned memories and background failures.

pub mod engine;
pub mod model;

pub use engine::TelemetryEngine;
pub use model::{Span, SpanKind, TelemetrySummary, Trace};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
