//! Error types for the Concierge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Concierge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Planner errors (fatal to a turn) ---
    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the planner. These are the only failures that surface to
/// the user as a failed turn.
#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    #[error("Planner inference failed: {0}")]
    Inference(String),

    #[error("Planner timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Planner returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("Planner provider failed: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend failure: {0}")]
    Backend(String),

    #[error("Stored state for {conversation_id} is corrupt: {reason}")]
    Corrupt {
        conversation_id: String,
        reason: String,
    },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("Knowledge base unavailable: {0}")]
    KnowledgeBase(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool panicked: {tool_name}")]
    Panicked { tool_name: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
