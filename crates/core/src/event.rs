//! Domain event system: decoupled observation of the turn pipeline.
//!
//! Events are published when a turn starts, a tool runs, a turn completes
//! or a background stage fails. Subscribers react without the services
//! knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn was accepted for a user
    TurnStarted {
        user_id: String,
        conversation_id: String,
        resumed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The response for a turn was produced
    TurnCompleted {
        user_id: String,
        conversation_id: String,
        termination: String,
        steps: u32,
        timestamp: DateTime<Utc>,
    },

    /// A background stage failed (logged, never propagated)
    BackgroundStageFailed {
        user_id: String,
        conversation_id: String,
        stage: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Long-term memories were written by a learning pass
    MemoryLearned {
        user_id: String,
        stored: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
