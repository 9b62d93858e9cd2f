//! # Concierge Core
//!
//! Domain types, traits, and error definitions for the Concierge assistant
//! backend. The state object, the planner and tool seams, and every
//! storage/retrieval/learning collaborator the orchestration services talk
//! to are defined here.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations live in their
//! respective crates, so they can be swapped via configuration and replaced
//! by scripted stand-ins in tests.

pub mod agent;
pub mod context;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod planner;
pub mod provider;
pub mod storage;
pub mod text;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentState, MemoryBlock, MemorySource, StateConfig, Termination, ToolProvenance};
pub use context::{ContextOptimizer, KnowledgeBase, LtmRetriever, MemoryRecord, TaggedMemoryRetriever};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{
    LearningInput, LearningManager, LearningOutcome, LifecycleManager, LifecycleReport,
    MemoryBackend, MemoryEntry, MemoryQuery,
};
pub use message::{ConversationId, Message, Role};
pub use metrics::{MetricsSink, NoopMetrics, TurnMetrics};
pub use planner::{Action, Planner};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use storage::{InteractionRecord, StorageManager};
pub use tool::{Tool, ToolContext, ToolRegistry};
