//! Memory and persistence implementations for Concierge.
//!
//! Long-term memory stores (`InMemoryBackend`, `FileBackend`) and the
//! services built over them (retrieval, optimization, learning, lifecycle),
//! plus the conversation stores behind `StorageManager`.

pub mod file_backend;
pub mod in_memory;
pub mod knowledge;
pub mod learning;
pub mod lifecycle;
pub mod noop;
pub mod optimizer;
pub mod retriever;
mod search;
pub mod state_store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;
pub use knowledge::{InMemoryKnowledgeBase, KnowledgeDocument};
pub use learning::MemoryLearningManager;
pub use lifecycle::DecayLifecycleManager;
pub use noop::{NoopKnowledgeBase, NoopLearning, NoopLifecycle};
pub use optimizer::FocusOptimizer;
pub use retriever::StoreRetriever;
pub use state_store::InMemoryStateStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStateStore;
