//! No-op collaborators: used when learning, lifecycle maintenance or the
//! knowledge base are switched off.

use async_trait::async_trait;
use concierge_core::context::KnowledgeBase;
use concierge_core::error::MemoryError;
use concierge_core::memory::{
    LearningInput, LearningManager, LearningOutcome, LifecycleManager, LifecycleReport,
};

/// Learns nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLearning;

#[async_trait]
impl LearningManager for NoopLearning {
    fn name(&self) -> &str {
        "none"
    }

    async fn learn(&self, _input: &LearningInput<'_>) -> Result<LearningOutcome, MemoryError> {
        Ok(LearningOutcome::default())
    }
}

/// Leaves the memory store untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

#[async_trait]
impl LifecycleManager for NoopLifecycle {
    fn name(&self) -> &str {
        "none"
    }

    async fn maintain(&self, _user_id: &str) -> Result<LifecycleReport, MemoryError> {
        Ok(LifecycleReport::default())
    }
}

/// A knowledge base with no documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKnowledgeBase;

#[async_trait]
impl KnowledgeBase for NoopKnowledgeBase {
    async fn query_knowledge_base(
        &self,
        _user_id: &str,
        _user_input: &str,
    ) -> Result<Vec<serde_json::Value>, MemoryError> {
        Ok(Vec::new())
    }
}
