//! Candidate context retrieval with fallback tiers.
//!
//! Long-term memory is read through the scoring retriever when one is
//! configured, with the legacy tag lookup as the fallback tier. The
//! knowledge base is queried concurrently. Every failure degrades to "no
//! context" and is logged; none reaches the caller.

use concierge_core::agent::AgentState;
use concierge_core::context::{
    ContextOptimizer, KnowledgeBase, LtmRetriever, TaggedMemoryRetriever, render_memory_records,
};
use concierge_core::text;
use concierge_memory::NoopKnowledgeBase;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retrieved context for one turn, before injection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnhancedContext {
    /// Long-term memory as blank-line separated records.
    pub ltm_context: Option<String>,
    /// Knowledge-base documents in whatever shape the source returns.
    pub rag_context: Vec<Value>,
}

pub struct ContextService {
    retriever: Option<Arc<dyn LtmRetriever>>,
    optimizer: Option<Arc<dyn ContextOptimizer>>,
    tagged: Option<Arc<dyn TaggedMemoryRetriever>>,
    knowledge: Arc<dyn KnowledgeBase>,
    ltm_limit: usize,
    rag_limit: usize,
}

impl ContextService {
    pub fn new() -> Self {
        Self {
            retriever: None,
            optimizer: None,
            tagged: None,
            knowledge: Arc::new(NoopKnowledgeBase),
            ltm_limit: 8,
            rag_limit: 5,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn LtmRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn ContextOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_tagged_retriever(mut self, tagged: Arc<dyn TaggedMemoryRetriever>) -> Self {
        self.tagged = Some(tagged);
        self
    }

    pub fn with_knowledge_base(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_limits(mut self, ltm_limit: usize, rag_limit: usize) -> Self {
        self.ltm_limit = ltm_limit;
        self.rag_limit = rag_limit;
        self
    }

    /// Gather long-term memory and knowledge-base context for the input.
    pub async fn get_enhanced_context(
        &self,
        user_id: &str,
        user_input: &str,
        state: &AgentState,
    ) -> EnhancedContext {
        let (ltm_context, rag_context) = tokio::join!(
            self.long_term(user_id, user_input, &state.focus),
            self.knowledge(user_id, user_input),
        );
        debug!(
            user_id,
            ltm = ltm_context.is_some(),
            rag = rag_context.len(),
            "Context retrieved"
        );
        EnhancedContext {
            ltm_context,
            rag_context,
        }
    }

    async fn long_term(&self, user_id: &str, user_input: &str, focus: &[String]) -> Option<String> {
        if let Some(retriever) = &self.retriever {
            match retriever.retrieve(user_id, user_input, self.ltm_limit).await {
                Ok(records) => {
                    let records = match &self.optimizer {
                        Some(optimizer) => {
                            match optimizer.optimize(records.clone(), focus, user_input).await {
                                Ok(optimized) => optimized,
                                Err(e) => {
                                    warn!(user_id, error = %e, "Memory optimization failed, using unranked records");
                                    records
                                }
                            }
                        }
                        None => records,
                    };
                    let rendered = render_memory_records(&records);
                    return (!rendered.is_empty()).then_some(rendered);
                }
                Err(e) => warn!(user_id, error = %e, "Enhanced memory retrieval failed, trying tag lookup"),
            }
        }
        self.tagged_fallback(user_id, user_input, focus).await
    }

    async fn tagged_fallback(&self, user_id: &str, user_input: &str, focus: &[String]) -> Option<String> {
        let tagged = self.tagged.as_ref()?;
        let mut tags: Vec<String> = focus.to_vec();
        for keyword in text::keywords(user_input) {
            if !tags.contains(&keyword) {
                tags.push(keyword);
            }
        }
        match tagged.retrieve_by_tags(user_id, &tags, self.ltm_limit).await {
            Ok(found) => found.filter(|s| !s.trim().is_empty()),
            Err(e) => {
                warn!(user_id, error = %e, "Tag-based memory retrieval failed");
                None
            }
        }
    }

    async fn knowledge(&self, user_id: &str, user_input: &str) -> Vec<Value> {
        match self.knowledge.query_knowledge_base(user_id, user_input).await {
            Ok(mut docs) => {
                docs.truncate(self.rag_limit);
                docs
            }
            Err(e) => {
                warn!(user_id, error = %e, "Knowledge base query failed");
                Vec::new()
            }
        }
    }
}

impl Default for ContextService {
    fn default() -> Self {
        Self::new()
    }
}
