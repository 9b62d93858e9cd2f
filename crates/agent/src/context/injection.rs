//! Bounded, quality-filtered injection of memory blocks into the state.
//!
//! Candidates come from two places: long-term memory text (optionally split
//! into records and run through the optimizer) and knowledge-base documents
//! of arbitrary shape. Injection never fails. Anything it cannot use is
//! skipped and counted in the [`InjectionReport`].

use crate::context::quality::{QualityMetrics, RelevanceValidator};
use concierge_core::agent::{AgentState, MemoryBlock, MemorySource, retention_ranking};
use concierge_core::context::{ContextOptimizer, parse_memory_records};
use concierge_core::text;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Keys probed, in order, for a document's text.
const CONTENT_KEYS: &[&str] = &["content", "page_content", "text", "body", "snippet", "summary"];

/// Metadata keys copied from a document onto its block.
const DOCUMENT_META_KEYS: &[&str] = &["id", "title", "source", "url"];

/// Nested `document` wrappers followed before giving up.
const MAX_NESTING: usize = 3;

/// Smallest remainder a block may be truncated into.
const MIN_TRUNCATED_CHARS: usize = 128;

/// What one injection pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionReport {
    /// Blocks built from the inputs.
    pub candidates: usize,
    /// Knowledge-base documents with no usable content.
    pub skipped_documents: usize,
    /// Blocks removed by the relevance floor.
    pub dropped_low_quality: usize,
    /// Blocks already present in the state.
    pub duplicates: usize,
    /// Blocks that did not fit the injection budget.
    pub over_budget: usize,
    /// Blocks shortened to fit the budget.
    pub truncated: usize,
    /// Blocks appended to `memory_context`.
    pub injected: usize,
    /// Blocks (old or new) evicted by the final trim.
    pub evicted: usize,
    pub quality: Option<QualityMetrics>,
}

/// Pull usable text out of a knowledge-base document of unknown shape.
///
/// Plain strings are used as is. Objects are probed for the usual content
/// keys, then unwrapped through a nested `document` field.
pub fn extract_content(doc: &Value) -> Option<String> {
    extract_at(doc, 0)
}

fn extract_at(doc: &Value, depth: usize) -> Option<String> {
    match doc {
        Value::String(s) => non_blank(s),
        Value::Object(map) => CONTENT_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str).and_then(non_blank))
            .or_else(|| {
                (depth < MAX_NESTING)
                    .then(|| map.get("document"))
                    .flatten()
                    .and_then(|inner| extract_at(inner, depth + 1))
            }),
        _ => None,
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn document_block(doc: &Value, content: String) -> MemoryBlock {
    let mut block = MemoryBlock::new(MemorySource::Rag, "document", content);
    if let Some(map) = doc.as_object() {
        for key in DOCUMENT_META_KEYS {
            match map.get(*key) {
                Some(Value::String(s)) => {
                    block.metadata.insert((*key).into(), s.clone());
                }
                Some(Value::Number(n)) => {
                    block.metadata.insert((*key).into(), n.to_string());
                }
                _ => {}
            }
        }
        if let Some(score) = map.get("score").and_then(Value::as_f64) {
            block = block.with_quality(score as f32);
        }
    }
    block
}

pub struct ContextInjectionService {
    optimizer: Option<Arc<dyn ContextOptimizer>>,
}

impl ContextInjectionService {
    pub fn new() -> Self {
        Self { optimizer: None }
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn ContextOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Turn retrieved context into memory blocks and add the best of them
    /// to `state.memory_context` within the injection budget.
    pub async fn inject_context(
        &self,
        state: &mut AgentState,
        rag_context: Option<&[Value]>,
        ltm_context: Option<&str>,
    ) -> InjectionReport {
        let mut report = InjectionReport::default();
        let mut candidates = Vec::new();

        if let Some(ltm) = ltm_context.and_then(non_blank) {
            candidates.extend(self.ltm_blocks(state, ltm).await);
        }

        for doc in rag_context.unwrap_or_default() {
            match extract_content(doc) {
                Some(content) => candidates.push(document_block(doc, content)),
                None => report.skipped_documents += 1,
            }
        }
        report.candidates = candidates.len();

        if candidates.is_empty() {
            if report.skipped_documents > 0 {
                debug!(skipped = report.skipped_documents, "No usable context candidates");
            }
            return report;
        }

        let validator = RelevanceValidator::new(&state.user_input, &state.config);
        let (kept, metrics) = validator.validate(candidates);
        report.dropped_low_quality = metrics.dropped;
        debug!(
            candidates = metrics.candidates,
            kept = metrics.kept,
            dropped = metrics.dropped,
            mean_quality = metrics.mean_quality,
            min_quality = metrics.min_quality,
            max_quality = metrics.max_quality,
            "Context quality"
        );
        report.quality = Some(metrics);

        let budget = state.config.context_injection_limit;
        let admitted = admit_within_budget(state, kept, budget, &mut report);
        report.injected = admitted.len();
        state.memory_context.extend(admitted);

        let ceiling = budget.min(state.config.memory_context_limit);
        report.evicted = state.trim_memory_context(ceiling);
        state.apply_size_limits();

        debug!(
            conversation_id = %state.conversation_id,
            injected = report.injected,
            evicted = report.evicted,
            chars = state.memory_context_chars(),
            "Context injected"
        );
        report
    }

    async fn ltm_blocks(&self, state: &AgentState, ltm: String) -> Vec<MemoryBlock> {
        let raw = || vec![MemoryBlock::new(MemorySource::Ltm, "memory", ltm.clone())];

        let Some(optimizer) = &self.optimizer else {
            return raw();
        };

        let records = parse_memory_records(&ltm);
        match optimizer.optimize(records, &state.focus, &state.user_input).await {
            Ok(records) => records
                .into_iter()
                .filter_map(|record| {
                    let content = non_blank(&record.content)?;
                    let mut block = MemoryBlock::new(MemorySource::LtmEnhanced, "optimized_memory", content)
                        .with_quality(record.score);
                    block.metadata = record.metadata;
                    Some(block)
                })
                .collect(),
            Err(e) => {
                warn!(conversation_id = %state.conversation_id, error = %e, "Context optimizer failed, injecting raw memory");
                raw()
            }
        }
    }
}

impl Default for ContextInjectionService {
    fn default() -> Self {
        Self::new()
    }
}

/// Greedily pick blocks best-first until `budget` characters are used.
/// Survivors come back in their original order. A candidate already held in
/// `state.memory_context` is not admitted again; the held block takes the
/// candidate's score for the current input instead.
fn admit_within_budget(
    state: &mut AgentState,
    blocks: Vec<MemoryBlock>,
    budget: usize,
    report: &mut InjectionReport,
) -> Vec<MemoryBlock> {
    let mut seen: HashSet<String> = state.memory_context.iter().map(|b| b.content.clone()).collect();
    let mut refreshed: HashSet<String> = HashSet::new();
    let mut remaining = budget;
    let mut admitted: Vec<(usize, MemoryBlock)> = Vec::new();
    let ranking = retention_ranking(&blocks);
    let mut slots: Vec<Option<MemoryBlock>> = blocks.into_iter().map(Some).collect();

    for idx in ranking {
        let Some(mut block) = slots[idx].take() else {
            continue;
        };
        if !seen.insert(block.content.clone()) {
            if refreshed.insert(block.content.clone()) {
                if let Some(held) = state.memory_context.iter_mut().find(|b| b.content == block.content) {
                    held.quality = block.quality;
                }
            }
            report.duplicates += 1;
            continue;
        }
        let len = block.char_len();
        if len <= remaining {
            remaining -= len;
        } else if remaining >= MIN_TRUNCATED_CHARS {
            block.content = text::truncate_chars(&block.content, remaining);
            block.metadata.insert("truncated".into(), "true".into());
            remaining = 0;
            report.truncated += 1;
        } else {
            report.over_budget += 1;
            continue;
        }
        admitted.push((idx, block));
    }

    admitted.sort_by_key(|(idx, _)| *idx);
    admitted.into_iter().map(|(_, block)| block).collect()
}
