//! Per-turn agent state and the value objects it carries.
//!
//! `AgentState` is the only object mutated across calls within a turn.
//! All size limits live here so every writer goes through the same
//! enforcement: history is capped by message count and by serialized size,
//! memory context by total content characters.

use crate::message::{ConversationId, Message, Role};
use crate::text;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Role tag carried by every memory block.
pub const MEMORY_ROLE: &str = "memory";

/// Size-limit configuration carried by each state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Maximum number of messages kept in `conversation_history`.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,

    /// Maximum serialized (JSON) length of `conversation_history`, in bytes.
    #[serde(default = "default_max_history_bytes")]
    pub max_history_bytes: usize,

    /// Ceiling on the summed content characters of `memory_context`.
    #[serde(default = "default_memory_context_limit")]
    pub memory_context_limit: usize,

    /// Per-turn character budget for injected memory blocks.
    #[serde(default = "default_context_injection_limit")]
    pub context_injection_limit: usize,

    /// Blocks scoring below this relevance are dropped during injection.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,

    /// Maximum number of carried focus topics.
    #[serde(default = "default_max_focus_topics")]
    pub max_focus_topics: usize,
}

fn default_max_history_messages() -> usize {
    40
}
fn default_max_history_bytes() -> usize {
    32_000
}
fn default_memory_context_limit() -> usize {
    6_000
}
fn default_context_injection_limit() -> usize {
    4_000
}
fn default_min_relevance() -> f32 {
    0.15
}
fn default_max_focus_topics() -> usize {
    8
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
            max_history_bytes: default_max_history_bytes(),
            memory_context_limit: default_memory_context_limit(),
            context_injection_limit: default_context_injection_limit(),
            min_relevance: default_min_relevance(),
            max_focus_topics: default_max_focus_topics(),
        }
    }
}

/// Where a memory block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Raw long-term memory text.
    Ltm,
    /// Long-term memory after focus-aware optimization.
    LtmEnhanced,
    /// Retrieved knowledge-base document.
    Rag,
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ltm => write!(f, "ltm"),
            Self::LtmEnhanced => write!(f, "ltm_enhanced"),
            Self::Rag => write!(f, "rag"),
        }
    }
}

fn memory_role() -> String {
    MEMORY_ROLE.into()
}

/// A unit of context injected into the working context for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    #[serde(default = "memory_role")]
    pub role: String,
    pub source: MemorySource,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Quality/relevance in 0.0–1.0; drives retention under size pressure.
    #[serde(default)]
    pub quality: f32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl MemoryBlock {
    pub fn new(source: MemorySource, kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: memory_role(),
            source,
            content: content.into(),
            kind: kind.into(),
            metadata: BTreeMap::new(),
            quality: 0.5,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    /// Content length in characters.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Indices of `blocks` from most to least worth keeping.
///
/// Total order: higher quality first, then newer `created_at`, then earlier
/// position. Eviction walks this ranking from the back.
pub fn retention_ranking(blocks: &[MemoryBlock]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..blocks.len()).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (&blocks[a], &blocks[b]);
        y.quality
            .partial_cmp(&x.quality)
            .unwrap_or(Ordering::Equal)
            .then_with(|| y.created_at.cmp(&x.created_at))
            .then_with(|| a.cmp(&b))
    });
    order
}

/// Provenance of one successful tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProvenance {
    pub name: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// How a loop execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The planner produced a final answer.
    FinalAnswer,
    /// A tool call failed and short-circuited the loop.
    ToolFailure,
    /// The step budget ran out and the planner was forced to finish.
    ForcedFinish,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::ToolFailure => "tool_failure",
            Self::ForcedFinish => "forced_finish",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-progress turn bound to a conversation and a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub conversation_id: ConversationId,
    pub user_id: String,

    /// The current user message.
    pub user_input: String,

    /// Role-tagged messages, oldest first.
    #[serde(default)]
    pub conversation_history: Vec<Message>,

    /// Memory blocks injected for the planner.
    #[serde(default)]
    pub memory_context: Vec<MemoryBlock>,

    /// Carried topics, most recent first.
    #[serde(default)]
    pub focus: Vec<String>,

    /// Loop counter, reset at turn start.
    #[serde(default)]
    pub step_count: u32,

    /// Most recent tool output.
    #[serde(default)]
    pub last_tool_result: Option<ToolProvenance>,

    /// Every successful tool call of the current turn.
    #[serde(default)]
    pub turn_tools: Vec<ToolProvenance>,

    #[serde(default)]
    pub config: StateConfig,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    /// Create an empty state for a fresh conversation.
    pub fn new(conversation_id: ConversationId, user_id: impl Into<String>, config: StateConfig) -> Self {
        let now = Utc::now();
        Self {
            conversation_id,
            user_id: user_id.into(),
            user_input: String::new(),
            conversation_history: Vec::new(),
            memory_context: Vec::new(),
            focus: Vec::new(),
            step_count: 0,
            last_tool_result: None,
            turn_tools: Vec::new(),
            config,
            created_at: now,
            updated_at: now,
        }
    }

    /// Prepare the state for a new turn.
    pub fn reset_for_turn(&mut self, user_input: impl Into<String>) {
        self.user_input = user_input.into();
        self.step_count = 0;
        self.last_tool_result = None;
        self.turn_tools.clear();
        self.touch();
    }

    /// Append the user's input unless it is already the last entry.
    /// Returns `true` when a message was appended.
    pub fn append_user_input(&mut self, user_input: &str) -> bool {
        let already_present = self
            .conversation_history
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == user_input);
        if !already_present {
            self.conversation_history.push(Message::user(user_input));
            self.touch();
        }
        self.apply_size_limits();
        !already_present
    }

    /// Append an assistant message.
    pub fn append_assistant(&mut self, content: &str) {
        self.conversation_history.push(Message::assistant(content));
        self.touch();
        self.apply_size_limits();
    }

    /// The single writer of tool results: appends one tool-role history
    /// entry, updates `last_tool_result` and records provenance.
    pub fn record_tool_result(
        &mut self,
        name: &str,
        args: serde_json::Value,
        result: serde_json::Value,
    ) {
        // Arguments live in the provenance only; history carries the output.
        self.conversation_history
            .push(Message::tool_result(name, render_tool_output(&result)));

        let provenance = ToolProvenance {
            name: name.to_string(),
            args,
            result,
            recorded_at: Utc::now(),
        };

        self.turn_tools.push(provenance.clone());
        self.last_tool_result = Some(provenance);
        self.touch();
        self.apply_size_limits();
    }

    /// Merge keywords of the current input into `focus`, newest first.
    pub fn refresh_focus(&mut self) {
        let fresh = text::keywords(&self.user_input);
        if fresh.is_empty() {
            return;
        }
        let mut merged = fresh;
        for topic in self.focus.drain(..) {
            if !merged.contains(&topic) {
                merged.push(topic);
            }
        }
        merged.truncate(self.config.max_focus_topics);
        self.focus = merged;
    }

    /// Summed content characters of `memory_context`.
    pub fn memory_context_chars(&self) -> usize {
        self.memory_context.iter().map(MemoryBlock::char_len).sum()
    }

    /// Serialized JSON length of `conversation_history`.
    pub fn history_bytes(&self) -> usize {
        serde_json::to_string(&self.conversation_history).map_or(0, |s| s.len())
    }

    /// Enforce every configured ceiling.
    pub fn apply_size_limits(&mut self) {
        self.enforce_history_limits();
        self.trim_memory_context(self.config.memory_context_limit);
    }

    /// Drop the lowest-priority memory blocks until the summed content fits
    /// in `limit` characters. Returns the number of blocks dropped.
    pub fn trim_memory_context(&mut self, limit: usize) -> usize {
        let mut total = self.memory_context_chars();
        if total <= limit {
            return 0;
        }

        let ranking = retention_ranking(&self.memory_context);
        let mut evicted = vec![false; self.memory_context.len()];
        for &idx in ranking.iter().rev() {
            if total <= limit {
                break;
            }
            total -= self.memory_context[idx].char_len();
            evicted[idx] = true;
        }

        let mut idx = 0;
        self.memory_context.retain(|_| {
            let keep = !evicted[idx];
            idx += 1;
            keep
        });
        evicted.iter().filter(|e| **e).count()
    }

    fn enforce_history_limits(&mut self) {
        let max_messages = self.config.max_history_messages.max(1);
        if self.conversation_history.len() > max_messages {
            let excess = self.conversation_history.len() - max_messages;
            self.conversation_history.drain(..excess);
        }

        let max_bytes = self.config.max_history_bytes;
        while self.conversation_history.len() > 1 && self.history_bytes() > max_bytes {
            self.conversation_history.remove(0);
        }

        // A single oversized message is shortened rather than removed so the
        // history never becomes empty.
        loop {
            let size = self.history_bytes();
            if size <= max_bytes {
                return;
            }
            let Some(last) = self.conversation_history.last_mut() else {
                return;
            };
            if !last.metadata.is_empty() || !last.tool_calls.is_empty() {
                last.metadata.clear();
                last.tool_calls.clear();
                continue;
            }
            if last.content.is_empty() {
                return;
            }
            let excess = size - max_bytes + '…'.len_utf8();
            let mut cut = last.content.len().saturating_sub(excess);
            while cut > 0 && !last.content.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                last.content.clear();
            } else {
                last.content.truncate(cut);
                last.content.push('…');
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Render a tool result as history text: strings verbatim, everything else as JSON.
pub fn render_tool_output(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state() -> AgentState {
        AgentState::new(ConversationId::from("c1"), "u1", StateConfig::default())
    }

    fn block(content: &str, quality: f32) -> MemoryBlock {
        MemoryBlock::new(MemorySource::Rag, "document", content).with_quality(quality)
    }

    #[test]
    fn new_state_is_empty() {
        let s = state();
        assert!(s.conversation_history.is_empty());
        assert!(s.memory_context.is_empty());
        assert_eq!(s.step_count, 0);
    }

    #[test]
    fn user_input_is_not_duplicated() {
        let mut s = state();
        assert!(s.append_user_input("hi"));
        assert!(!s.append_user_input("hi"));
        assert_eq!(s.conversation_history.len(), 1);
    }

    #[test]
    fn history_respects_message_cap() {
        let mut s = state();
        s.config.max_history_messages = 3;
        for i in 0..5 {
            s.append_assistant(&format!("m{i}"));
        }
        let contents: Vec<_> = s.conversation_history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn history_respects_serialized_size_cap() {
        let mut s = state();
        s.config.max_history_bytes = 1_200;
        for _ in 0..20 {
            s.append_assistant(&"x".repeat(100));
            assert!(s.history_bytes() <= 1_200);
        }
        assert!(!s.conversation_history.is_empty());
    }

    #[test]
    fn oversized_single_message_is_truncated_not_removed() {
        let mut s = state();
        s.config.max_history_bytes = 600;
        s.append_user_input(&"é".repeat(2_000));
        assert_eq!(s.conversation_history.len(), 1);
        assert!(s.history_bytes() <= 600);
        assert!(s.conversation_history[0].content.ends_with('…'));
    }

    #[test]
    fn record_tool_result_writes_history_and_slot() {
        let mut s = state();
        s.record_tool_result("weather", serde_json::json!({"city": "Oslo"}), serde_json::json!("4°C"));
        assert_eq!(s.conversation_history.len(), 1);
        assert_eq!(s.conversation_history[0].role, Role::Tool);
        assert_eq!(s.conversation_history[0].content, "4°C");
        let last = s.last_tool_result.as_ref().unwrap();
        assert_eq!(last.name, "weather");
        assert_eq!(s.turn_tools.len(), 1);
    }

    #[test]
    fn large_tool_args_stay_out_of_history() {
        let mut s = state();
        s.config.max_history_bytes = 1_024;
        s.append_user_input("write it down");
        let args = serde_json::json!({"text": "z".repeat(3_000)});
        s.record_tool_result("notes", args.clone(), serde_json::json!("saved"));

        assert!(s.history_bytes() <= 1_024);
        assert_eq!(s.conversation_history.len(), 2);
        assert_eq!(s.conversation_history[0].content, "write it down");
        assert_eq!(s.conversation_history[1].content, "saved");
        assert_eq!(s.last_tool_result.as_ref().unwrap().args, args);
    }

    #[test]
    fn oversized_metadata_is_dropped_before_content() {
        let mut s = state();
        s.config.max_history_bytes = 600;
        let mut msg = Message::assistant("short reply");
        msg.metadata
            .insert("blob".into(), serde_json::Value::String("y".repeat(2_000)));
        s.conversation_history.push(msg);
        s.apply_size_limits();

        assert!(s.history_bytes() <= 600);
        assert_eq!(s.conversation_history[0].content, "short reply");
        assert!(s.conversation_history[0].metadata.is_empty());
    }

    #[test]
    fn reset_for_turn_clears_turn_fields() {
        let mut s = state();
        s.step_count = 4;
        s.record_tool_result("t", serde_json::json!({}), serde_json::json!(1));
        s.reset_for_turn("next");
        assert_eq!(s.step_count, 0);
        assert!(s.last_tool_result.is_none());
        assert!(s.turn_tools.is_empty());
        assert_eq!(s.user_input, "next");
        // History survives the reset.
        assert_eq!(s.conversation_history.len(), 1);
    }

    #[test]
    fn trim_drops_lowest_quality_first() {
        let mut s = state();
        s.memory_context = vec![block(&"a".repeat(40), 0.9), block(&"b".repeat(40), 0.1), block(&"c".repeat(40), 0.5)];
        let dropped = s.trim_memory_context(85);
        assert_eq!(dropped, 1);
        let kept: Vec<char> = s.memory_context.iter().map(|b| b.content.chars().next().unwrap()).collect();
        assert_eq!(kept, vec!['a', 'c']);
        assert!(s.memory_context_chars() <= 85);
    }

    #[test]
    fn ranking_breaks_quality_ties_by_recency() {
        let mut old = block("old", 0.5);
        old.created_at = Utc::now() - Duration::hours(1);
        let new = block("new", 0.5);
        assert_eq!(retention_ranking(&[old, new]), vec![1, 0]);
    }

    #[test]
    fn focus_keeps_newest_topics_first() {
        let mut s = state();
        s.config.max_focus_topics = 3;
        s.reset_for_turn("planning a trip to Lisbon");
        s.refresh_focus();
        s.reset_for_turn("coffee recommendations");
        s.refresh_focus();
        assert_eq!(s.focus, vec!["coffee", "recommendations", "planning"]);
    }

    #[test]
    fn memory_block_serializes_type_field() {
        let b = MemoryBlock::new(MemorySource::LtmEnhanced, "optimized_memory", "likes tea");
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["role"], "memory");
        assert_eq!(json["source"], "ltm_enhanced");
        assert_eq!(json["type"], "optimized_memory");
    }
}
