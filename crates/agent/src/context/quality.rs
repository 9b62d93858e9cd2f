//! Relevance scoring of candidate memory blocks.

use concierge_core::agent::{MemoryBlock, StateConfig};
use concierge_core::text;
use serde::{Deserialize, Serialize};

/// Share of the blended score that comes from keyword overlap with the input.
const OVERLAP_WEIGHT: f32 = 0.7;

/// Summary of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub candidates: usize,
    pub kept: usize,
    pub dropped: usize,
    pub mean_quality: f32,
    pub min_quality: f32,
    pub max_quality: f32,
}

impl QualityMetrics {
    fn from_scores(candidates: usize, kept: &[MemoryBlock]) -> Self {
        let scores: Vec<f32> = kept.iter().map(|b| b.quality).collect();
        let (mean, min, max) = if scores.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                scores.iter().sum::<f32>() / scores.len() as f32,
                scores.iter().copied().fold(f32::INFINITY, f32::min),
                scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            )
        };
        Self {
            candidates,
            kept: kept.len(),
            dropped: candidates - kept.len(),
            mean_quality: mean,
            min_quality: min,
            max_quality: max,
        }
    }
}

/// Scores blocks against the current input and filters out noise.
///
/// The score blends keyword overlap with the block's prior quality (the
/// retriever's or knowledge base's own score). When the input carries no
/// keywords there is nothing to judge relevance against, so every block is
/// kept with its prior.
#[derive(Debug, Clone)]
pub struct RelevanceValidator {
    terms: Vec<String>,
    min_relevance: f32,
}

impl RelevanceValidator {
    pub fn new(user_input: &str, config: &StateConfig) -> Self {
        Self {
            terms: text::keywords(user_input),
            min_relevance: config.min_relevance,
        }
    }

    pub fn score(&self, block: &MemoryBlock) -> f32 {
        if self.terms.is_empty() {
            return block.quality;
        }
        let overlap = text::term_overlap(&self.terms, &block.content);
        (OVERLAP_WEIGHT * overlap + (1.0 - OVERLAP_WEIGHT) * block.quality).clamp(0.0, 1.0)
    }

    /// Rescore every block and drop those below the relevance floor.
    pub fn validate(&self, blocks: Vec<MemoryBlock>) -> (Vec<MemoryBlock>, QualityMetrics) {
        let candidates = blocks.len();
        let kept: Vec<MemoryBlock> = blocks
            .into_iter()
            .filter_map(|mut block| {
                block.quality = self.score(&block);
                (self.terms.is_empty() || block.quality >= self.min_relevance).then_some(block)
            })
            .collect();
        let metrics = QualityMetrics::from_scores(candidates, &kept);
        (kept, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::agent::MemorySource;

    fn block(content: &str, quality: f32) -> MemoryBlock {
        MemoryBlock::new(MemorySource::Rag, "document", content).with_quality(quality)
    }

    #[test]
    fn overlapping_block_outscores_unrelated() {
        let v = RelevanceValidator::new("dentist appointment tuesday", &StateConfig::default());
        let on_topic = v.score(&block("Dentist appointment moved to Tuesday 3pm", 0.5));
        let off_topic = v.score(&block("Favourite band is Radiohead", 0.5));
        assert!(on_topic > off_topic);
    }

    #[test]
    fn drops_below_floor_and_reports() {
        let v = RelevanceValidator::new("dentist appointment", &StateConfig::default());
        let (kept, metrics) = v.validate(vec![
            block("dentist appointment on friday", 0.5),
            block("unrelated trivia", 0.1),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(metrics.candidates, 2);
        assert_eq!(metrics.dropped, 1);
        assert!(metrics.max_quality >= metrics.min_quality);
    }

    #[test]
    fn keywordless_input_keeps_everything() {
        let v = RelevanceValidator::new("hi", &StateConfig::default());
        let (kept, metrics) = v.validate(vec![block("anything", 0.0), block("else", 0.9)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(metrics.dropped, 0);
        assert_eq!(kept[1].quality, 0.9);
    }
}
