//! Query classification capability for content-aware routing.
//!
//! The router treats classification as an opaque capability: given the
//! conversation and a set of expert descriptions, name the best expert (or a
//! difficulty bucket). The default implementation is a rule table — fast,
//! dependency-free, and deterministic. A deployment with a local model swaps
//! in its own [`Classifier`] behind the same trait; when no classifier is
//! configured at all, expert/difficulty routing degrades to the fallback
//! block without error.

use std::collections::BTreeMap;

use crate::types::CanonicalRequest;

/// A named routing bucket with the natural-language description shown to the
/// classifier.
#[derive(Debug, Clone)]
pub struct ExpertDefinition {
    pub name: String,
    pub description: String,
}

pub trait Classifier: Send + Sync {
    /// Pick the expert whose description best matches the request.
    /// `experts` is non-empty; `None` means "no confident match".
    fn classify_expert(&self, req: &CanonicalRequest, experts: &[ExpertDefinition])
        -> Option<String>;

    /// Estimate request difficulty as a bucket in `0..=5`.
    fn classify_difficulty(&self, req: &CanonicalRequest) -> u32;
}

/// Keyword-overlap classifier.
///
/// Experts: tokenize the expert description and the last user message; the
/// expert with the most shared tokens wins, earlier list position breaking
/// ties. Difficulty: count complexity signals (length, code fences, tool
/// use, multi-turn depth) into buckets 0–5.
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> BTreeMap<String, u32> {
        let mut map = BTreeMap::new();
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            *map.entry(word.to_lowercase()).or_insert(0) += 1;
        }
        map
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for KeywordClassifier {
    fn classify_expert(
        &self,
        req: &CanonicalRequest,
        experts: &[ExpertDefinition],
    ) -> Option<String> {
        let query = req.last_user_text()?;
        let query_tokens = Self::tokens(&query);

        let mut best: Option<(&ExpertDefinition, u32)> = None;
        for expert in experts {
            let description_tokens = Self::tokens(&expert.description);
            let overlap: u32 = description_tokens
                .iter()
                .filter_map(|(word, _)| query_tokens.get(word))
                .sum();
            // Strictly-greater keeps the earliest expert on ties.
            if overlap > 0 && best.map(|(_, score)| overlap > score).unwrap_or(true) {
                best = Some((expert, overlap));
            }
        }

        best.map(|(expert, _)| expert.name.clone())
            .or_else(|| experts.first().map(|e| e.name.clone()))
    }

    fn classify_difficulty(&self, req: &CanonicalRequest) -> u32 {
        let text = req.flat_text();
        let mut score = 0u32;

        if text.len() > 500 {
            score += 1;
        }
        if text.len() > 4_000 {
            score += 1;
        }
        if text.contains("```") {
            score += 1;
        }
        if req.tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false) {
            score += 1;
        }
        if req.messages.len() > 6 {
            score += 1;
        }

        score.min(5)
    }
}
