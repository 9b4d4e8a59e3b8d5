//! Deterministic keyword classifier for questions.
//!
//! Used by guarded routing to check the model's first decision. Matching is on lowercase
//! words (single-word patterns) and substrings (multi-word patterns).

use crate::tools::ToolKind;

const SELF_PATTERNS: &[&str] = &[
    "who are you",
    "what are you",
    "what can you do",
    "what do you do",
    "your name",
    "how do i use",
    "how can i use",
    "what tools",
    "which tools",
    "help me use",
];

const GRAPH_WORDS: &[&str] = &[
    "movie", "movies", "film", "films", "genre", "genres", "director", "directors", "directed",
    "actor", "actors", "actress", "actresses", "cast", "starred", "starring", "acted", "award",
    "awards", "oscar", "oscars", "nominated", "review", "reviews", "rating", "ratings", "rated",
    "released", "release", "produced", "producer", "sequel", "franchise", "imdb", "runtime",
    "budget",
];

const GRAPH_PHRASES: &[&str] = &["who played", "played in", "box office", "came out"];

const TABULAR_WORDS: &[&str] = &[
    "sentiment", "sentiments", "emotion", "emotions", "emotional", "feeling", "feelings", "mood",
    "joy", "sadness", "anger", "fear", "disgust", "surprise", "polarity", "arc", "arcs", "csv",
    "analytics",
];

const VECTOR_WORDS: &[&str] = &[
    "dialogue", "dialog", "quote", "quotes", "said", "says", "say", "scene", "scenes",
    "monologue", "speech", "line", "lines",
];

const VECTOR_PHRASES: &[&str] = &["talk about", "talks about", "conversation between"];

/// Classification of one question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Intent {
    /// Question is about the assistant itself; may be answered directly.
    pub self_referential: bool,
    /// Matching tool domains, in [`ToolKind::ALL`] order.
    pub domains: Vec<ToolKind>,
}

impl Intent {
    pub fn is_off_domain(&self) -> bool {
        !self.self_referential && self.domains.is_empty()
    }

    pub fn matches(&self, kind: ToolKind) -> bool {
        self.domains.contains(&kind)
    }

    /// Matching domains, best first: `priority` order, then kinds missing from `priority`.
    pub fn ranked(&self, priority: &[ToolKind]) -> Vec<ToolKind> {
        let mut ranked: Vec<ToolKind> = priority
            .iter()
            .copied()
            .filter(|k| self.matches(*k))
            .collect();
        for kind in &self.domains {
            if !ranked.contains(kind) {
                ranked.push(*kind);
            }
        }
        ranked
    }
}

pub fn classify(question: &str) -> Intent {
    let text = question.trim().to_lowercase();
    if text.is_empty() {
        return Intent::default();
    }
    if SELF_PATTERNS.iter().any(|p| text.contains(p)) {
        return Intent {
            self_referential: true,
            domains: Vec::new(),
        };
    }

    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_word = |set: &[&str]| words.iter().any(|w| set.contains(w));
    let has_phrase = |set: &[&str]| set.iter().any(|p| text.contains(p));

    let mut domains = Vec::new();
    if has_word(GRAPH_WORDS) || has_phrase(GRAPH_PHRASES) {
        domains.push(ToolKind::Graph);
    }
    if has_word(TABULAR_WORDS) {
        domains.push(ToolKind::Tabular);
    }
    if has_word(VECTOR_WORDS) || has_phrase(VECTOR_PHRASES) {
        domains.push(ToolKind::Vector);
    }
    Intent {
        self_referential: false,
        domains,
    }
}
