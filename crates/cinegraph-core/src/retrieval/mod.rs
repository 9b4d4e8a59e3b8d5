//! Secondary knowledge sources: keyword search over a CSV export and vector similarity search.
//!
//! Adapters never raise: every failure is folded into a [`RetrievalOutcome`] and rendered to
//! tagged text for the router.

pub mod tabular;
pub mod vector;

pub use tabular::{TabularError, TabularSearch};
pub use vector::{
    ChromaIndex, InMemoryVectorIndex, VectorError, VectorHit, VectorIndex, VectorSearch,
    NO_RELEVANT_CONTEXT,
};

use serde::{Deserialize, Serialize};

/// One retrieved item with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Where it came from: the matching column, or `movie :: character`.
    pub label: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    Matches(Vec<Record>),
    NoMatch,
    /// Source missing or unreachable; the message names it.
    Unavailable(String),
    Failed { category: String, message: String },
}

impl RetrievalOutcome {
    pub fn records(&self) -> &[Record] {
        match self {
            RetrievalOutcome::Matches(records) => records,
            _ => &[],
        }
    }
}
