//! Graph knowledge source: schema snapshot, store boundary, Cypher translation, read-only
//! execution and the question-answering chain built on them.

pub mod chain;
pub mod executor;
pub mod neo4j;
pub mod translator;

pub use chain::{GraphQaChain, GraphQaOutcome, SchemaCache};
pub use executor::{check_read_only, GraphQueryExecutor};
pub use neo4j::Neo4jHttpStore;
pub use translator::{extract_query, CypherTranslator, Translation};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One result row: column name -> value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Labels, relationship types and property keys of the live graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub node_labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub property_keys: Vec<String>,
}

impl SchemaSnapshot {
    pub fn is_empty(&self) -> bool {
        self.node_labels.is_empty()
            && self.relationship_types.is_empty()
            && self.property_keys.is_empty()
    }

    /// Text form embedded in the translation prompt.
    pub fn render(&self) -> String {
        fn list(items: &[String]) -> String {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.join(", ")
            }
        }
        format!(
            "Node labels: {}\nRelationship types: {}\nProperty keys: {}",
            list(&self.node_labels),
            list(&self.relationship_types),
            list(&self.property_keys)
        )
    }
}

/// Why a graph query did not produce rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    Syntax,
    Unavailable,
    Timeout,
    Forbidden,
    Store,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Syntax => "Syntax",
            FailureCategory::Unavailable => "Unavailable",
            FailureCategory::Timeout => "Timeout",
            FailureCategory::Forbidden => "Forbidden",
            FailureCategory::Store => "Store",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Cypher syntax error: {0}")]
    Syntax(String),

    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    #[error("graph store error {code}: {message}")]
    Store { code: String, message: String },

    #[error("graph protocol error: {0}")]
    Protocol(String),
}

impl GraphError {
    pub fn category(&self) -> FailureCategory {
        match self {
            GraphError::Syntax(_) => FailureCategory::Syntax,
            GraphError::Unavailable(_) => FailureCategory::Unavailable,
            GraphError::Store { .. } | GraphError::Protocol(_) => FailureCategory::Store,
        }
    }
}

/// Outcome of executing one query. Never carries rows and an error at once.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows(Vec<Row>),
    Empty,
    Error {
        category: FailureCategory,
        message: String,
    },
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, QueryResult::Empty)
    }
}

/// Read access to a schema-described graph store.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    async fn schema(&self) -> Result<SchemaSnapshot, GraphError>;

    async fn run(&self, query: &str) -> Result<Vec<Row>, GraphError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_render_lists_every_part() {
        let schema = SchemaSnapshot {
            node_labels: vec!["Movie".into(), "Genre".into()],
            relationship_types: vec!["IN_GENRE".into()],
            property_keys: Vec::new(),
        };
        let text = schema.render();
        assert!(text.contains("Node labels: Movie, Genre"));
        assert!(text.contains("Relationship types: IN_GENRE"));
        assert!(text.contains("Property keys: (none)"));
        assert!(SchemaSnapshot::default().is_empty());
    }

    #[test]
    fn protocol_errors_count_as_store_failures() {
        assert_eq!(
            GraphError::Protocol("bad json".into()).category(),
            FailureCategory::Store
        );
        assert_eq!(
            GraphError::Unavailable("refused".into()).category(),
            FailureCategory::Unavailable
        );
    }
}
