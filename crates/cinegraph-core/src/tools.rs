//! Closed set of tools the router can call, addressed by unique name.

use crate::graph::GraphQaChain;
use crate::retrieval::{TabularSearch, VectorSearch};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub const GRAPH_TOOL: &str = "GraphQA";
pub const GRAPH_TOOL_DESCRIPTION: &str = "You MUST use this tool whenever the user asks about movies, genres, people, awards, reviews, or anything that could be stored in the movie graph database. The input should always be the natural language question. The tool translates the question into Cypher, runs it read-only on Neo4j, and returns the results.";

pub const TABULAR_TOOL: &str = "TableSearch";
pub const TABULAR_TOOL_DESCRIPTION: &str = "You MUST use this tool whenever the user asks about processed sentiment data, character emotions, sentiment arcs, CSV exports, or analytics not stored in the graph. Input: a keyword or short phrase to look for. Output: matching rows.";

pub const VECTOR_TOOL: &str = "VectorSearch";
pub const VECTOR_TOOL_DESCRIPTION: &str = "Use this tool for questions about dialogue, quotes, or what a character said or felt in a scene. Input: the natural language question. Output: the most similar dialogue excerpts with their movie and character.";

/// Name + description shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Graph,
    Tabular,
    Vector,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::Graph, ToolKind::Tabular, ToolKind::Vector];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Graph => "graph",
            ToolKind::Tabular => "tabular",
            ToolKind::Vector => "vector",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graph" => Ok(ToolKind::Graph),
            "tabular" | "csv" => Ok(ToolKind::Tabular),
            "vector" => Ok(ToolKind::Vector),
            other => Err(format!("unknown tool kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Empty,
    Unavailable,
    Error,
}

/// Text appended to the conversation as a `tool` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    pub status: ToolStatus,
}

impl ToolOutput {
    fn with_status(text: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            text: text.into(),
            status,
        }
    }

    pub fn ok(text: impl Into<String>) -> Self {
        Self::with_status(text, ToolStatus::Ok)
    }

    pub fn empty(text: impl Into<String>) -> Self {
        Self::with_status(text, ToolStatus::Empty)
    }

    pub fn unavailable(text: impl Into<String>) -> Self {
        Self::with_status(text, ToolStatus::Unavailable)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::with_status(text, ToolStatus::Error)
    }
}

pub enum Tool {
    Graph(GraphQaChain),
    Tabular(TabularSearch),
    Vector(VectorSearch),
}

impl Tool {
    pub fn kind(&self) -> ToolKind {
        match self {
            Tool::Graph(_) => ToolKind::Graph,
            Tool::Tabular(_) => ToolKind::Tabular,
            Tool::Vector(_) => ToolKind::Vector,
        }
    }

    /// Never fails: adapter errors come back as tagged text.
    pub async fn invoke(&self, input: &str) -> ToolOutput {
        match self {
            Tool::Graph(chain) => chain.ask(input).await.to_tool_output(),
            Tool::Tabular(search) => TabularSearch::render(&search.search(input).await),
            Tool::Vector(search) => VectorSearch::render(&search.search(input).await),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool {0} is already registered")]
    Duplicate(String),
}

pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub tool: Tool,
}

/// Fixed at startup; registration order is kept.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor, tool: Tool) -> Result<(), RegistryError> {
        if self.get(&descriptor.name).is_some() {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        info!(
            target: "cinegraph::tools",
            tool = %descriptor.name,
            kind = %tool.kind(),
            "Registered tool"
        );
        self.tools.push(RegisteredTool { descriptor, tool });
        Ok(())
    }

    /// Registers under the default name/description for the tool's kind.
    pub fn register_default(&mut self, tool: Tool) -> Result<(), RegistryError> {
        let descriptor = match tool.kind() {
            ToolKind::Graph => ToolDescriptor::new(GRAPH_TOOL, GRAPH_TOOL_DESCRIPTION),
            ToolKind::Tabular => ToolDescriptor::new(TABULAR_TOOL, TABULAR_TOOL_DESCRIPTION),
            ToolKind::Vector => ToolDescriptor::new(VECTOR_TOOL, VECTOR_TOOL_DESCRIPTION),
        };
        self.register(descriptor, tool)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.descriptor.name == name)
    }

    pub fn first_of_kind(&self, kind: ToolKind) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.tool.kind() == kind)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors ordered by `priority`; kinds not listed follow in registration order.
    pub fn descriptors(&self, priority: &[ToolKind]) -> Vec<ToolDescriptor> {
        let rank = |kind: ToolKind| {
            priority
                .iter()
                .position(|k| *k == kind)
                .unwrap_or(priority.len())
        };
        let mut ordered: Vec<&RegisteredTool> = self.tools.iter().collect();
        ordered.sort_by_key(|t| rank(t.tool.kind()));
        ordered.into_iter().map(|t| t.descriptor.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_orders_by_priority_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("s.csv");
        let mut registry = ToolRegistry::new();
        registry
            .register_default(Tool::Tabular(TabularSearch::new(&csv)))
            .unwrap();
        let err = registry
            .register_default(Tool::Tabular(TabularSearch::new(&csv)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == TABULAR_TOOL));

        registry
            .register(
                ToolDescriptor::new("SentimentB", "second csv"),
                Tool::Tabular(TabularSearch::new(&csv)),
            )
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.first_of_kind(ToolKind::Tabular).map(|t| t.descriptor.name.as_str()),
            Some(TABULAR_TOOL)
        );
        assert!(registry.first_of_kind(ToolKind::Graph).is_none());
        let names: Vec<String> = registry
            .descriptors(&[ToolKind::Graph, ToolKind::Tabular])
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec![TABULAR_TOOL.to_string(), "SentimentB".to_string()]);
    }

    #[test]
    fn kinds_parse_from_config_names() {
        assert_eq!("Graph".parse::<ToolKind>(), Ok(ToolKind::Graph));
        assert_eq!("csv".parse::<ToolKind>(), Ok(ToolKind::Tabular));
        assert!("web".parse::<ToolKind>().is_err());
    }

    #[tokio::test]
    async fn tabular_tool_invocation_relays_missing_file() {
        let tool = Tool::Tabular(TabularSearch::new("/missing/sentiment.csv"));
        let output = tool.invoke("joy").await;
        assert_eq!(output.status, ToolStatus::Unavailable);
        assert!(output.text.contains("/missing/sentiment.csv"));
    }
}
