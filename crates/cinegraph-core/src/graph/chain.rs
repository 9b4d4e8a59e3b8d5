//! Graph question answering: schema -> translate -> execute -> (optional) phrase the answer.

use super::executor::GraphQueryExecutor;
use super::translator::{CypherTranslator, Translation};
use super::{FailureCategory, GraphStore, QueryResult, Row, SchemaSnapshot};
use crate::answer::strip_reasoning;
use crate::conversation::Message;
use crate::llm::{ChatModel, ChatRequest};
use crate::prompts::{graph_qa_user_prompt, GRAPH_QA_SYSTEM};
use crate::tools::{ToolOutput, ToolStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Rows passed to the summariser or rendered raw.
const DEFAULT_MAX_CONTEXT_ROWS: usize = 50;

pub const NO_GRAPH_DATA: &str = "[Graph] No relevant data found in the graph for this question.";

/// Schema snapshot cached for `ttl`; a zero TTL fetches on every call.
pub struct SchemaCache {
    ttl: Duration,
    slot: RwLock<Option<(Instant, SchemaSnapshot)>>,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn get_or_fetch(
        &self,
        store: &dyn GraphStore,
    ) -> Result<SchemaSnapshot, super::GraphError> {
        if !self.ttl.is_zero() {
            if let Some((at, schema)) = self.slot.read().await.as_ref() {
                if at.elapsed() < self.ttl {
                    return Ok(schema.clone());
                }
            }
        }
        let schema = store.schema().await?;
        if !self.ttl.is_zero() {
            *self.slot.write().await = Some((Instant::now(), schema.clone()));
        }
        Ok(schema)
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphQaOutcome {
    Answered {
        query: String,
        rows: Vec<Row>,
        answer: Option<String>,
    },
    Empty {
        query: String,
    },
    Untranslatable(String),
    SchemaUnavailable(String),
    Failed {
        query: String,
        category: FailureCategory,
        message: String,
    },
}

impl GraphQaOutcome {
    /// Text handed back to the router.
    pub fn to_tool_output(&self) -> ToolOutput {
        match self {
            GraphQaOutcome::Answered {
                answer: Some(answer),
                ..
            } => ToolOutput::ok(answer.clone()),
            GraphQaOutcome::Answered { query, rows, .. } => {
                ToolOutput::ok(render_rows(query, rows, DEFAULT_MAX_CONTEXT_ROWS))
            }
            GraphQaOutcome::Empty { .. } => ToolOutput::empty(NO_GRAPH_DATA),
            GraphQaOutcome::Untranslatable(reason) => ToolOutput::empty(format!(
                "[Graph] Could not determine a query for this question ({}).",
                reason
            )),
            GraphQaOutcome::SchemaUnavailable(message) => {
                ToolOutput::unavailable(format!("[Graph tool error] Unavailable: {}", message))
            }
            GraphQaOutcome::Failed {
                category, message, ..
            } => {
                let text = format!("[Graph tool error] {}: {}", category, message);
                match category {
                    FailureCategory::Unavailable | FailureCategory::Timeout => {
                        ToolOutput::unavailable(text)
                    }
                    _ => ToolOutput::error(text),
                }
            }
        }
    }
}

fn rows_json(rows: &[Row], limit: usize) -> String {
    rows.iter()
        .take(limit)
        .map(|r| serde_json::Value::Object(r.clone()).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_rows(query: &str, rows: &[Row], limit: usize) -> String {
    let mut text = format!(
        "Cypher: {}\nResults ({} rows):\n{}",
        query,
        rows.len(),
        rows_json(rows, limit)
    );
    if rows.len() > limit {
        text.push_str(&format!("\n… {} more rows omitted", rows.len() - limit));
    }
    text
}

pub struct GraphQaChain {
    store: Arc<dyn GraphStore>,
    translator: CypherTranslator,
    executor: GraphQueryExecutor,
    summarizer: Option<Arc<dyn ChatModel>>,
    schema_cache: SchemaCache,
    max_context_rows: usize,
}

impl GraphQaChain {
    pub fn new(
        store: Arc<dyn GraphStore>,
        translator: CypherTranslator,
        query_timeout: Duration,
    ) -> Self {
        Self {
            executor: GraphQueryExecutor::new(store.clone(), query_timeout),
            store,
            translator,
            summarizer: None,
            schema_cache: SchemaCache::new(Duration::ZERO),
            max_context_rows: DEFAULT_MAX_CONTEXT_ROWS,
        }
    }

    /// Phrase answers from rows with `model` instead of returning raw rows.
    pub fn with_summarizer(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.summarizer = Some(model);
        self
    }

    pub fn with_schema_ttl(mut self, ttl: Duration) -> Self {
        self.schema_cache = SchemaCache::new(ttl);
        self
    }

    pub fn with_max_context_rows(mut self, rows: usize) -> Self {
        self.max_context_rows = rows.max(1);
        self
    }

    pub async fn ask(&self, question: &str) -> GraphQaOutcome {
        let schema = match self.schema_cache.get_or_fetch(self.store.as_ref()).await {
            Ok(schema) => schema,
            Err(e) => {
                warn!(target: "cinegraph::graph", error = %e, "Schema fetch failed");
                return GraphQaOutcome::SchemaUnavailable(e.to_string());
            }
        };

        let query = match self.translator.translate(question, &schema).await {
            Translation::Query(q) => q,
            Translation::Untranslatable(reason) => {
                info!(target: "cinegraph::graph", %reason, "Question could not be translated");
                return GraphQaOutcome::Untranslatable(reason);
            }
        };

        match self.executor.execute(&query).await {
            QueryResult::Rows(rows) => {
                let answer = self.summarize(question, &rows).await;
                GraphQaOutcome::Answered {
                    query,
                    rows,
                    answer,
                }
            }
            QueryResult::Empty => GraphQaOutcome::Empty { query },
            QueryResult::Error { category, message } => {
                if category == FailureCategory::Syntax {
                    // Possibly generated against a stale schema.
                    self.schema_cache.invalidate().await;
                }
                GraphQaOutcome::Failed {
                    query,
                    category,
                    message,
                }
            }
        }
    }

    async fn summarize(&self, question: &str, rows: &[Row]) -> Option<String> {
        let model = self.summarizer.as_ref()?;
        let context = rows_json(rows, self.max_context_rows);
        let request = ChatRequest::new(vec![
            Message::system(GRAPH_QA_SYSTEM),
            Message::human(graph_qa_user_prompt(&context, question)),
        ])
        .with_temperature(0.0);

        match model.complete(request).await {
            Ok(reply) => {
                let text = strip_reasoning(&reply.content);
                if text.is_empty() {
                    None
                } else {
                    debug!(target: "cinegraph::graph", "Summarised {} rows", rows.len());
                    Some(text)
                }
            }
            Err(e) => {
                warn!(target: "cinegraph::graph", error = %e, "Answer summarisation failed; returning rows");
                None
            }
        }
    }
}
