//! Integration test: full turns through `Pipeline` with a scripted model and stub sources.
//!
//! ## Scenarios
//! 1. Thread `t1`, "What genre is Inception?" -> graph tool -> row `{genre: "Sci-Fi"}` -> answer.
//! 2. Guarded routing sends a graph question to the graph tool even when the model answers
//!    directly; soft routing keeps the direct answer.
//! 3. Tabular search for "joy" against a missing CSV relays the unavailability message.
//! 4. Vector search on an empty collection yields exactly the no-context marker.
//! 5. Model failure fails the turn and persists nothing.

use cinegraph_core::graph::chain::NO_GRAPH_DATA;
use cinegraph_core::graph::{CypherTranslator, GraphError, GraphQaChain, GraphStore, Row, SchemaSnapshot};
use cinegraph_core::prompts::{CYPHER_SYSTEM, RAG_SYSTEM};
use cinegraph_core::retrieval::{InMemoryVectorIndex, TabularSearch, VectorSearch};
use cinegraph_core::tools::{GRAPH_TOOL, TABULAR_TOOL, VECTOR_TOOL};
use cinegraph_core::{
    AgentLoop, ChatModel, ChatRequest, ConversationStore, Embedder, Feedback,
    InMemoryConversationStore, LlmError, ModelReply, Pipeline, Role, RoutingMode, RoutingPolicy,
    SledConversationStore, Tool, ToolCall, ToolRegistry, TurnError, NO_RELEVANT_CONTEXT,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const INCEPTION_QUERY: &str =
    "MATCH (m:Movie {title: 'Inception'})-[:IN_GENRE]->(g:Genre) RETURN g.name AS genre";

struct MovieGraph {
    rows: Vec<Row>,
    runs: AtomicUsize,
}

#[async_trait::async_trait]
impl GraphStore for MovieGraph {
    async fn schema(&self) -> Result<SchemaSnapshot, GraphError> {
        Ok(SchemaSnapshot {
            node_labels: vec!["Movie".into(), "Genre".into(), "Person".into()],
            relationship_types: vec!["IN_GENRE".into(), "ACTED_IN".into()],
            property_keys: vec!["title".into(), "name".into()],
        })
    }

    async fn run(&self, query: &str) -> Result<Vec<Row>, GraphError> {
        assert_eq!(query, INCEPTION_QUERY);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.clone())
    }
}

struct NoEmbedding;

#[async_trait::async_trait]
impl Embedder for NoEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

/// What the scripted model does on a routing decision with no tool output yet.
#[derive(Clone, Copy)]
enum Decision {
    Call(&'static str),
    AnswerDirectly(&'static str),
    AlwaysCall(&'static str),
    /// Calls the tool, then replies with a reasoning block only.
    CallThenThink(&'static str),
    Fail,
}

/// Generates Cypher for translation prompts, echoes RAG prompts, relays the latest tool output
/// as the final answer, and otherwise follows `decision`.
struct ScriptedModel {
    decision: Decision,
    decisions: AtomicUsize,
}

impl ScriptedModel {
    fn new(decision: Decision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            decisions: AtomicUsize::new(0),
        })
    }
}

fn call_for(tool: &str, input: &str, n: usize) -> ToolCall {
    ToolCall {
        id: format!("call_{}", n),
        name: tool.to_string(),
        arguments: serde_json::json!({ "input": input }).to_string(),
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> Result<ModelReply, LlmError> {
        let system = request.messages.first().map(|m| m.content.as_str()).unwrap_or("");
        if system == CYPHER_SYSTEM {
            return Ok(ModelReply::text(format!(
                "<think>Movie and Genre are linked by IN_GENRE.</think>\n```cypher\n{}\n```",
                INCEPTION_QUERY
            )));
        }
        if system == RAG_SYSTEM {
            return Ok(ModelReply::text(request.messages[1].content.clone()));
        }
        if request.tools.is_empty() {
            return Ok(ModelReply::text("Budget spent; best effort answer."));
        }

        let last = request.messages.last().expect("non-empty request");
        let n = self.decisions.fetch_add(1, Ordering::SeqCst);
        match self.decision {
            Decision::Fail => Err(LlmError::Api {
                status: 401,
                body: "invalid key".into(),
            }),
            Decision::AlwaysCall(tool) => Ok(ModelReply::tool_call(call_for(tool, "joy", n))),
            Decision::CallThenThink(_) if last.role == Role::Tool => Ok(ModelReply::text(
                "<think>The rows already answer this.</think>",
            )),
            Decision::CallThenThink(tool) => {
                Ok(ModelReply::tool_call(call_for(tool, &last.content, n)))
            }
            _ if last.role == Role::Tool => Ok(ModelReply::text(last.content.clone())),
            Decision::Call(tool) => Ok(ModelReply::tool_call(call_for(tool, &last.content, n))),
            Decision::AnswerDirectly(text) => Ok(ModelReply::text(text)),
        }
    }
}

fn genre_rows() -> Vec<Row> {
    let mut row = Row::new();
    row.insert("genre".into(), "Sci-Fi".into());
    vec![row]
}

struct Fixture {
    pipeline: Pipeline,
    graph: Arc<MovieGraph>,
}

fn fixture(
    model: Arc<ScriptedModel>,
    graph_rows: Vec<Row>,
    csv: &Path,
    mode: RoutingMode,
    store: Arc<dyn ConversationStore>,
) -> Fixture {
    let model: Arc<dyn ChatModel> = model;
    let graph = Arc::new(MovieGraph {
        rows: graph_rows,
        runs: AtomicUsize::new(0),
    });
    let chain = GraphQaChain::new(
        graph.clone(),
        CypherTranslator::new(model.clone()),
        Duration::from_secs(1),
    );
    let vector = Arc::new(VectorSearch::new(
        Arc::new(NoEmbedding),
        Arc::new(InMemoryVectorIndex::new(3)),
        5,
    ));

    let mut registry = ToolRegistry::new();
    registry.register_default(Tool::Graph(chain)).unwrap();
    registry
        .register_default(Tool::Tabular(TabularSearch::new(csv)))
        .unwrap();
    registry
        .register_default(Tool::Vector(VectorSearch::new(
            Arc::new(NoEmbedding),
            Arc::new(InMemoryVectorIndex::new(3)),
            5,
        )))
        .unwrap();

    let agent = AgentLoop::new(model.clone(), Arc::new(registry)).with_policy(RoutingPolicy {
        mode,
        ..RoutingPolicy::default()
    });
    Fixture {
        pipeline: Pipeline::new(agent, store, model).with_vector_search(vector),
        graph,
    }
}

fn missing_csv() -> PathBuf {
    PathBuf::from("/nonexistent/processed_sentiment/character_sentiment.csv")
}

#[tokio::test]
async fn graph_question_answers_from_rows_and_persists_turn() {
    let store = Arc::new(InMemoryConversationStore::new());
    let fx = fixture(
        ScriptedModel::new(Decision::Call(GRAPH_TOOL)),
        genre_rows(),
        &missing_csv(),
        RoutingMode::Guarded,
        store.clone(),
    );

    let reply = fx
        .pipeline
        .handle_turn(Some("t1"), "What genre is Inception?")
        .await
        .unwrap();

    assert_eq!(reply.thread_id, "t1");
    assert!(reply.answer.contains("Sci-Fi"), "answer: {}", reply.answer);
    assert_eq!(reply.tools_used, vec![GRAPH_TOOL.to_string()]);
    assert!(!reply.exhausted);
    assert_eq!(fx.graph.runs.load(Ordering::SeqCst), 1);

    let conv = store.load("t1").unwrap();
    let roles: Vec<Role> = conv.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::Human, Role::Ai, Role::Tool, Role::Ai]
    );
    assert_eq!(conv.messages[0].content, fx.pipeline.system_instruction());
    assert_eq!(conv.messages[3].tool_name.as_deref(), Some(GRAPH_TOOL));

    // Second turn: system instruction is not repeated.
    fx.pipeline
        .handle_turn(Some("t1"), "What genre is Inception?")
        .await
        .unwrap();
    let conv = store.load("t1").unwrap();
    assert_eq!(conv.len(), 9);
    assert_eq!(
        conv.messages.iter().filter(|m| m.role == Role::System).count(),
        1
    );
}

#[tokio::test]
async fn empty_graph_result_is_stated() {
    let fx = fixture(
        ScriptedModel::new(Decision::Call(GRAPH_TOOL)),
        Vec::new(),
        &missing_csv(),
        RoutingMode::Guarded,
        Arc::new(InMemoryConversationStore::new()),
    );
    let reply = fx
        .pipeline
        .handle_turn(None, "What genre is Inception?")
        .await
        .unwrap();
    assert_eq!(reply.thread_id, "default-thread");
    assert_eq!(reply.answer, NO_GRAPH_DATA);
}

#[tokio::test]
async fn reasoning_only_final_reply_still_answers_from_tool_output() {
    let store = Arc::new(InMemoryConversationStore::new());
    let fx = fixture(
        ScriptedModel::new(Decision::CallThenThink(GRAPH_TOOL)),
        genre_rows(),
        &missing_csv(),
        RoutingMode::Guarded,
        store.clone(),
    );
    let reply = fx
        .pipeline
        .handle_turn(Some("t-think"), "What genre is Inception?")
        .await
        .unwrap();

    assert!(!reply.answer.is_empty());
    assert!(reply.answer.contains("Sci-Fi"), "answer: {}", reply.answer);
    assert_eq!(reply.tools_used, vec![GRAPH_TOOL.to_string()]);
    let conv = store.load("t-think").unwrap();
    assert!(!conv.messages.last().unwrap().content.contains("<think>"));
}

#[tokio::test]
async fn guarded_routing_overrides_direct_answer_soft_does_not() {
    let question = "What genre is Inception?";

    let guarded = fixture(
        ScriptedModel::new(Decision::AnswerDirectly("I believe it is a drama.")),
        genre_rows(),
        &missing_csv(),
        RoutingMode::Guarded,
        Arc::new(InMemoryConversationStore::new()),
    );
    let reply = guarded.pipeline.handle_turn(None, question).await.unwrap();
    assert_eq!(reply.tools_used, vec![GRAPH_TOOL.to_string()]);
    assert!(reply.answer.contains("Sci-Fi"));

    let soft = fixture(
        ScriptedModel::new(Decision::AnswerDirectly("I believe it is a drama.")),
        genre_rows(),
        &missing_csv(),
        RoutingMode::Soft,
        Arc::new(InMemoryConversationStore::new()),
    );
    let reply = soft.pipeline.handle_turn(None, question).await.unwrap();
    assert!(reply.tools_used.is_empty());
    assert_eq!(reply.answer, "I believe it is a drama.");
    assert_eq!(soft.graph.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_csv_is_relayed_with_path() {
    let csv = missing_csv();
    let fx = fixture(
        ScriptedModel::new(Decision::Call(TABULAR_TOOL)),
        Vec::new(),
        &csv,
        RoutingMode::Guarded,
        Arc::new(InMemoryConversationStore::new()),
    );
    let reply = fx.pipeline.handle_turn(Some("csv"), "joy").await.unwrap();
    assert_eq!(reply.tools_used, vec![TABULAR_TOOL.to_string()]);
    assert!(reply.answer.contains(&csv.display().to_string()));
    assert!(reply.answer.starts_with("[CSV tool error] File not found:"));
}

#[tokio::test]
async fn empty_vector_collection_yields_marker() {
    let fx = fixture(
        ScriptedModel::new(Decision::Call(VECTOR_TOOL)),
        Vec::new(),
        &missing_csv(),
        RoutingMode::Soft,
        Arc::new(InMemoryConversationStore::new()),
    );
    let reply = fx
        .pipeline
        .handle_turn(None, "What did Cobb say about dreams?")
        .await
        .unwrap();
    assert_eq!(reply.answer, NO_RELEVANT_CONTEXT);
}

#[tokio::test]
async fn loop_bound_forces_final_answer() {
    let model = ScriptedModel::new(Decision::AlwaysCall(TABULAR_TOOL));
    let fx = fixture(
        model.clone(),
        Vec::new(),
        &missing_csv(),
        RoutingMode::Soft,
        Arc::new(InMemoryConversationStore::new()),
    );
    let reply = fx.pipeline.handle_turn(None, "joy").await.unwrap();
    assert!(reply.exhausted);
    assert_eq!(reply.tools_used.len(), cinegraph_core::router::DEFAULT_MAX_TOOL_CALLS);
    assert_eq!(reply.answer, "Budget spent; best effort answer.");
    assert_eq!(
        model.decisions.load(Ordering::SeqCst),
        cinegraph_core::router::DEFAULT_MAX_TOOL_CALLS
    );
}

#[tokio::test]
async fn model_failure_persists_nothing() {
    let store = Arc::new(InMemoryConversationStore::new());
    let fx = fixture(
        ScriptedModel::new(Decision::Fail),
        genre_rows(),
        &missing_csv(),
        RoutingMode::Guarded,
        store.clone(),
    );
    let err = fx
        .pipeline
        .handle_turn(Some("t9"), "What genre is Inception?")
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::Model(LlmError::Api { status: 401, .. })));
    assert!(store.load("t9").unwrap().is_empty());

    let err = fx.pipeline.handle_turn(Some("t9"), "   ").await.unwrap_err();
    assert!(matches!(err, TurnError::EmptyQuestion));
}

#[tokio::test]
async fn feedback_refines_on_same_thread() {
    let store = Arc::new(InMemoryConversationStore::new());
    let fx = fixture(
        ScriptedModel::new(Decision::AnswerDirectly("I am not sure.")),
        genre_rows(),
        &missing_csv(),
        RoutingMode::Guarded,
        store.clone(),
    );
    let feedback = Feedback {
        user_message: "What genre is Inception?".into(),
        bot_message: "I am not sure.".into(),
        feedback: "down".into(),
    };
    let reply = fx.pipeline.refine(Some("fb"), &feedback).await.unwrap();
    // Guard routes on the original question, not on the retry prompt.
    assert_eq!(reply.tools_used, vec![GRAPH_TOOL.to_string()]);
    assert!(reply.answer.contains("Sci-Fi"));

    let conv = store.load("fb").unwrap();
    let human = conv
        .messages
        .iter()
        .find(|m| m.role == Role::Human)
        .unwrap();
    assert!(human.content.starts_with("The user originally asked: What genre is Inception?"));
    assert!(human.content.contains("The user rated the previous answer: down."));
}

#[tokio::test]
async fn stream_answer_uses_vector_context() {
    let fx = fixture(
        ScriptedModel::new(Decision::AnswerDirectly("unused")),
        Vec::new(),
        &missing_csv(),
        RoutingMode::Guarded,
        Arc::new(InMemoryConversationStore::new()),
    );
    let text = fx
        .pipeline
        .stream_answer("Who talks about dreams?")
        .await
        .unwrap()
        .collect()
        .await;
    assert!(text.contains(NO_RELEVANT_CONTEXT));
    assert!(text.contains("Question: Who talks about dreams?"));
}

#[tokio::test]
async fn sled_backed_threads_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conversations");
    {
        let store = Arc::new(SledConversationStore::open_path(&path).unwrap());
        let fx = fixture(
            ScriptedModel::new(Decision::Call(GRAPH_TOOL)),
            genre_rows(),
            &missing_csv(),
            RoutingMode::Guarded,
            store.clone(),
        );
        fx.pipeline
            .handle_turn(Some("t1"), "What genre is Inception?")
            .await
            .unwrap();
        store.flush().unwrap();
    }
    let store = SledConversationStore::open_path(&path).unwrap();
    let conv = store.load("t1").unwrap();
    assert_eq!(conv.len(), 5);
    assert!(conv.messages[4].content.contains("Sci-Fi"));
}
