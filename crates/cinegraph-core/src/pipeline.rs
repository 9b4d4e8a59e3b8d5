//! Public entry point: one conversational turn end to end.
//!
//! load conversation -> (system instruction if new) + human message -> agent loop ->
//! answer extraction -> persist -> reply. Nothing is persisted when the turn fails.

use crate::answer::{extract, strip_reasoning, AgentOutput};
use crate::config::{ConversationBackend, GatewayConfig, VectorBackend};
use crate::conversation::{
    ConversationStore, InMemoryConversationStore, Message, SledConversationStore, StoreError,
};
use crate::graph::{CypherTranslator, GraphError, GraphQaChain, Neo4jHttpStore};
use crate::llm::{ChatModel, ChatRequest, Embedder, LlmError, OpenRouterClient, TextStream};
use crate::prompts::{feedback_user_prompt, rag_user_prompt, FEEDBACK_SYSTEM, RAG_SYSTEM};
use crate::retrieval::{
    ChromaIndex, InMemoryVectorIndex, TabularSearch, VectorError, VectorIndex, VectorSearch,
};
use crate::router::AgentLoop;
use crate::tools::{RegistryError, Tool, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Model(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no tools enabled (graph, tabular and vector are all disabled)")]
    NoTools,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub thread_id: String,
    pub answer: String,
    /// Tools invoked this turn, in order.
    pub tools_used: Vec<String>,
    pub exhausted: bool,
}

/// A rating of a previous answer.
#[derive(Debug, Clone, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub bot_message: String,
    /// `up` or `down`.
    #[serde(default = "default_rating")]
    pub feedback: String,
}

fn default_rating() -> String {
    "down".to_string()
}

pub struct Pipeline {
    agent: AgentLoop,
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn ChatModel>,
    vector: Option<Arc<VectorSearch>>,
    system_instruction: String,
    default_thread: String,
}

impl Pipeline {
    pub fn new(agent: AgentLoop, store: Arc<dyn ConversationStore>, model: Arc<dyn ChatModel>) -> Self {
        let system_instruction = agent.system_instruction();
        Self {
            agent,
            store,
            model,
            vector: None,
            system_instruction,
            default_thread: "default-thread".to_string(),
        }
    }

    /// Context source for [`Pipeline::stream_answer`].
    pub fn with_vector_search(mut self, vector: Arc<VectorSearch>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_default_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.default_thread = thread_id.into();
        self
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.agent.descriptors().into_iter().map(|d| d.name).collect()
    }

    fn thread<'a>(&'a self, thread_id: Option<&'a str>) -> &'a str {
        thread_id
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.default_thread)
    }

    /// Answers `question` on `thread_id` (default thread when `None`).
    pub async fn handle_turn(
        &self,
        thread_id: Option<&str>,
        question: &str,
    ) -> Result<TurnReply, TurnError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TurnError::EmptyQuestion);
        }
        self.run_turn(self.thread(thread_id), None, question, question)
            .await
    }

    /// Retries a rated answer on the same thread with the feedback prompt.
    pub async fn refine(
        &self,
        thread_id: Option<&str>,
        feedback: &Feedback,
    ) -> Result<TurnReply, TurnError> {
        let original = feedback.user_message.trim();
        if original.is_empty() {
            return Err(TurnError::EmptyQuestion);
        }
        info!(
            target: "cinegraph::pipeline",
            rating = %feedback.feedback,
            "Refining answer after feedback"
        );
        let prompt = feedback_user_prompt(original, &feedback.bot_message, &feedback.feedback);
        self.run_turn(self.thread(thread_id), Some(FEEDBACK_SYSTEM), &prompt, original)
            .await
    }

    /// `prompt` is the human message; `routing_question` drives the guard and tool input.
    async fn run_turn(
        &self,
        thread_id: &str,
        extra_system: Option<&str>,
        prompt: &str,
        routing_question: &str,
    ) -> Result<TurnReply, TurnError> {
        let conversation = self.store.load(thread_id)?;

        let mut pending = Vec::new();
        if conversation.is_empty() {
            pending.push(Message::system(self.system_instruction.as_str()));
        }
        if let Some(system) = extra_system {
            pending.push(Message::system(system));
        }
        pending.push(Message::human(prompt));

        let mut history = conversation.messages;
        history.extend(pending.iter().cloned());

        let outcome = match self.agent.run(&history, routing_question).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(target: "cinegraph::pipeline", thread_id, error = %e, "Turn failed");
                return Err(e.into());
            }
        };

        history.extend(outcome.messages.iter().cloned());
        let answer = strip_reasoning(&extract(&AgentOutput::from_messages(history)));

        pending.extend(outcome.messages);
        self.store.append_all(thread_id, pending)?;

        let tools_used = outcome.trace.tools_used();
        info!(
            target: "cinegraph::pipeline",
            thread_id,
            tools = ?tools_used,
            exhausted = outcome.exhausted,
            "Turn complete"
        );
        Ok(TurnReply {
            thread_id: thread_id.to_string(),
            answer,
            tools_used,
            exhausted: outcome.exhausted,
        })
    }

    /// Streams an answer grounded in vector context. Not recorded in any conversation.
    pub async fn stream_answer(&self, question: &str) -> Result<TextStream, TurnError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TurnError::EmptyQuestion);
        }
        let context = match &self.vector {
            Some(vector) => VectorSearch::render(&vector.search(question).await).text,
            None => crate::retrieval::NO_RELEVANT_CONTEXT.to_string(),
        };
        let request = ChatRequest::new(vec![
            Message::system(RAG_SYSTEM),
            Message::human(rag_user_prompt(&context, question)),
        ]);
        Ok(self.model.stream(request).await?)
    }

    /// Wires every component from configuration.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self, BuildError> {
        let client = Arc::new(OpenRouterClient::new(&cfg.llm)?);
        let model: Arc<dyn ChatModel> = client.clone();
        let max_tokens = Some(cfg.llm.max_tokens).filter(|t| *t > 0);

        let mut registry = ToolRegistry::new();

        if cfg.graph.enabled {
            let store = Arc::new(Neo4jHttpStore::new(&cfg.graph)?);
            let translator = CypherTranslator::new(model.clone()).with_max_tokens(max_tokens);
            let mut chain = GraphQaChain::new(
                store,
                translator,
                Duration::from_secs(cfg.graph.query_timeout_secs),
            )
            .with_schema_ttl(Duration::from_secs(cfg.graph.schema_ttl_secs))
            .with_max_context_rows(cfg.graph.max_context_rows);
            if cfg.graph.summarize {
                chain = chain.with_summarizer(model.clone());
            }
            registry.register_default(Tool::Graph(chain))?;
        }

        if cfg.tabular.enabled {
            let search = TabularSearch::new(cfg.tabular.path.clone())
                .with_per_column_cap(cfg.tabular.per_column_cap);
            registry.register_default(Tool::Tabular(search))?;
        }

        let mut vector_search = None;
        if cfg.vector.enabled {
            let index: Arc<dyn VectorIndex> = match cfg.vector.backend {
                VectorBackend::Chroma => Arc::new(ChromaIndex::new(&cfg.vector)?),
                VectorBackend::Memory => Arc::new(InMemoryVectorIndex::new(cfg.vector.dimension)),
            };
            let embedder: Arc<dyn Embedder> = client.clone();
            registry.register_default(Tool::Vector(VectorSearch::new(
                embedder.clone(),
                index.clone(),
                cfg.vector.top_k,
            )))?;
            vector_search = Some(Arc::new(VectorSearch::new(embedder, index, cfg.vector.top_k)));
        }

        if registry.is_empty() {
            return Err(BuildError::NoTools);
        }

        let store: Arc<dyn ConversationStore> = match cfg.conversation.backend {
            ConversationBackend::Memory => Arc::new(InMemoryConversationStore::new()),
            ConversationBackend::Sled => {
                Arc::new(SledConversationStore::open_path(&cfg.conversation.path)?)
            }
        };

        let agent = AgentLoop::new(model.clone(), Arc::new(registry))
            .with_policy(cfg.agent.policy())
            .with_max_tool_calls(cfg.agent.max_tool_calls)
            .with_temperature(Some(cfg.agent.temperature))
            .with_max_tokens(max_tokens);

        info!(
            target: "cinegraph::pipeline",
            model = %client.model(),
            routing = ?cfg.agent.routing_mode,
            max_tool_calls = cfg.agent.max_tool_calls,
            "Pipeline ready"
        );

        let mut pipeline = Pipeline::new(agent, store, model)
            .with_default_thread(cfg.conversation.default_thread.clone());
        if let Some(vector) = vector_search {
            pipeline = pipeline.with_vector_search(vector);
        }
        Ok(pipeline)
    }
}
