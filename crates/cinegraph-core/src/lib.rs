//! cinegraph-core: tool-routing agent over a movie knowledge graph.
//!
//! A question is routed by the model (optionally checked by a keyword guard) to one of three
//! tools: graph QA over Neo4j (schema-aware Cypher translation + read-only execution), keyword
//! search over a sentiment CSV, or vector search over dialogue embeddings. Conversation state
//! is kept per thread id. [`Pipeline::handle_turn`] is the entry point.

pub mod answer;
pub mod config;
pub mod conversation;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod router;
pub mod tools;

pub use answer::{extract, strip_reasoning, AgentOutput, NO_OUTPUT};
pub use config::{ConfigError, GatewayConfig};
pub use conversation::{
    Conversation, ConversationStore, InMemoryConversationStore, Message, Role,
    SledConversationStore, StoreError, ToolCall,
};
pub use graph::{
    CypherTranslator, FailureCategory, GraphError, GraphQaChain, GraphQueryExecutor, GraphStore,
    Neo4jHttpStore, QueryResult, Row, SchemaSnapshot, Translation,
};
pub use llm::{ChatModel, ChatRequest, Embedder, LlmError, ModelReply, OpenRouterClient, TextStream};
pub use pipeline::{BuildError, Feedback, Pipeline, TurnError, TurnReply};
pub use retrieval::{
    InMemoryVectorIndex, Record, RetrievalOutcome, TabularSearch, VectorIndex, VectorSearch,
    NO_RELEVANT_CONTEXT,
};
pub use router::{AgentLoop, DecisionTrace, RoutingMode, RoutingPolicy, TraceStep, TurnOutcome};
pub use tools::{Tool, ToolDescriptor, ToolKind, ToolOutput, ToolRegistry, ToolStatus};
