//! Prompt templates for routing, Cypher generation, graph answers, feedback retries and RAG.

pub mod cypher;
pub mod feedback;
pub mod rag;
pub mod routing;

pub use cypher::{
    cypher_user_prompt, graph_qa_user_prompt, CYPHER_SYSTEM, CYPHER_USER_TEMPLATE,
    GRAPH_QA_SYSTEM, GRAPH_QA_USER_TEMPLATE,
};
pub use feedback::{feedback_user_prompt, FEEDBACK_SYSTEM, FEEDBACK_USER_TEMPLATE};
pub use rag::{rag_user_prompt, RAG_SYSTEM, RAG_USER_TEMPLATE};
pub use routing::{routing_system_instruction, EXHAUSTION_NOTE};
