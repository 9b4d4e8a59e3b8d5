//! Language-model boundary: chat completion with tool calling, embeddings, streaming.
//!
//! Components receive an `Arc<dyn ChatModel>` / `Arc<dyn Embedder>` at construction time;
//! the shipped implementation is [`OpenRouterClient`] (any OpenAI-compatible endpoint).

mod openrouter;
mod stream;

pub use openrouter::OpenRouterClient;
pub use stream::TextStream;

use crate::conversation::{Message, ToolCall};
use crate::tools::ToolDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM response parse failed: {0}")]
    Parse(String),

    #[error("missing LLM API key (set OPENROUTER_API_KEY or llm.api_key)")]
    MissingApiKey,

    #[error("LLM returned no choices")]
    EmptyResponse,
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// One completion request. `tools` empty means the model must answer in text.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// What the model produced for one request: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![call],
        }
    }
}

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ModelReply, LlmError>;

    /// Streams the answer as text chunks. Default: one chunk holding the full completion.
    async fn stream(&self, request: ChatRequest) -> Result<TextStream, LlmError> {
        let reply = self.complete(request.with_tools(Vec::new())).await?;
        Ok(TextStream::from_text(reply.content))
    }
}

/// Sentence-embedding model with a fixed output dimension.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
