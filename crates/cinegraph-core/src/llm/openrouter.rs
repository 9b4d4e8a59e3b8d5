//! OpenRouter (OpenAI-compatible) client: chat completions with tools, embeddings, SSE streaming.
//!
//! API key: `llm.api_key` or `OPENROUTER_API_KEY`. Default model: `meta-llama/llama-3.3-70b-instruct`.

use super::{ChatModel, ChatRequest, Embedder, LlmError, ModelReply, TextStream};
use crate::config::LlmConfig;
use crate::conversation::{Message, Role, ToolCall};
use serde::de::DeserializeOwned;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RETRY_BASE_MS: u64 = 500;

// OpenAI-compatible request/response bodies
#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// Normally a JSON-encoded string; some providers send an object.
    #[serde(default)]
    arguments: serde_json::Value,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolSpec,
}

#[derive(Serialize)]
struct WireToolSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsData>,
}

#[derive(Deserialize)]
struct EmbeddingsData {
    embedding: Vec<f32>,
}

/// Streaming chunk (SSE `data:` payload).
#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Skip),
        Err(e) => {
            debug!(target: "cinegraph::llm", "Failed to parse SSE chunk: {} - data: {}", e, data);
            SseLine::Skip
        }
    }
}

/// Appended to a stream whose transport failed before `[DONE]`.
pub const STREAM_INTERRUPTED: &str = "\n[stream interrupted]";

/// Forwards SSE deltas from a byte stream into `tx`.
///
/// Bytes are buffered until a full line is available, so multi-byte characters split across
/// network chunks decode intact.
async fn forward_sse<S, B, E>(bytes: S, tx: mpsc::Sender<String>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures_util::pin_mut!(bytes);
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(target: "cinegraph::llm", error = %e, "SSE stream interrupted");
                let _ = tx.send(STREAM_INTERRUPTED.to_string()).await;
                return;
            }
        };
        pending.extend_from_slice(chunk.as_ref());

        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=newline).collect();
            match parse_sse_line(&String::from_utf8_lossy(&line)) {
                SseLine::Delta(text) => {
                    if tx.send(text).await.is_err() {
                        // Consumer cancelled.
                        return;
                    }
                }
                SseLine::Done => return,
                SseLine::Skip => {}
            }
        }
    }

    if let SseLine::Delta(text) = parse_sse_line(&String::from_utf8_lossy(&pending)) {
        let _ = tx.send(text).await;
    }
}


fn to_wire(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::System => "system",
        Role::Human => "user",
        Role::Ai => "assistant",
        Role::Tool => "tool",
    };
    let content = if message.content.is_empty() && message.is_tool_request() {
        None
    } else {
        Some(message.content.clone())
    };
    WireMessage {
        role: role.to_string(),
        content,
        tool_calls: message
            .tool_calls
            .iter()
            .map(|c| WireToolCall {
                id: c.id.clone(),
                kind: function_kind(),
                function: WireFunction {
                    name: c.name.clone(),
                    arguments: serde_json::Value::String(c.arguments.clone()),
                },
            })
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn from_wire(message: WireMessage) -> ModelReply {
    let tool_calls = message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(i, c)| ToolCall {
            id: if c.id.is_empty() {
                format!("call_{}", i)
            } else {
                c.id
            },
            name: c.function.name,
            arguments: match c.function.arguments {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            },
        })
        .collect();
    ModelReply {
        content: message.content.unwrap_or_default(),
        tool_calls,
    }
}

/// Single text-in parameter shared by every tool.
fn tool_parameters() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "input": {
                "type": "string",
                "description": "The natural-language question or search text for this tool."
            }
        },
        "required": ["input"]
    })
}

/// OpenAI-compatible client. Explicitly constructed and shared via `Arc`.
pub struct OpenRouterClient {
    api_key: String,
    api_url: String,
    model: String,
    embeddings_model: String,
    max_tokens: Option<u32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let key = config
            .resolve_api_key()
            .ok_or(LlmError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_key: key,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embeddings_model: config.embeddings_model.clone(),
            max_tokens: Some(config.max_tokens).filter(|t| *t > 0),
            max_retries: config.max_retries,
            client,
        })
    }

    /// Set the model (e.g. `meta-llama/llama-3.3-70b-instruct`, `anthropic/claude-3.5-sonnet`).
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn wire_request<'a>(&'a self, request: &ChatRequest, stream: bool) -> WireRequest<'a> {
        let has_tools = !request.tools.is_empty();
        WireRequest {
            model: &self.model,
            messages: request.messages.iter().map(to_wire).collect(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireToolSpec {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: tool_parameters(),
                    },
                })
                .collect(),
            parallel_tool_calls: has_tools.then_some(false),
            temperature: request.temperature,
            max_tokens: request.max_tokens.or(self.max_tokens),
            stream: stream.then_some(true),
        }
    }

    async fn post_once<B, R>(&self, url: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "CineGraph-Gateway")
            .json(body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        res.json::<R>()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))
    }

    /// POST with up to `max_retries` extra attempts on transient failures (exponential backoff).
    async fn post_with_retry<B, R>(&self, url: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            match self.post_once(url, body).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = Duration::from_millis(RETRY_BASE_MS << attempt);
                    attempt += 1;
                    warn!(
                        target: "cinegraph::llm",
                        attempt,
                        error = %e,
                        "LLM call failed; retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenRouterClient {
    async fn complete(&self, request: ChatRequest) -> Result<ModelReply, LlmError> {
        let url = format!("{}/chat/completions", self.api_url);
        let body = self.wire_request(&request, false);
        debug!(
            target: "cinegraph::llm",
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Dispatching chat completion"
        );
        let parsed: WireResponse = self.post_with_retry(&url, &body).await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;
        Ok(from_wire(choice.message))
    }

    async fn stream(&self, request: ChatRequest) -> Result<TextStream, LlmError> {
        let url = format!("{}/chat/completions", self.api_url);
        let request = request.with_tools(Vec::new());
        let body = self.wire_request(&request, true);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "CineGraph-Gateway")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!(target: "cinegraph::llm", model = %self.model, "SSE stream established");

        let (tx, stream) = TextStream::channel();
        tokio::spawn(forward_sse(response.bytes_stream(), tx));

        Ok(stream)
    }
}

#[async_trait::async_trait]
impl Embedder for OpenRouterClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/embeddings", self.api_url);
        let body = EmbeddingsRequest {
            model: &self.embeddings_model,
            input: text,
        };
        let parsed: EmbeddingsResponse = self.post_with_retry(&url, &body).await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::Parse("embeddings response missing data[0].embedding".into()))
    }
}
