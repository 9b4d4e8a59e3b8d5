//! Conversation state: ordered message history per thread id.
//!
//! Two backends share the [`ConversationStore`] contract:
//! - [`InMemoryConversationStore`]: DashMap only, process lifetime.
//! - [`SledConversationStore`]: long-term Sled tree with a DashMap hot cache (checked before Sled).
//!
//! Neither backend serializes concurrent turns on the same thread; callers keep at most one
//! in-flight turn per thread id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const CONVERSATION_TREE: &str = "conversations";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Ai => "ai",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id; tool messages answer it via `tool_call_id`.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Raw argument text as produced by the model (usually a JSON object).
    pub arguments: String,
}

/// One entry of a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on `ai` messages that request a tool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `tool` messages: the call this output answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `tool` messages: the tool that produced the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    /// An `ai` message that requests exactly one tool call.
    pub fn ai_tool_call(content: impl Into<String>, call: ToolCall) -> Self {
        let mut msg = Self::new(Role::Ai, content);
        msg.tool_calls.push(call);
        msg
    }

    /// A `tool` message carrying the output for `call`.
    pub fn tool(call: &ToolCall, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(call.id.clone());
        msg.tool_name = Some(call.name.clone());
        msg
    }

    pub fn is_tool_request(&self) -> bool {
        self.role == Role::Ai && !self.tool_calls.is_empty()
    }
}

/// Ordered history for one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub thread_id: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation storage: {0}")]
    Sled(#[from] sled::Error),

    #[error("conversation codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid thread id {0:?}")]
    InvalidThreadId(String),
}

/// Load/append contract used by the pipeline.
pub trait ConversationStore: Send + Sync {
    /// Returns the conversation for `thread_id`, creating an empty one if absent.
    fn load(&self, thread_id: &str) -> Result<Conversation, StoreError>;

    /// Appends one message at the end of the thread.
    fn append(&self, thread_id: &str, message: Message) -> Result<(), StoreError>;

    /// Appends messages in order.
    fn append_all(&self, thread_id: &str, messages: Vec<Message>) -> Result<(), StoreError> {
        for message in messages {
            self.append(thread_id, message)?;
        }
        Ok(())
    }
}

/// Process-lifetime store.
#[derive(Default)]
pub struct InMemoryConversationStore {
    threads: DashMap<String, Vec<Message>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads referenced so far.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn load(&self, thread_id: &str) -> Result<Conversation, StoreError> {
        let entry = self.threads.entry(thread_id.to_string()).or_default();
        Ok(Conversation {
            thread_id: thread_id.to_string(),
            messages: entry.value().clone(),
        })
    }

    fn append(&self, thread_id: &str, message: Message) -> Result<(), StoreError> {
        self.threads
            .entry(thread_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }
}

/// Sled-backed store. Key: `thread_id 0x00 seq(u64 BE)`, value: JSON message.
pub struct SledConversationStore {
    tree: sled::Tree,
    /// Hot cache: thread id -> messages. Checked before Sled.
    cache: Arc<DashMap<String, Vec<Message>>>,
}

impl SledConversationStore {
    /// Opens or creates the Sled database at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(CONVERSATION_TREE)?;
        Ok(Self {
            tree,
            cache: Arc::new(DashMap::new()),
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush()?;
        Ok(())
    }

    fn prefix(thread_id: &str) -> Result<Vec<u8>, StoreError> {
        if thread_id.as_bytes().contains(&0) {
            return Err(StoreError::InvalidThreadId(thread_id.to_string()));
        }
        let mut prefix = thread_id.as_bytes().to_vec();
        prefix.push(0);
        Ok(prefix)
    }

    fn read_thread(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        let prefix = Self::prefix(thread_id)?;
        let mut messages = Vec::new();
        for item in self.tree.scan_prefix(&prefix) {
            let (_, value) = item?;
            messages.push(serde_json::from_slice::<Message>(&value)?);
        }
        Ok(messages)
    }

    fn cached(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        if let Some(hit) = self.cache.get(thread_id) {
            return Ok(hit.clone());
        }
        let messages = self.read_thread(thread_id)?;
        self.cache.insert(thread_id.to_string(), messages.clone());
        Ok(messages)
    }
}

impl ConversationStore for SledConversationStore {
    fn load(&self, thread_id: &str) -> Result<Conversation, StoreError> {
        Ok(Conversation {
            thread_id: thread_id.to_string(),
            messages: self.cached(thread_id)?,
        })
    }

    fn append(&self, thread_id: &str, message: Message) -> Result<(), StoreError> {
        let seq = self.cached(thread_id)?.len() as u64;
        let mut key = Self::prefix(thread_id)?;
        key.extend_from_slice(&seq.to_be_bytes());
        let value = serde_json::to_vec(&message)?;
        self.tree.insert(key, value)?;
        self.cache
            .entry(thread_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }
}
