//! Answer extraction from a finished agent run.

use crate::conversation::{Message, Role};
use once_cell::sync::Lazy;
use regex::Regex;

/// Literal returned when a run produced nothing at all.
pub const NO_OUTPUT: &str = "(no output)";

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think-block pattern"));

/// Result of one agent run: the messages it produced plus an optional explicit output field.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub messages: Vec<Message>,
    pub output: Option<String>,
}

impl AgentOutput {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            output: None,
        }
    }
}

/// Fallback order: last `ai` message, else last message of any role, else `output`
/// (only when there are no messages), else [`NO_OUTPUT`].
pub fn extract(result: &AgentOutput) -> String {
    if !result.messages.is_empty() {
        let last_ai = result.messages.iter().rev().find(|m| m.role == Role::Ai);
        return match last_ai {
            Some(m) => m.content.clone(),
            None => result
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
        };
    }
    result
        .output
        .clone()
        .unwrap_or_else(|| NO_OUTPUT.to_string())
}

/// Removes `<think>…</think>` reasoning blocks and trims.
pub fn strip_reasoning(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}
