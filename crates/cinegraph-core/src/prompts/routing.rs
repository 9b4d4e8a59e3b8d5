//! Routing policy given to the agent as its first (system) message.

use crate::tools::ToolDescriptor;

const ROUTING_HEADER: &str = r#"You are an assistant connected to tools that help users find and analyse data about movies.

Important: Make sure to always follow the Rules."#;

const ROUTING_RULES: &str = r#"- NEVER answer domain questions from your own knowledge. Call the matching tool, read its output, then answer from it.
- Call at most one tool per step and pass the user's question (or a focused sub-question) as the tool input.
- If the tool result is empty, state clearly that no relevant data was found.
- If a tool reports an error or is unavailable, relay that plainly; do not invent an answer.
- Questions about yourself or how to use this assistant may be answered directly.
- Your job is not to answer general queries, only questions about this movie data. Politely decline anything else."#;

/// Appended when the tool budget is spent; the next reply must be final.
pub const EXHAUSTION_NOTE: &str = "The tool-call budget for this question is exhausted. Do not call any more tools. Answer now using only the tool outputs above; if they are insufficient, say so.";

/// Builds the system instruction. `tools` must already be in routing priority order.
pub fn routing_system_instruction(tools: &[ToolDescriptor]) -> String {
    let mut text = String::from(ROUTING_HEADER);
    text.push_str("\n\nTools:\n");
    for tool in tools {
        text.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    text.push_str("\nRULES:\n");
    text.push_str(ROUTING_RULES);
    if tools.len() > 1 {
        let order: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        text.push_str(&format!(
            "\n- When more than one tool could answer, prefer them in this order: {}.",
            order.join(", then ")
        ));
    }
    text
}
