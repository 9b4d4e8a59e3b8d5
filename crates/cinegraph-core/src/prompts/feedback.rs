//! Retry prompt used when the user rates an answer.

pub const FEEDBACK_SYSTEM: &str = "You are an assistant that can use tools (graph, CSV and vector search). The user said the previous answer was not good; produce an improved, concise reply.";

pub const FEEDBACK_USER_TEMPLATE: &str = r#"The user originally asked: {user_message}

The assistant responded:
{bot_message}

The user rated the previous answer: {feedback}.

Produce an improved, concise and actionable answer. Use the graph, CSV or vector tools if necessary."#;

pub fn feedback_user_prompt(user_message: &str, bot_message: &str, feedback: &str) -> String {
    FEEDBACK_USER_TEMPLATE
        .replace("{user_message}", user_message)
        .replace("{bot_message}", bot_message)
        .replace("{feedback}", feedback)
}
