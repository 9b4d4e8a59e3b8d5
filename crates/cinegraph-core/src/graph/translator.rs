//! Schema-aware natural language -> Cypher translation.

use super::SchemaSnapshot;
use crate::answer::strip_reasoning;
use crate::conversation::Message;
use crate::llm::{ChatModel, ChatRequest};
use crate::prompts::{cypher_user_prompt, CYPHER_SYSTEM};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").expect("fence pattern"));

static LABEL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:cypher(?:\s+query)?|query)\s*:\s*").expect("label pattern"));

const CLAUSES: [&str; 6] = ["MATCH", "OPTIONAL", "WITH", "UNWIND", "CALL", "RETURN"];

/// Query text, or the reason no query could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    Query(String),
    Untranslatable(String),
}

pub struct CypherTranslator {
    model: Arc<dyn ChatModel>,
    max_tokens: Option<u32>,
}

impl CypherTranslator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Generation faults and non-query replies come back as [`Translation::Untranslatable`].
    pub async fn translate(&self, question: &str, schema: &SchemaSnapshot) -> Translation {
        let question = question.trim();
        if question.is_empty() {
            return Translation::Untranslatable("empty question".into());
        }

        let request = ChatRequest::new(vec![
            Message::system(CYPHER_SYSTEM),
            Message::human(cypher_user_prompt(&schema.render(), question)),
        ])
        .with_temperature(0.0)
        .with_max_tokens(self.max_tokens);

        let reply = match self.model.complete(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(target: "cinegraph::graph", error = %e, "Cypher generation failed");
                return Translation::Untranslatable(format!("query generation failed: {}", e));
            }
        };

        match extract_query(&reply.content) {
            Some(query) => {
                debug!(target: "cinegraph::graph", %query, "Translated question to Cypher");
                Translation::Query(query)
            }
            None => {
                debug!(target: "cinegraph::graph", reply = %reply.content, "Model reply holds no Cypher");
                Translation::Untranslatable("model reply contains no Cypher query".into())
            }
        }
    }
}

/// Pattern and projection syntax that prose does not contain.
const CYPHER_MARKERS: [&str; 5] = ["->", "<-", "-[", "]-", " AS "];

/// Line opens with a clause keyword. Upper- or lower-case keywords always count; title case
/// ("Match", "Return") counts only when the rest reads as Cypher, so prose such as
/// "With the schema..." is skipped.
fn starts_with_clause(line: &str) -> bool {
    let word: String = line
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let rest = &line[word.len()..];
    let followed_ok = rest
        .chars()
        .next()
        .map_or(true, |c| c.is_whitespace() || c == '(' || c == '{');
    if !followed_ok || !CLAUSES.iter().any(|c| c.eq_ignore_ascii_case(&word)) {
        return false;
    }
    let single_case = word == word.to_ascii_uppercase() || word == word.to_ascii_lowercase();
    single_case || reads_as_cypher(rest)
}

fn reads_as_cypher(rest: &str) -> bool {
    let rest = rest.trim_start();
    let next: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    rest.is_empty()
        || next.starts_with(['(', '{', '*'])
        || next.contains(['.', '('])
        || CLAUSES.iter().any(|c| *c == next)
        || next == "DISTINCT"
        || CYPHER_MARKERS.iter().any(|m| rest.contains(m))
}

/// Pulls the bare query out of a model reply: drops `<think>` blocks, prefers the first fenced
/// block, skips `cypher:`/`query:` labels and leading prose, stops at the first blank line.
pub fn extract_query(raw: &str) -> Option<String> {
    let text = strip_reasoning(raw);
    let body = FENCED
        .captures(&text)
        .and_then(|c| c.get(1))
        .map_or(text.as_str(), |m| m.as_str());

    let mut lines: Vec<String> = Vec::new();
    for raw_line in body.lines() {
        let line = raw_line.trim();
        if lines.is_empty() {
            let unlabeled = LABEL_PREFIX.replace(line, "");
            let candidate = unlabeled.trim_matches('`').trim();
            if starts_with_clause(candidate) {
                lines.push(candidate.to_string());
            }
            continue;
        }
        if line.is_empty() || line.starts_with("```") {
            break;
        }
        lines.push(line.to_string());
    }

    let query = lines.join("\n");
    let query = query.trim().trim_end_matches(';').trim();
    (!query.is_empty()).then(|| query.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ModelReply};

    struct Fixed(Result<&'static str, ()>);

    #[async_trait::async_trait]
    impl ChatModel for Fixed {
        async fn complete(&self, request: ChatRequest) -> Result<ModelReply, LlmError> {
            assert_eq!(request.temperature, Some(0.0));
            assert!(request.tools.is_empty());
            match self.0 {
                Ok(text) => Ok(ModelReply::text(text)),
                Err(()) => Err(LlmError::EmptyResponse),
            }
        }
    }

    #[test]
    fn extracts_from_fenced_block_with_think() {
        let raw = "<think>The schema has Movie and Genre.</think>\nHere is the query:\n```cypher\nMATCH (m:Movie {title: 'Inception'})-[:IN_GENRE]->(g:Genre)\nRETURN g.name AS genre;\n```\nThis returns the genre.";
        assert_eq!(
            extract_query(raw).as_deref(),
            Some("MATCH (m:Movie {title: 'Inception'})-[:IN_GENRE]->(g:Genre)\nRETURN g.name AS genre")
        );
    }

    #[test]
    fn strips_label_and_trailing_prose() {
        let raw = "Cypher: MATCH (p:Person) RETURN p.name LIMIT 5\n\nThis lists five people.";
        assert_eq!(
            extract_query(raw).as_deref(),
            Some("MATCH (p:Person) RETURN p.name LIMIT 5")
        );
    }

    #[test]
    fn skips_leading_prose_starting_with_with() {
        let raw = "With the given schema, the answer is:\nMATCH (m:Movie) WITH m RETURN count(m)";
        assert_eq!(
            extract_query(raw).as_deref(),
            Some("MATCH (m:Movie) WITH m RETURN count(m)")
        );
    }

    #[test]
    fn title_case_clauses_are_accepted() {
        assert_eq!(
            extract_query("Match (m:Movie {title: 'Inception'}) Return m.genre").as_deref(),
            Some("Match (m:Movie {title: 'Inception'}) Return m.genre")
        );
        assert_eq!(
            extract_query("Return 1 AS one").as_deref(),
            Some("Return 1 AS one")
        );
        assert_eq!(
            extract_query("Optional MATCH (m)-[:IN_GENRE]->(g) RETURN g").as_deref(),
            Some("Optional MATCH (m)-[:IN_GENRE]->(g) RETURN g")
        );
        assert_eq!(extract_query("Match the movie to its genre first."), None);
    }

    #[test]
    fn refusal_is_not_a_query() {
        assert_eq!(extract_query("Something is wrong: the schema has no awards."), None);
        assert_eq!(extract_query("<think>hmm</think>"), None);
        assert_eq!(extract_query(""), None);
    }

    #[tokio::test]
    async fn translate_maps_failures_to_untranslatable() {
        let schema = SchemaSnapshot::default();

        let t = CypherTranslator::new(Arc::new(Fixed(Ok("MATCH (n) RETURN n LIMIT 1"))));
        assert_eq!(
            t.translate("anything", &schema).await,
            Translation::Query("MATCH (n) RETURN n LIMIT 1".into())
        );
        assert!(matches!(
            t.translate("   ", &schema).await,
            Translation::Untranslatable(_)
        ));

        let t = CypherTranslator::new(Arc::new(Fixed(Ok(""))));
        assert!(matches!(
            t.translate("q", &schema).await,
            Translation::Untranslatable(_)
        ));

        let t = CypherTranslator::new(Arc::new(Fixed(Err(()))));
        assert!(matches!(
            t.translate("q", &schema).await,
            Translation::Untranslatable(_)
        ));
    }
}
