//! Cypher generation and graph answer phrasing.

/// System instruction for query generation (temperature 0).
pub const CYPHER_SYSTEM: &str = r#"You are a Cypher Query Language expert working against a Neo4j movie graph.
Given a natural language question and the database schema, generate one safe and correct read-only Cypher query.

Rules:
- Use only the node labels, relationship types and property keys listed in the schema
- Never write to the graph (no CREATE, MERGE, DELETE, SET, REMOVE, DROP, LOAD CSV)
- Prefer case-insensitive matching for names and titles (toLower(...) CONTAINS toLower(...))
- Limit large result sets (LIMIT 25) unless the question asks for a count
- If the question cannot be answered from this schema, say that something is wrong instead of writing a query

Return only the Cypher query, nothing else."#;

/// User prompt: `{schema}` and `{question}` are replaced.
pub const CYPHER_USER_TEMPLATE: &str = r#"Schema:
{schema}

Question:
{question}

Cypher query:"#;

pub fn cypher_user_prompt(schema: &str, question: &str) -> String {
    CYPHER_USER_TEMPLATE
        .replace("{schema}", schema)
        .replace("{question}", question)
}

/// System instruction for phrasing an answer from query rows.
pub const GRAPH_QA_SYSTEM: &str = r#"You are an assistant that turns graph query results into a short, human answer.
The results are authoritative: never contradict them and never add facts that are not in them.
If the results do not answer the question, say that no relevant data was found.
Do not mention Cypher, queries or databases in the answer."#;

/// User prompt: `{context}` (one JSON row per line) and `{question}` are replaced.
pub const GRAPH_QA_USER_TEMPLATE: &str = r#"Results:
{context}

Question: {question}

Helpful answer:"#;

pub fn graph_qa_user_prompt(context: &str, question: &str) -> String {
    GRAPH_QA_USER_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}
