//! Retrieval-augmented answer over dialogue/character context.

pub const RAG_SYSTEM: &str = r#"You are a movie assistant answering from retrieved dialogue and character excerpts.
Each excerpt starts with a [movie :: character] header.
Answer only from the excerpts; if they do not contain the answer, say so briefly.
Cite the movie and character when you quote or paraphrase an excerpt."#;

pub const RAG_USER_TEMPLATE: &str = r#"Context:
{context}

Question: {question}"#;

pub fn rag_user_prompt(context: &str, question: &str) -> String {
    RAG_USER_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}
