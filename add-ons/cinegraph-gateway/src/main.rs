//! CineGraph Gateway: thin HTTP surface over `cinegraph_core::Pipeline`.
//!
//! Routes: `GET /health`, `POST /chat`, `POST /feedback`, `POST /rag` (streamed text).
//! `--print-config` prints the effective configuration (secrets masked) and exits.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cinegraph_core::{Feedback, GatewayConfig, Pipeline, TurnError, TurnReply};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct AppState {
    pipeline: Pipeline,
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Deserialize)]
struct FeedbackRequest {
    #[serde(flatten)]
    feedback: Feedback,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Deserialize)]
struct RagRequest {
    #[serde(default)]
    question: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = dotenv {
        tracing::debug!("No .env loaded: {}", e);
    }

    let config = GatewayConfig::load()?;

    if std::env::args().any(|a| a == "--print-config") {
        println!("{}", config.to_toml_redacted()?);
        return Ok(());
    }

    let pipeline = Pipeline::from_config(&config)?;
    tracing::info!(
        "[CINEGRAPH] Tools online: {}",
        pipeline.tool_names().join(", ")
    );

    let state = Arc::new(AppState { pipeline });

    let app = Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .route("/feedback", post(feedback_handler))
        .route("/rag", post(rag_handler))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_requests));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("[CINEGRAPH] Gateway listening on {}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::info!(%method, %path, status = response.status().as_u16(), "request");
    response
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "tools": state.pipeline.tool_names() }))
}

fn error_response(err: TurnError) -> Response {
    let status = match err {
        TurnError::EmptyQuestion => StatusCode::BAD_REQUEST,
        TurnError::Model(_) | TurnError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("[CINEGRAPH] Request failed: {}", err);
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn answer_response(reply: TurnReply) -> Response {
    Json(json!({
        "answer": reply.answer,
        "thread_id": reply.thread_id,
        "tools_used": reply.tools_used,
    }))
    .into_response()
}

/// POST /chat: `{message, thread_id?}` -> `{answer}` or `{error}`.
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    match state
        .pipeline
        .handle_turn(req.thread_id.as_deref(), &req.message)
        .await
    {
        Ok(reply) => answer_response(reply),
        Err(e) => error_response(e),
    }
}

/// POST /feedback: `{user_message, bot_message, feedback, thread_id?}` -> improved `{answer}`.
async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackRequest>,
) -> Response {
    tracing::info!(
        "[FEEDBACK] user_message={:?} feedback={:?}",
        req.feedback.user_message.chars().take(80).collect::<String>(),
        req.feedback.feedback
    );
    match state
        .pipeline
        .refine(req.thread_id.as_deref(), &req.feedback)
        .await
    {
        Ok(reply) => answer_response(reply),
        Err(e) => error_response(e),
    }
}

/// POST /rag: `{question}` -> answer streamed as plain text.
async fn rag_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RagRequest>,
) -> Response {
    let Some(question) = req.question.filter(|q| !q.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No question provided." })),
        )
            .into_response();
    };

    match state.pipeline.stream_answer(&question).await {
        Ok(stream) => {
            let body = Body::from_stream(stream.into_stream().map(Ok::<_, Infallible>));
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}
