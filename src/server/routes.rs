//! HTTP route handlers for the geo-analysis agent API.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tower_http::services::ServeDir;

use crate::conversation::Conversation;
use crate::response::ChatResponse;

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let outputs = ServeDir::new(&state.config.output_dir);
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_check))
        .route("/chat/start", post(start_chat))
        .route("/chat/continue/{conversation_id}", post(continue_chat))
        .nest_service("/outputs", outputs)
        .with_state(state)
}

/// Root endpoint with a short welcome message.
async fn welcome() -> impl IntoResponse {
    Json(json!({
        "message": "Conversational geo-analysis agent. POST /chat/start to begin."
    }))
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "geo-agent",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Errors that cross the HTTP boundary. Everything recoverable is converted
/// into a follow-up question before reaching this type.
enum ApiError {
    /// Unknown conversation id.
    NotFound,
    /// The request itself was malformed.
    BadRequest(String),
    /// Unexpected server-side failure.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                "Conversation ID not found".to_string(),
            ),
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Chat request body. The optional file travels base64-encoded alongside the
/// query and is stored under the conversation's namespaced output directory.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    pub query: String,
    /// Name of the uploaded data file, if any.
    pub file_name: Option<String>,
    /// Base64-encoded file content, if any.
    pub file_data: Option<String>,
}

/// Start a new conversation.
async fn start_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), ApiError> {
    // Reject a bad upload before the conversation exists, so a 400 never
    // leaves an orphaned entry in the store.
    let upload = decode_upload(&request)?;

    let (id, handle) = state.store.create();
    tracing::info!(conversation_id = %id, "starting conversation");

    let mut conversation = handle.lock().await;
    if let Some((name, bytes)) = upload {
        store_upload(&state, &mut conversation, &name, bytes).await?;
    }
    let outcome = state
        .orchestrator
        .handle_turn(&mut conversation, &request.query)
        .await;

    let response = state.orchestrator.composer().compose(&id, &outcome);
    Ok((StatusCode::CREATED, Json(response)))
}

/// Continue an existing conversation.
async fn continue_chat(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let upload = decode_upload(&request)?;
    let handle = state
        .store
        .get(&conversation_id)
        .map_err(|_| ApiError::NotFound)?;
    tracing::info!(conversation_id = %conversation_id, "continuing conversation");

    // The lock is held for the whole turn: concurrent requests on the same
    // conversation id are processed in order, never interleaved.
    let mut conversation = handle.lock().await;
    if let Some((name, bytes)) = upload {
        store_upload(&state, &mut conversation, &name, bytes).await?;
    }
    let outcome = state
        .orchestrator
        .handle_turn(&mut conversation, &request.query)
        .await;

    Ok(Json(
        state
            .orchestrator
            .composer()
            .compose(&conversation_id, &outcome),
    ))
}

/// Decode the optional upload without touching any state.
fn decode_upload(request: &ChatRequest) -> Result<Option<(String, Vec<u8>)>, ApiError> {
    let Some(data) = &request.file_data else {
        return Ok(None);
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|_| ApiError::BadRequest("file_data is not valid base64".to_string()))?;
    let name = sanitize_file_name(request.file_name.as_deref().unwrap_or("upload.csv"));
    Ok(Some((name, bytes)))
}

/// Store a decoded upload under the conversation's directory.
async fn store_upload(
    state: &AppState,
    conversation: &mut Conversation,
    name: &str,
    bytes: Vec<u8>,
) -> Result<(), ApiError> {
    let dir = state.config.output_dir.join(&conversation.id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::Internal(format!("could not create upload directory: {e}")))?;

    let path: PathBuf = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("could not store upload: {e}")))?;
    tracing::info!(conversation_id = %conversation.id, file = %name, "stored upload");

    conversation.source_file = Some(path);
    Ok(())
}

/// Keep only the final path component and harmless characters.
fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("upload.csv");
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned
    }
}
