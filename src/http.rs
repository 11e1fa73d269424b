//! The Session API: the HTTP boundary clients drive sessions through.
//!
//! Routes:
//!
//! - `POST /session`: create a session (optionally seeded) and drive it.
//! - `POST /session/{id}/message`: submit user input and resume.
//! - `GET  /session/{id}`: read-only status/messages/awaiting snapshot.
//! - `GET  /health`: liveness probe.
//!
//! All three session endpoints answer with the same shape:
//! `{session_id?, status, messages, awaiting_input}` where `messages` is
//! chronological and `awaiting_input` is null unless the engine suspended.
//! Application-level step failures stay 200 (the state carries them);
//! unknown sessions are 404, bad requests 400, unexpected failures 500.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::engine::{AwaitingInput, Engine, EngineError};
use crate::message::ChatMessage;
use crate::store::StoreError;
use crate::types::EngineStatus;

/// Builds the API router over a shared engine.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/session", post(create_session))
        .route("/session/{id}", get(get_session))
        .route("/session/{id}/message", post(send_message))
        .route("/health", get(health))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default = "default_workflow_id")]
    pub workflow_id: String,
    #[serde(default)]
    pub initial_data: Option<Map<String, Value>>,
}

fn default_workflow_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: Value,
}

/// Common response body for the three session endpoints.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: EngineStatus,
    pub messages: Vec<ChatMessage>,
    pub awaiting_input: Option<AwaitingInput>,
}

/// API-level error with its HTTP status.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::SessionNotFound { id }
            | EngineError::Store(StoreError::SessionNotFound { id }) => {
                Self::NotFound(format!("session not found: {id}"))
            }
            error @ EngineError::NoAwaitingStep { .. } => Self::BadRequest(error.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => {
                error!(%message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn create_session(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = engine
        .create_session(&request.workflow_id, request.initial_data)
        .await?;
    let status = engine.process(&session_id).await?;
    let response = snapshot(&engine, &session_id, Some(status)).await?;
    Ok(Json(response))
}

async fn send_message(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let status = engine.submit_input(&id, request.message).await?;
    let mut response = snapshot(&engine, &id, Some(status)).await?;
    response.session_id = None;
    Ok(Json(response))
}

async fn get_session(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let response = snapshot(&engine, &id, None).await?;
    Ok(Json(response))
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Assembles the shared response body from current session state.
///
/// `status` comes from the drive that just ran when there was one; for the
/// read-only GET it is derived from the document.
async fn snapshot(
    engine: &Engine,
    session_id: &str,
    status: Option<EngineStatus>,
) -> Result<SessionResponse, ApiError> {
    let state = engine
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session not found: {session_id}")))?;
    let status = status.unwrap_or_else(|| engine.session_status(&state));
    let awaiting_input = if status == EngineStatus::AwaitingInput {
        engine.awaiting_input(&state).await?
    } else {
        None
    };
    Ok(SessionResponse {
        session_id: Some(session_id.to_string()),
        status,
        messages: state.data.messages,
        awaiting_input,
    })
}
