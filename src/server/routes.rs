//! Axum route handlers for the moodscan HTTP server.
//!
//! # Routes
//!
//! - `GET    /health`                 - liveness probe with `vision_ready`
//! - `POST   /sessions`               - mint a session handle
//! - `GET    /sessions/:id`           - current stage and next step
//! - `DELETE /sessions/:id`           - discard a session
//! - `POST   /sessions/:id/capture`   - classify `{"image_data": "..."}` and start a cycle
//! - `GET    /questions/:qid`         - one question with its options
//! - `POST   /sessions/:id/answers`   - `{"question_id": n, "value": v}`
//! - `GET    /sessions/:id/analysis`  - score, band and face description
//! - `POST   /sessions/:id/chat`      - `{"message": "..."}`
//! - `GET    /sessions/:id/dialogue`  - history plus the opening greeting

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{FlowError, NextStep};
use crate::narrative::describe_emotion;
use crate::questionnaire::AnswerProgress;
use crate::session::{CheckInFlow, SessionRecord, SessionStore};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide flow: question set, bands and adapters.
    pub flow: Arc<CheckInFlow>,
    /// Live sessions.
    pub sessions: Arc<SessionStore>,
    /// Set once the classifier answered its warm-up probe.
    pub vision_ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(flow: CheckInFlow, sessions: SessionStore) -> Self {
        Self {
            flow: Arc::new(flow),
            sessions: Arc::new(sessions),
            vision_ready: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", post(create_session_handler))
        .route(
            "/sessions/:id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/:id/capture", post(capture_handler))
        .route("/questions/:qid", get(question_handler))
        .route("/sessions/:id/answers", post(answer_handler))
        .route("/sessions/:id/analysis", get(analysis_handler))
        .route("/sessions/:id/chat", post(chat_handler))
        .route("/sessions/:id/dialogue", get(dialogue_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    Flow(FlowError),
    SessionNotFound(Uuid),
}

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        Self::Flow(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::SessionNotFound(id) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({
                    "error": "not_found",
                    "message": format!("session {} not found", id),
                }),
            ),
            Self::Flow(e) => {
                let status = match &e {
                    FlowError::NotReady { .. } => StatusCode::CONFLICT,
                    FlowError::InvalidAnswer { .. } | FlowError::EmptyMessage => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    FlowError::QuestionNotFound(_) => StatusCode::NOT_FOUND,
                };
                let mut body = serde_json::json!({
                    "error": e.kind(),
                    "message": e.to_string(),
                });
                if let FlowError::NotReady { next, .. } = &e {
                    body["next"] = serde_json::to_value(next).unwrap_or(Value::Null);
                }
                (status, body)
            }
        };
        (status, Json(body)).into_response()
    }
}

async fn lock_session(
    state: &AppState,
    id: Uuid,
) -> Result<OwnedMutexGuard<SessionRecord>, ApiError> {
    state
        .sessions
        .lock(&id)
        .await
        .ok_or(ApiError::SessionNotFound(id))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health - liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "moodscan",
        "vision_ready": state.vision_ready.load(Ordering::Relaxed),
        "sessions": state.sessions.len(),
    }))
}

/// POST /sessions - mint a new idle session.
async fn create_session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let id = state.sessions.create();
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "session_id": id,
            "next": NextStep::Capture,
        })),
    )
}

/// GET /sessions/:id - stage summary.
async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let record = lock_session(&state, id).await?;
    Ok(Json(serde_json::json!({
        "session_id": record.id(),
        "stage": record.stage(),
        "next": record.next_step(),
        "answered": record.answers().len(),
        "total_questions": state.flow.questionnaire().len(),
        "created_at": record.created_at(),
    })))
}

/// DELETE /sessions/:id - discard a session.
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

#[derive(Debug, Deserialize)]
struct CaptureRequest {
    #[serde(default)]
    image_data: String,
}

/// POST /sessions/:id/capture - classify the image and reset the session.
///
/// Always 200 for a known session; a classifier failure shows up as a
/// `fallback` outcome.
async fn capture_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut record = lock_session(&state, id).await?;
    let outcome = state.flow.submit_capture(&mut record, &request.image_data).await;
    Ok(Json(serde_json::json!({
        "face": outcome,
        "description": describe_emotion(outcome.label()),
        "next": record.next_step(),
    })))
}

/// GET /questions/:qid - one question.
async fn question_handler(
    State(state): State<AppState>,
    Path(qid): Path<u32>,
) -> Result<Json<Value>, ApiError> {
    let question = state.flow.get_question(qid)?;
    Ok(Json(serde_json::json!({
        "id": question.id,
        "prompt": question.prompt,
        "options": question.options,
        "total": state.flow.questionnaire().len(),
    })))
}

#[derive(Debug, Deserialize)]
struct AnswerRequest {
    question_id: u32,
    value: i64,
}

/// POST /sessions/:id/answers - record one answer.
async fn answer_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut record = lock_session(&state, id).await?;
    let progress = state
        .flow
        .submit_answer(&mut record, request.question_id, request.value)?;

    let mut body = serde_json::to_value(progress).unwrap_or(Value::Null);
    if progress == AnswerProgress::Complete {
        body["analysis"] = serde_json::to_value(state.flow.get_analysis(&record)?)
            .unwrap_or(Value::Null);
    }
    Ok(Json(body))
}

/// GET /sessions/:id/analysis - results once the quiz is complete.
async fn analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let record = lock_session(&state, id).await?;
    let analysis = state.flow.get_analysis(&record)?;
    Ok(Json(serde_json::to_value(analysis).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

/// POST /sessions/:id/chat - one user turn and the agent's reply.
async fn chat_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut record = lock_session(&state, id).await?;
    let exchange = state
        .flow
        .submit_chat_message(&mut record, &request.message)
        .await?;
    Ok(Json(serde_json::to_value(exchange).unwrap_or(Value::Null)))
}

/// GET /sessions/:id/dialogue - history and the opening greeting.
async fn dialogue_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let record = lock_session(&state, id).await?;
    let history = state.flow.get_dialogue_history(&record)?;
    let greeting = record.analysis().map(CheckInFlow::greeting);
    Ok(Json(serde_json::json!({
        "greeting": greeting,
        "history": history,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
