//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    CancelResponse, ChatRequest, ErrorResponse, HealthResponse, ToolsResponse, TurnsResponse,
};
use super::AppState;
use crate::runtime::{Caller, StartError};
use crate::tools::AccessScope;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

const USER_HEADER: &str = "x-user-id";
const RESTAURANT_HEADER: &str = "x-restaurant-id";
const ROLE_HEADER: &str = "x-user-role";

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/conversations/:id/cancel", post(cancel_conversation))
        .route("/api/conversations/:id/turns", get(get_turns))
        .route("/api/tools", get(list_tools))
        .route("/health", get(health))
        .with_state(state)
}

// ============================================================
// Caller context
// ============================================================

/// Read the caller established by the fronting session layer
fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, AppError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {name} header")))
    };

    let user_id = header(USER_HEADER)?;
    let restaurant_id = header(RESTAURANT_HEADER)?;
    let scope = match header(ROLE_HEADER)?.to_ascii_lowercase().as_str() {
        "manager" => AccessScope::Manager,
        "staff" => AccessScope::Staff,
        other => return Err(AppError::Unauthorized(format!("Unknown role: {other}"))),
    };

    Ok(Caller {
        user_id,
        restaurant_id,
        scope,
    })
}

// ============================================================
// Chat
// ============================================================

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let caller = caller_from_headers(&headers)?;
    let stream = state
        .runtime
        .start_chat(&caller, &req.message, req.conversation_id.as_deref())
        .await?;

    tracing::debug!(conv_id = %stream.conversation_id, "Streaming reply");
    Ok(sse_stream(stream.events).into_response())
}

async fn cancel_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let conversation_id = state.runtime.owned_conversation(&caller, &id)?;
    let cancelled = state.runtime.cancel(&conversation_id);

    Ok(Json(CancelResponse {
        conversation_id,
        cancelled,
    }))
}

// ============================================================
// Inspection
// ============================================================

async fn get_turns(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TurnsResponse>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let conversation_id = state.runtime.owned_conversation(&caller, &id)?;
    let turns = state
        .runtime
        .db()
        .get_turns(&conversation_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(TurnsResponse {
        conversation_id,
        turns,
    }))
}

async fn list_tools(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ToolsResponse>, AppError> {
    let caller = caller_from_headers(&headers)?;
    Ok(Json(ToolsResponse {
        tools: state.runtime.tool_definitions(caller.scope),
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        configured: state.runtime.is_configured(),
    })
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl From<StartError> for AppError {
    fn from(err: StartError) -> Self {
        let message = err.to_string();
        match err {
            StartError::Input(_) => AppError::BadRequest(message),
            StartError::Configuration => AppError::Unavailable(message),
            StartError::ConversationNotFound(_) => AppError::NotFound(message),
            StartError::Busy(_) => AppError::Conflict(message),
            StartError::Storage(_) => {
                tracing::error!(error = %message, "Storage failure before loop start");
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
