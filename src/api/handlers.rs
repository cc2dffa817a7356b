//! HTTP request handlers

use super::types::{ErrorResponse, HealthResponse, MessageRequest, MessageResponse};
use super::AppState;
use crate::db::ChatId;
use crate::runtime::InboundMessage;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

/// Longest message text accepted from the transport
const MAX_TEXT_CHARS: usize = 4096;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Inbound bus: one message in, the bot's replies out
        .route("/api/chats/:chat_id/messages", post(post_message))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn post_message(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if req.text.chars().count() > MAX_TEXT_CHARS {
        return Err(AppError::BadRequest(format!(
            "Message text longer than {MAX_TEXT_CHARS} characters"
        )));
    }

    tracing::debug!(chat_id = %chat_id, "Inbound message");

    let messages = state
        .runtime
        .dispatch(InboundMessage {
            chat_id,
            text: req.text,
            sender_name: req.sender_name,
        })
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(MessageResponse { messages }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_chats: state.runtime.active_chats().await,
    })
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Message dispatch failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
