//! HTTP-facing error type.
//!
//! Handlers return [`ApiError`]; its `IntoResponse` impl picks the status
//! and a user-safe JSON body. Provider detail goes to the log, never the body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rootcause::Report;
use serde_json::json;
use std::fmt;
use tempo_conversation::ChatError;
use tempo_core::ConversationId;

/// Errors returned by the chat API.
#[derive(Debug)]
pub enum ApiError {
    /// The message was missing or blank.
    EmptyMessage,
    /// The chat id could not be parsed.
    InvalidChatId { id: String },
    /// No chat exists with this id.
    ChatNotFound { id: ConversationId },
    /// The model provider failed; `message` is already user-safe.
    Provider { message: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "message is required"),
            Self::InvalidChatId { id } => write!(f, "invalid chat id '{id}'"),
            Self::ChatNotFound { id } => write!(f, "chat '{id}' not found"),
            Self::Provider { message } => write!(f, "model provider failed: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<Report<ChatError>> for ApiError {
    fn from(report: Report<ChatError>) -> Self {
        match report.current_context() {
            ChatError::NotFound { id } => Self::ChatNotFound { id: *id },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::EmptyMessage => (StatusCode::BAD_REQUEST, "A mensagem é obrigatória.".to_string()),
            Self::InvalidChatId { .. } => {
                (StatusCode::BAD_REQUEST, "ID de conversa inválido.".to_string())
            }
            Self::ChatNotFound { .. } => {
                (StatusCode::NOT_FOUND, "Conversa não encontrada.".to_string())
            }
            Self::Provider { message } => (StatusCode::BAD_GATEWAY, message.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
