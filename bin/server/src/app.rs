//! HTTP routes for the chat API.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tempo_conversation::{Chat, ChatSummary, StoredMessage};
use tempo_core::ConversationId;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The user's message.
    #[serde(default)]
    pub message: Option<String>,
    /// Existing chat to continue; a new chat is created when absent.
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Reply to `POST /api/chat`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// The assistant's answer.
    pub response: String,
    /// The chat the exchange was recorded in.
    pub chat_id: ConversationId,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chats", get(list_chats))
        .route("/api/chats/{id}", get(get_chat).delete(delete_chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "Tempo chat backend is running"
}

fn parse_chat_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse().map_err(|_| ApiError::InvalidChatId {
        id: raw.to_string(),
    })
}

/// Runs one orchestrated turn and records it.
async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = body
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or(ApiError::EmptyMessage)?
        .to_string();

    let id = match body.chat_id.as_deref().filter(|id| !id.trim().is_empty()) {
        Some(raw) => {
            let id = parse_chat_id(raw.trim())?;
            state.chats.get(id).await?;
            id
        }
        None => state.chats.create().await?.id,
    };

    // History is read and the exchange recorded under the conversation lock.
    let mut lock = state.orchestrator.lock(id).await;
    let chat = state.chats.get(id).await?;

    match state
        .orchestrator
        .respond_locked(&mut lock, &chat.messages, &message)
        .await
    {
        Ok(outcome) => {
            info!(
                chat_id = %id,
                exit = ?outcome.exit,
                model_calls = outcome.model_calls,
                tool_calls = outcome.tool_invocations.len(),
                "chat turn completed"
            );
            state
                .chats
                .append(
                    id,
                    vec![
                        StoredMessage::user(message),
                        StoredMessage::assistant(outcome.reply.clone()),
                    ],
                )
                .await?;
            Ok(Json(ChatResponse {
                response: outcome.reply,
                chat_id: id,
            }))
        }
        Err(report) => {
            let failure = report.current_context();
            error!(chat_id = %id, error = %failure, "chat turn failed");
            let user_message = failure.user_message();
            state
                .chats
                .append(id, vec![StoredMessage::user(message)])
                .await?;
            Err(ApiError::Provider {
                message: user_message,
            })
        }
    }
}

async fn list_chats(State(state): State<AppState>) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    Ok(Json(state.chats.list().await?))
}

async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Chat>, ApiError> {
    Ok(Json(state.chats.get(parse_chat_id(&id)?).await?))
}

/// Ends a conversation: the chat record and its state both go.
async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_chat_id(&id)?;
    state.chats.delete(id).await?;
    state.orchestrator.end_conversation(id);
    info!(chat_id = %id, "chat deleted");
    Ok(StatusCode::NO_CONTENT)
}
