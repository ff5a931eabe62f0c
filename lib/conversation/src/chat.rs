//! Chat records and the chat store.
//!
//! A chat is the durable, user-visible side of a conversation: its id is the
//! conversation id, and its messages are what the turn materializer replays.

use crate::error::ChatError;
use crate::message::{MessageRole, StoredMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tempo_core::ConversationId;
use tokio::sync::RwLock;

/// Title used until the chat has a first message.
pub const DEFAULT_TITLE: &str = "Nova Conversa";

const TITLE_CHARS: usize = 30;

/// A chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Messages, oldest first.
    pub messages: Vec<StoredMessage>,
    /// When the chat was created.
    pub created_at: DateTime<Utc>,
    /// When the chat last changed.
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// Creates an empty chat.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a message. The first user message also names the chat.
    pub fn push(&mut self, message: StoredMessage) {
        if message.role == MessageRole::User
            && !self.messages.iter().any(|m| m.role == MessageRole::User)
        {
            self.title = title_from(&message.content);
        }
        self.updated_at = message.timestamp;
        self.messages.push(message);
    }

    /// Returns the listing view of this chat.
    #[must_use]
    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

fn title_from(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// A chat without its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// When the chat was created.
    pub created_at: DateTime<Utc>,
    /// When the chat last changed.
    pub updated_at: DateTime<Utc>,
}

/// Trait for chat storage.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Creates and stores an empty chat.
    async fn create(&self) -> Result<Chat, Report<ChatError>>;

    /// Gets a chat by id.
    async fn get(&self, id: ConversationId) -> Result<Chat, Report<ChatError>>;

    /// Appends messages to a stored chat and returns the updated chat.
    async fn append(
        &self,
        id: ConversationId,
        messages: Vec<StoredMessage>,
    ) -> Result<Chat, Report<ChatError>>;

    /// Lists chats, most recently updated first.
    async fn list(&self) -> Result<Vec<ChatSummary>, Report<ChatError>>;

    /// Deletes a chat.
    async fn delete(&self, id: ConversationId) -> Result<(), Report<ChatError>>;
}

/// Process-local chat store.
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<ConversationId, Chat>>,
}

impl InMemoryChatStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create(&self) -> Result<Chat, Report<ChatError>> {
        let chat = Chat::new();
        self.chats.write().await.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn get(&self, id: ConversationId) -> Result<Chat, Report<ChatError>> {
        self.chats
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound { id }.into())
    }

    async fn append(
        &self,
        id: ConversationId,
        messages: Vec<StoredMessage>,
    ) -> Result<Chat, Report<ChatError>> {
        let mut chats = self.chats.write().await;
        let chat = chats.get_mut(&id).ok_or(ChatError::NotFound { id })?;
        for message in messages {
            chat.push(message);
        }
        Ok(chat.clone())
    }

    async fn list(&self) -> Result<Vec<ChatSummary>, Report<ChatError>> {
        let mut summaries: Vec<ChatSummary> =
            self.chats.read().await.values().map(Chat::summary).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: ConversationId) -> Result<(), Report<ChatError>> {
        self.chats
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ChatError::NotFound { id }.into())
    }
}
