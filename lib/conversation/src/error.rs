//! Error types for the conversation crate.
//!
//! - `TurnError`: failures that escape the orchestration loop
//! - `ChatError`: failures from chat store operations
//!
//! Tool failures are not here: they are fed back to the model as tool
//! results and never reach the caller.

use tempo_ai::{ProviderError, user_facing_message};
use tempo_core::ConversationId;
use std::fmt;

/// Errors that end an orchestrated turn without an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// The model provider failed or could not be reached.
    ProviderUnavailable { error: ProviderError },
    /// The model returned a response the loop cannot interpret.
    MalformedResponse { error: ProviderError },
}

impl TurnError {
    /// Returns the underlying provider error.
    #[must_use]
    pub fn provider_error(&self) -> &ProviderError {
        match self {
            Self::ProviderUnavailable { error } | Self::MalformedResponse { error } => error,
        }
    }

    /// Returns a message that is safe to show the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        user_facing_message(self.provider_error())
    }
}

impl From<ProviderError> for TurnError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::MalformedResponse { .. } => Self::MalformedResponse { error },
            _ => Self::ProviderUnavailable { error },
        }
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { error } => write!(f, "model provider unavailable: {error}"),
            Self::MalformedResponse { error } => {
                write!(f, "model response could not be interpreted: {error}")
            }
        }
    }
}

impl std::error::Error for TurnError {}

/// Errors from chat store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Chat not found.
    NotFound { id: ConversationId },
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "chat not found: {id}"),
        }
    }
}

impl std::error::Error for ChatError {}
