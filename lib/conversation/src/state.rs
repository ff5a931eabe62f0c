//! Per-conversation state.
//!
//! Each conversation owns one [`ConversationState`] behind its own async
//! mutex. The orchestrator holds that mutex for a whole turn, so turns of
//! the same conversation run one after another while different
//! conversations never touch each other's slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tempo_core::ConversationId;
use tokio::sync::Mutex;

/// Mutable context carried across turns of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    city: Option<String>,
}

impl ConversationState {
    /// Returns the resolved city, if any.
    #[must_use]
    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    /// Stores a trimmed city. Returns the stored value, or `None` when the
    /// input was blank and nothing changed.
    pub fn set_city(&mut self, city: &str) -> Option<&str> {
        let trimmed = city.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.city = Some(trimmed.to_string());
        self.city.as_deref()
    }
}

/// Shared handle to one conversation's state.
pub type StateHandle = Arc<Mutex<ConversationState>>;

/// Registry of conversation states keyed by conversation id.
#[derive(Debug, Clone, Default)]
pub struct ConversationStates {
    inner: Arc<RwLock<HashMap<ConversationId, StateHandle>>>,
}

impl ConversationStates {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for a conversation, creating empty state on first use.
    #[must_use]
    pub fn handle(&self, id: ConversationId) -> StateHandle {
        if let Some(handle) = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Arc::clone(handle);
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(id).or_default())
    }

    /// Returns a snapshot of a conversation's state. Unknown ids read as empty.
    pub async fn get(&self, id: ConversationId) -> ConversationState {
        let handle = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        match handle {
            Some(handle) => handle.lock().await.clone(),
            None => ConversationState::default(),
        }
    }

    /// Sets a conversation's city, waiting for any in-flight turn to finish.
    pub async fn set_city(&self, id: ConversationId, city: &str) {
        let handle = self.handle(id);
        handle.lock().await.set_city(city);
    }

    /// Destroys a conversation's state. Returns true if it existed.
    pub fn end(&self, id: ConversationId) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Returns the number of live conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns whether no conversation holds state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
