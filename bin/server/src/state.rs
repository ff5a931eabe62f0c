//! Shared application state.

use std::sync::Arc;
use tempo_conversation::{ChatStore, Orchestrator};

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Turn orchestrator; owns per-conversation state.
    pub orchestrator: Arc<Orchestrator>,
    /// Chat records.
    pub chats: Arc<dyn ChatStore>,
}

impl AppState {
    /// Creates application state.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, chats: Arc<dyn ChatStore>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            chats,
        }
    }
}
