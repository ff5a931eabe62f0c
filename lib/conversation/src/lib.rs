//! Conversation orchestration for the tempo chat backend.
//!
//! This crate provides:
//!
//! - **Capability Registry**: the three capabilities the model may invoke
//! - **Conversation State**: per-conversation city, isolated and serialized
//! - **Turn Materializer**: stored history to provider-native turns
//! - **Orchestrator**: the bounded model/tool loop
//! - **Chat Store**: durable chat records the caller persists turns into

pub mod capability;
pub mod chat;
pub mod clock;
pub mod error;
pub mod materialize;
pub mod message;
pub mod orchestrator;
pub mod state;

#[cfg(test)]
mod testing;

pub use capability::{
    Capability, CapabilityRegistry, DispatchOutcome, FunctionResult, Payload, ToolErrorKind,
};
pub use chat::{Chat, ChatStore, ChatSummary, InMemoryChatStore};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ChatError, TurnError};
pub use materialize::{MaterializedTurns, PersonaPlacement, TurnMaterializer};
pub use message::{MessageRole, StoredMessage};
pub use orchestrator::{
    ConversationLock, ExitReason, LoopBudget, Orchestrator, OrchestratorConfig, ToolInvocation,
    TurnOutcome, TurnRequest,
};
pub use state::{ConversationState, ConversationStates, StateHandle};
