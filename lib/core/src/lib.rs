//! Core types shared by the tempo chat backend.
//!
//! Prefixed ULID identifiers for conversations and messages.

pub mod id;

pub use id::{ConversationId, Id, IdKind, MessageId, ParseIdError};
