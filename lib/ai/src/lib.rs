//! Model-facing primitives for the tempo chat backend.
//!
//! This crate provides:
//!
//! - **Turns**: the provider-native conversation data model
//! - **Provider**: the `ModelProvider` contract and its request/response types
//! - **Classifier**: interpretation of raw responses and user-safe error mapping
//! - **Gemini**: an HTTP implementation of `ModelProvider`

pub mod classify;
pub mod error;
pub mod gemini;
pub mod provider;
pub mod turn;

pub use classify::{Classification, classify, last_text_only_model_turn, user_facing_message};
pub use error::ProviderError;
pub use gemini::{GeminiClient, GeminiConfig};
pub use provider::{
    Candidate, FunctionDeclaration, GenerateRequest, GenerateResponse, ModelProvider,
    PromptFeedback, UsageMetadata,
};
pub use turn::{FunctionCall, FunctionResponse, Part, Role, Turn};
