//! Model provider abstraction.
//!
//! The orchestration loop only talks to the model through [`ModelProvider`],
//! so tests can script responses and the Gemini client can be swapped out.

use crate::error::ProviderError;
use crate::turn::Turn;
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Schema declaration of a function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Unique function name.
    pub name: String,
    /// Natural-language description for the model.
    pub description: String,
    /// Parameter schema in the provider's OpenAPI subset.
    pub parameters: JsonValue,
}

impl FunctionDeclaration {
    /// Creates a declaration that takes no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "OBJECT", "properties": {} }),
        }
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A request to generate the next model turn.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Ordered conversation turns.
    pub contents: Vec<Turn>,
    /// Persona/system instruction, sent as a dedicated field.
    pub system_instruction: Option<String>,
    /// Functions the model may call.
    pub tools: Vec<FunctionDeclaration>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_output_tokens: Option<u32>,
}

impl GenerateRequest {
    /// Creates a request for the given turns.
    #[must_use]
    pub fn new(contents: Vec<Turn>) -> Self {
        Self {
            contents,
            ..Self::default()
        }
    }

    /// Sets the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction;
        self
    }

    /// Sets the tool declarations.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<FunctionDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Caps the tokens the model may generate.
    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// One candidate continuation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// The generated turn. Absent when the candidate was filtered.
    #[serde(default)]
    pub content: Option<Turn>,
    /// Why generation stopped (`STOP`, `SAFETY`, ...).
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Feedback about the prompt itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    /// Set when the prompt was blocked.
    #[serde(default)]
    pub block_reason: Option<String>,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_token_count: u32,
    /// Tokens across candidates.
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl UsageMetadata {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt_token_count
            .saturating_add(self.candidates_token_count)
    }
}

/// A raw provider response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Candidate continuations, primary first.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Prompt-level feedback.
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    /// Token usage.
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    /// Creates a response with a single candidate turn.
    #[must_use]
    pub fn from_turn(turn: Turn) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(turn),
                finish_reason: Some("STOP".to_string()),
            }],
            ..Self::default()
        }
    }

    /// Creates a response with no candidates and a prompt block reason.
    #[must_use]
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            prompt_feedback: Some(PromptFeedback {
                block_reason: Some(reason.into()),
            }),
            ..Self::default()
        }
    }

    /// Returns the content of the primary candidate.
    #[must_use]
    pub fn primary_content(&self) -> Option<&Turn> {
        self.candidates.first().and_then(|c| c.content.as_ref())
    }

    /// Returns the reason the response was blocked, if the provider said so.
    #[must_use]
    pub fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .or_else(|| {
                self.candidates
                    .first()
                    .and_then(|c| c.finish_reason.as_deref())
                    .filter(|reason| *reason == "SAFETY" || *reason == "PROHIBITED_CONTENT")
            })
    }
}

/// Trait for model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generates the next turn for the given request.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached, rejects the
    /// request, or answers with an undecodable body.
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, Report<ProviderError>>;

    /// Returns the model name.
    fn model(&self) -> &str;
}
