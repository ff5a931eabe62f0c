//! Provider-native conversation turns.
//!
//! A [`Turn`] is one role-tagged unit of content exchanged with the model.
//! Turns are append-only: the orchestration loop pushes new ones and never
//! edits those already in the list.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human end user.
    User,
    /// The language model. Candidates sometimes omit the role; they are model output.
    #[default]
    Model,
    /// A tool result fed back to the model. Gemini names this role `function`.
    #[serde(rename = "function")]
    Tool,
}

/// A function invocation requested by the model. Not yet executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Capability name as declared to the model.
    pub name: String,
    /// Named arguments.
    #[serde(default)]
    pub args: Map<String, JsonValue>,
}

impl FunctionCall {
    /// Creates a call with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Returns a string argument, if present and a string.
    #[must_use]
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(JsonValue::as_str)
    }
}

/// The executed result of a [`FunctionCall`], as handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Name of the capability that produced this response.
    pub name: String,
    /// Response payload.
    pub response: JsonValue,
}

/// One piece of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPart")]
pub enum Part {
    /// Plain text.
    Text(String),
    /// A tool request emitted by the model.
    FunctionCall(FunctionCall),
    /// A tool result supplied to the model.
    FunctionResponse(FunctionResponse),
}

/// Lenient decoding shape: providers attach extra keys (thought signatures,
/// metadata) next to the content key, which an externally tagged enum rejects.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    text: Option<String>,
    function_call: Option<FunctionCall>,
    function_response: Option<FunctionResponse>,
}

impl TryFrom<RawPart> for Part {
    type Error = String;

    fn try_from(raw: RawPart) -> Result<Self, Self::Error> {
        if let Some(call) = raw.function_call {
            Ok(Self::FunctionCall(call))
        } else if let Some(response) = raw.function_response {
            Ok(Self::FunctionResponse(response))
        } else if let Some(text) = raw.text {
            Ok(Self::Text(text))
        } else {
            Err("part carries no text, functionCall or functionResponse".to_string())
        }
    }
}

impl Part {
    /// Returns the text if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the call if this is a function-call part.
    #[must_use]
    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Self::FunctionCall(call) => Some(call),
            _ => None,
        }
    }
}

/// A role-tagged sequence of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// The author.
    #[serde(default)]
    pub role: Role,
    /// Ordered content parts.
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Turn {
    /// Creates a turn from parts.
    #[must_use]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Creates a single-text user turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::Text(text.into())])
    }

    /// Creates a single-text model turn.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::Text(text.into())])
    }

    /// Creates a model turn carrying one function call.
    #[must_use]
    pub fn function_call(call: FunctionCall) -> Self {
        Self::new(Role::Model, vec![Part::FunctionCall(call)])
    }

    /// Creates a tool turn carrying one function response.
    #[must_use]
    pub fn tool(response: FunctionResponse) -> Self {
        Self::new(Role::Tool, vec![Part::FunctionResponse(response)])
    }

    /// Returns the first function-call part, if any.
    #[must_use]
    pub fn first_function_call(&self) -> Option<&FunctionCall> {
        self.parts.iter().find_map(Part::as_function_call)
    }

    /// Returns true when the turn is non-empty and made only of text parts.
    #[must_use]
    pub fn is_text_only(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|p| p.as_text().is_some())
    }

    /// Concatenates every text part and trims the result.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<String>()
            .trim()
            .to_string()
    }
}
