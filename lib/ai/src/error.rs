//! Error types for the AI crate.
//!
//! `ProviderError` covers every way a call to the model provider can fail.
//! Provider clients wrap it in a rootcause `Report`; callers that need to
//! branch on the failure shape read it back with `current_context()`.

use std::fmt;

/// Errors from model provider operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider could not be reached or the connection broke.
    Transport { reason: String },
    /// The provider rejected the request body as malformed.
    MalformedRequest { description: String },
    /// The configured model does not exist or the key may not use it.
    UnsupportedModel { model: String, description: String },
    /// The provider refuses to serve the caller's location or region.
    LocationUnsupported { description: String },
    /// Any other 4xx rejection.
    Rejected { status: u16, description: String },
    /// The provider failed internally (5xx).
    Upstream { status: u16, description: String },
    /// A 2xx response whose body could not be understood.
    MalformedResponse { reason: String },
    /// Client-side configuration is unusable.
    InvalidConfig { reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { reason } => write!(f, "model provider unreachable: {reason}"),
            Self::MalformedRequest { description } => {
                write!(f, "model provider rejected malformed request: {description}")
            }
            Self::UnsupportedModel { model, description } => {
                write!(f, "model '{model}' is not available: {description}")
            }
            Self::LocationUnsupported { description } => {
                write!(f, "model provider does not serve this location: {description}")
            }
            Self::Rejected {
                status,
                description,
            } => write!(f, "model provider rejected request ({status}): {description}"),
            Self::Upstream {
                status,
                description,
            } => write!(f, "model provider failed ({status}): {description}"),
            Self::MalformedResponse { reason } => {
                write!(f, "failed to parse model provider response: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid model provider configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}
