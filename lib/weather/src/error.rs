//! Error types for the weather crate.

use std::fmt;

/// Errors from weather lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeatherError {
    /// No API key is configured.
    MissingCredential,
    /// The provider does not know the city.
    NotFound { city: String },
    /// The provider rejected the API key.
    Unauthorized,
    /// Any other non-2xx answer.
    UnexpectedStatus { status: u16 },
    /// Network failure or timeout.
    Transport { reason: String },
    /// A 2xx answer whose body could not be decoded.
    MalformedResponse { reason: String },
}

impl fmt::Display for WeatherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "weather API key is not configured"),
            Self::NotFound { city } => write!(f, "weather provider does not know city '{city}'"),
            Self::Unauthorized => write!(f, "weather provider rejected the API key"),
            Self::UnexpectedStatus { status } => {
                write!(f, "weather provider answered with status {status}")
            }
            Self::Transport { reason } => write!(f, "weather provider unreachable: {reason}"),
            Self::MalformedResponse { reason } => {
                write!(f, "failed to parse weather response: {reason}")
            }
        }
    }
}

impl std::error::Error for WeatherError {}
