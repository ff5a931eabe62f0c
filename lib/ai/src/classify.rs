//! Response classification and provider error mapping.
//!
//! [`classify`] decides what a raw provider response asks the loop to do
//! next. [`user_facing_message`] turns a provider failure into a stable
//! message that is safe to show an end user.

use crate::error::ProviderError;
use crate::provider::GenerateResponse;
use crate::turn::{FunctionCall, Part, Role, Turn};

/// What a provider response means for the orchestration loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The model answered with text only. The text is joined and trimmed.
    TextFinal { text: String },
    /// The model asked for a tool. Only the first call is serviced.
    ToolRequested { call: FunctionCall },
    /// No usable content; carries the block reason when one was reported.
    EmptyOrBlocked { reason: Option<String> },
}

/// Classifies a provider response.
///
/// Any function-call part wins over text parts in the same turn.
///
/// # Errors
///
/// Returns [`ProviderError::MalformedResponse`] when the primary candidate
/// carries a function response, which only the caller may author.
pub fn classify(response: &GenerateResponse) -> Result<Classification, ProviderError> {
    let Some(content) = response.primary_content() else {
        return Ok(Classification::EmptyOrBlocked {
            reason: response.block_reason().map(str::to_string),
        });
    };

    if content.parts.is_empty() {
        return Ok(Classification::EmptyOrBlocked {
            reason: response.block_reason().map(str::to_string),
        });
    }

    if content
        .parts
        .iter()
        .any(|p| matches!(p, Part::FunctionResponse(_)))
    {
        return Err(ProviderError::MalformedResponse {
            reason: "model output contains a functionResponse part".to_string(),
        });
    }

    if let Some(call) = content.first_function_call() {
        return Ok(Classification::ToolRequested { call: call.clone() });
    }

    Ok(Classification::TextFinal {
        text: content.joined_text(),
    })
}

/// Returns the last model-authored turn made entirely of text, if any.
#[must_use]
pub fn last_text_only_model_turn(contents: &[Turn]) -> Option<&Turn> {
    contents
        .iter()
        .rev()
        .find(|turn| turn.role == Role::Model)
        .filter(|turn| turn.is_text_only())
}

const MALFORMED_REQUEST_MESSAGE: &str = "Ops! Houve um erro interno ao montar a solicitação para a IA. \
A equipe de desenvolvimento já foi notificada.";
const UNSUPPORTED_MODEL_MESSAGE: &str = "O modelo de IA configurado não está disponível no momento. \
Verifique as configurações do serviço.";
const LOCATION_MESSAGE: &str = "Parece que sua localização não está configurada para usar este recurso. \
Verifique as configurações da API.";
const INTERNAL_MESSAGE: &str = "Ops! Encontrei um erro ao falar com a IA. Tente novamente!";

/// Maps a provider failure to a user-safe message.
///
/// Only the generic 4xx shape embeds upstream text, and that text passes
/// through [`redact_secrets`] first.
#[must_use]
pub fn user_facing_message(error: &ProviderError) -> String {
    match error {
        ProviderError::MalformedRequest { .. } => MALFORMED_REQUEST_MESSAGE.to_string(),
        ProviderError::UnsupportedModel { .. } => UNSUPPORTED_MODEL_MESSAGE.to_string(),
        ProviderError::LocationUnsupported { .. } => LOCATION_MESSAGE.to_string(),
        ProviderError::Rejected {
            status,
            description,
        } => format!(
            "Ops! A IA recusou a solicitação ({status}). Detalhe: {}",
            redact_secrets(description)
        ),
        ProviderError::Transport { .. }
        | ProviderError::Upstream { .. }
        | ProviderError::MalformedResponse { .. }
        | ProviderError::InvalidConfig { .. } => INTERNAL_MESSAGE.to_string(),
    }
}

/// Masks API-key-looking material in free text.
///
/// Handles `key=...` query parameters and Google-style `AIza...` keys.
#[must_use]
pub fn redact_secrets(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while !rest.is_empty() {
        let key_param = rest.find("key=").map(|i| i + "key=".len());
        let google_key = rest.find("AIza");
        let Some(secret_start) = [key_param, google_key].into_iter().flatten().min() else {
            out.push_str(rest);
            break;
        };

        out.push_str(&rest[..secret_start]);
        rest = &rest[secret_start..];
        let secret_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        if secret_len > 0 {
            out.push_str("[REDACTED]");
            rest = &rest[secret_len..];
        }
    }

    out
}
