//! Gemini `generateContent` provider.
//!
//! The API key travels in the `x-goog-api-key` header so it never appears
//! in URLs, logs or error descriptions.

use crate::error::ProviderError;
use crate::provider::{FunctionDeclaration, GenerateRequest, GenerateResponse, ModelProvider};
use crate::turn::{Part, Turn};
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Connection settings for [`GeminiClient`].
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Base URL without trailing path.
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GeminiConfig {
    /// Creates a configuration for the default model and endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// HTTP client for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is empty or the HTTP client cannot be
    /// built.
    pub fn new(config: GeminiConfig) -> Result<Self, Report<ProviderError>> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::InvalidConfig {
                reason: "Gemini API key is empty".to_string(),
            }
            .into());
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InvalidConfig {
                reason: e.to_string(),
            })?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    #[instrument(skip(self, request), fields(model = %self.config.model, turns = request.contents.len()))]
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, Report<ProviderError>> {
        let body = WireRequest::from_request(request);

        let response = self
            .http
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                reason: e.without_url().to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ProviderError::Transport {
            reason: e.without_url().to_string(),
        })?;

        if !status.is_success() {
            let error = error_from_status(status.as_u16(), &text, &self.config.model);
            warn!(status = status.as_u16(), error = %error, "Gemini request failed");
            return Err(error.into());
        }

        let decoded = decode_response(&text)?;
        if let Some(usage) = decoded.usage_metadata {
            debug!(total_tokens = usage.total(), "Gemini usage");
        }
        Ok(decoded)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    contents: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTools<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Serialize)]
struct WireInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTools<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a GenerateRequest) -> Self {
        let generation_config = (request.temperature.is_some()
            || request.max_output_tokens.is_some())
        .then(|| WireGenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
        });

        Self {
            contents: &request.contents,
            system_instruction: request
                .system_instruction
                .as_ref()
                .filter(|text| !text.trim().is_empty())
                .map(|text| WireInstruction {
                    parts: vec![Part::Text(text.clone())],
                }),
            tools: if request.tools.is_empty() {
                Vec::new()
            } else {
                vec![WireTools {
                    function_declarations: &request.tools,
                }]
            },
            generation_config,
        }
    }
}

#[derive(Deserialize, Default)]
struct WireErrorEnvelope {
    #[serde(default)]
    error: WireError,
}

#[derive(Deserialize, Default)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Decodes a successful response body.
fn decode_response(body: &str) -> Result<GenerateResponse, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse {
        reason: e.to_string(),
    })
}

/// Classifies a non-2xx response into a provider failure shape.
fn error_from_status(status: u16, body: &str, model: &str) -> ProviderError {
    let envelope: WireErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let description = if envelope.error.message.is_empty() {
        body.chars().take(300).collect()
    } else {
        envelope.error.message
    };
    let lowered = description.to_lowercase();

    if lowered.contains("invalid json payload") {
        return ProviderError::MalformedRequest { description };
    }
    if envelope.error.status == "FAILED_PRECONDITION"
        || lowered.contains("location is not supported")
        || lowered.contains("user location is not set")
    {
        return ProviderError::LocationUnsupported { description };
    }
    if status == 404
        || (status == 403 && lowered.contains("model"))
        || lowered.contains("is not found for api version")
    {
        return ProviderError::UnsupportedModel {
            model: model.to_string(),
            description,
        };
    }
    if (400..500).contains(&status) {
        return ProviderError::Rejected {
            status,
            description,
        };
    }
    ProviderError::Upstream {
        status,
        description,
    }
}
