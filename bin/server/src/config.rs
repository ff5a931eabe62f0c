//! Centralized server configuration.
//!
//! Loaded once at startup via the `config` crate from environment variables,
//! using `__` to separate nested keys (`GEMINI__API_KEY`,
//! `ORCHESTRATOR__MAX_ITERATIONS`).

use config::ConfigError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tempo_ai::GeminiConfig;
use tempo_conversation::{OrchestratorConfig, PersonaPlacement};
use tempo_weather::OpenWeatherConfig;

/// Smallest budget that still fits a set-city-then-lookup exchange.
pub const MIN_MAX_ITERATIONS: u32 = 3;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Model provider settings.
    pub gemini: GeminiSection,

    /// Weather provider settings.
    #[serde(default)]
    pub weather: WeatherSection,

    /// Orchestration loop settings.
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
}

/// Gemini settings.
#[derive(Clone, Deserialize)]
pub struct GeminiSection {
    /// API key. Required.
    pub api_key: String,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Whole-request timeout, in seconds.
    #[serde(default = "default_gemini_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl std::fmt::Debug for GeminiSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSection")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// OpenWeather settings.
#[derive(Clone, Deserialize)]
pub struct WeatherSection {
    /// API key. Weather lookups report a missing credential while unset.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_weather_base_url")]
    pub base_url: String,

    #[serde(default = "default_weather_units")]
    pub units: String,

    #[serde(default = "default_weather_lang")]
    pub lang: String,

    /// Whole-request timeout, in seconds.
    #[serde(default = "default_weather_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl std::fmt::Debug for WeatherSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherSection")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("units", &self.units)
            .field("lang", &self.lang)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// Orchestration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// Model round-trips allowed per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Persona instruction for the model.
    #[serde(default)]
    pub persona: Option<String>,

    #[serde(default)]
    pub persona_placement: PersonaPlacement,

    /// Sampling temperature; the provider default applies when unset.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Cap on tokens generated per model call.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_gemini_model() -> String {
    tempo_ai::gemini::DEFAULT_MODEL.to_string()
}

fn default_gemini_base_url() -> String {
    tempo_ai::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_gemini_timeout_seconds() -> u64 {
    30
}

fn default_weather_base_url() -> String {
    tempo_weather::openweather::DEFAULT_BASE_URL.to_string()
}

fn default_weather_units() -> String {
    "metric".to_string()
}

fn default_weather_lang() -> String {
    "pt_br".to_string()
}

fn default_weather_timeout_seconds() -> u64 {
    10
}

fn default_max_iterations() -> u32 {
    tempo_conversation::orchestrator::DEFAULT_MAX_ITERATIONS
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_weather_base_url(),
            units: default_weather_units(),
            lang: default_weather_lang(),
            timeout_seconds: default_weather_timeout_seconds(),
        }
    }
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            persona: None,
            persona_placement: PersonaPlacement::default(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gemini.api_key.trim().is_empty() {
            return Err(ConfigError::Message("gemini.api_key must not be empty".into()));
        }
        if self.orchestrator.max_iterations < MIN_MAX_ITERATIONS {
            return Err(ConfigError::Message(format!(
                "orchestrator.max_iterations must be at least {MIN_MAX_ITERATIONS}, got {}",
                self.orchestrator.max_iterations
            )));
        }
        if let Some(temperature) = self.orchestrator.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(ConfigError::Message(format!(
                "orchestrator.temperature must be between 0 and 2, got {temperature}"
            )));
        }
        Ok(())
    }

    /// Returns the Gemini client settings.
    #[must_use]
    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig::new(self.gemini.api_key.clone())
            .with_model(self.gemini.model.clone())
            .with_base_url(self.gemini.base_url.clone())
            .with_timeout(Duration::from_secs(self.gemini.timeout_seconds))
    }

    /// Returns the OpenWeather client settings.
    #[must_use]
    pub fn weather_config(&self) -> OpenWeatherConfig {
        OpenWeatherConfig {
            units: self.weather.units.clone(),
            lang: self.weather.lang.clone(),
            timeout: Duration::from_secs(self.weather.timeout_seconds),
            ..OpenWeatherConfig::default()
        }
        .with_api_key(self.weather.api_key.clone())
        .with_base_url(self.weather.base_url.clone())
    }

    /// Returns the orchestration loop settings.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config =
            OrchestratorConfig::default().with_max_iterations(self.orchestrator.max_iterations);
        if let Some(temperature) = self.orchestrator.temperature {
            config = config.with_temperature(temperature);
        }
        if let Some(max_output_tokens) = self.orchestrator.max_output_tokens {
            config = config.with_max_output_tokens(max_output_tokens);
        }
        config
    }
}
