//! HTTP server for the tempo chat backend.
//!
//! Wires the orchestrator and the chat store behind an axum router.

pub mod app;
pub mod config;
pub mod error;
pub mod state;

use std::sync::Arc;
use tempo_ai::GeminiClient;
use tempo_conversation::{
    CapabilityRegistry, InMemoryChatStore, Orchestrator, SystemClock, TurnMaterializer,
};
use tempo_weather::OpenWeatherClient;

pub use app::router;
pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

/// Failure to assemble the application from its configuration.
#[derive(Debug)]
pub enum StartupError {
    /// A provider client rejected its settings.
    Client { reason: String },
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client { reason } => write!(f, "failed to build provider client: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Builds application state backed by the live Gemini and OpenWeather clients.
///
/// # Errors
///
/// Returns an error if either HTTP client cannot be constructed.
pub fn build_state(config: &ServerConfig) -> Result<AppState, rootcause::Report<StartupError>> {
    let gemini = GeminiClient::new(config.gemini_config()).map_err(|e| StartupError::Client {
        reason: e.current_context().to_string(),
    })?;
    let weather =
        OpenWeatherClient::new(config.weather_config()).map_err(|e| StartupError::Client {
            reason: e.current_context().to_string(),
        })?;

    let orchestrator = Orchestrator::new(
        Arc::new(gemini),
        CapabilityRegistry::new(Arc::new(weather), Arc::new(SystemClock)),
        TurnMaterializer::new(
            config.orchestrator.persona.clone(),
            config.orchestrator.persona_placement,
        ),
        config.orchestrator_config(),
    );

    Ok(AppState::new(orchestrator, Arc::new(InMemoryChatStore::new())))
}
