//! OpenWeather current-weather client.

use crate::error::WeatherError;
use crate::provider::{WeatherObservation, WeatherProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use rootcause::Report;
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

/// Connection settings for [`OpenWeatherClient`].
#[derive(Clone)]
pub struct OpenWeatherConfig {
    /// API key. Lookups fail with [`WeatherError::MissingCredential`] while unset.
    pub api_key: Option<String>,
    /// Base URL without trailing path.
    pub base_url: String,
    /// Unit system (`metric`, `imperial`, `standard`).
    pub units: String,
    /// Language for condition descriptions.
    pub lang: String,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for OpenWeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("units", &self.units)
            .field("lang", &self.lang)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for OpenWeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            units: "metric".to_string(),
            lang: "pt_br".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl OpenWeatherConfig {
    /// Sets the API key. Blank keys count as unset.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/data/2.5/weather", self.base_url.trim_end_matches('/'))
    }
}

/// HTTP client for OpenWeather.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    http: reqwest::Client,
    config: OpenWeatherConfig,
}

impl OpenWeatherClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: OpenWeatherConfig) -> Result<Self, Report<WeatherError>> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WeatherError::Transport {
                reason: e.to_string(),
            })?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    #[instrument(skip(self))]
    async fn fetch_weather(&self, city: &str) -> Result<WeatherObservation, Report<WeatherError>> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            warn!("weather API key is not configured");
            return Err(WeatherError::MissingCredential.into());
        };

        let response = self
            .http
            .get(self.config.endpoint())
            .query(&[
                ("q", city),
                ("appid", api_key),
                ("units", self.config.units.as_str()),
                ("lang", self.config.lang.as_str()),
            ])
            .send()
            .await
            // The URL carries the key as a query parameter.
            .map_err(|e| WeatherError::Transport {
                reason: e.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "weather lookup failed");
            return Err(error_from_status(status, city).into());
        }

        let body = response.text().await.map_err(|e| WeatherError::Transport {
            reason: e.without_url().to_string(),
        })?;
        Ok(decode_observation(&body)?)
    }
}

#[derive(Deserialize)]
struct WireWeather {
    main: WireMain,
    #[serde(default)]
    weather: Vec<WireCondition>,
    #[serde(default)]
    wind: WireWind,
}

#[derive(Deserialize)]
struct WireMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
}

#[derive(Deserialize)]
struct WireCondition {
    description: String,
}

#[derive(Deserialize, Default)]
struct WireWind {
    #[serde(default)]
    speed: f64,
}

fn error_from_status(status: StatusCode, city: &str) -> WeatherError {
    match status {
        StatusCode::NOT_FOUND => WeatherError::NotFound {
            city: city.to_string(),
        },
        StatusCode::UNAUTHORIZED => WeatherError::Unauthorized,
        other => WeatherError::UnexpectedStatus {
            status: other.as_u16(),
        },
    }
}

fn decode_observation(body: &str) -> Result<WeatherObservation, WeatherError> {
    let wire: WireWeather =
        serde_json::from_str(body).map_err(|e| WeatherError::MalformedResponse {
            reason: e.to_string(),
        })?;

    Ok(WeatherObservation {
        temperature: wire.main.temp,
        feels_like: wire.main.feels_like,
        description: wire
            .weather
            .into_iter()
            .next()
            .map(|c| c.description)
            .unwrap_or_default(),
        humidity: wire.main.humidity,
        wind_speed: wire.wind.speed,
    })
}
