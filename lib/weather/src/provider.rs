//! Weather provider contract.

use crate::error::WeatherError;
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};

/// Current conditions for a city, in the provider's configured units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    /// Air temperature.
    pub temperature: f64,
    /// Apparent temperature.
    pub feels_like: f64,
    /// Localized condition description ("céu limpo").
    pub description: String,
    /// Relative humidity in percent.
    pub humidity: u8,
    /// Wind speed.
    pub wind_speed: f64,
}

/// Trait for weather providers.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Fetches current conditions for `city`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is missing, the city is unknown,
    /// or the provider cannot be reached.
    async fn fetch_weather(&self, city: &str) -> Result<WeatherObservation, Report<WeatherError>>;
}
