//! Weather lookups for the tempo chat backend.
//!
//! This crate provides:
//!
//! - **Provider trait**: `WeatherProvider`, the contract the capability
//!   registry consumes
//! - **OpenWeather client**: an HTTP implementation backed by
//!   api.openweathermap.org

pub mod error;
pub mod openweather;
pub mod provider;

pub use error::WeatherError;
pub use openweather::{OpenWeatherClient, OpenWeatherConfig};
pub use provider::{WeatherObservation, WeatherProvider};
