//! In-process stand-ins for the external collaborators.

use async_trait::async_trait;
use rootcause::Report;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tempo_ai::{GenerateRequest, GenerateResponse, ModelProvider, ProviderError};
use tempo_weather::{WeatherError, WeatherObservation, WeatherProvider};

/// Weather provider answering from a fixed table; unknown cities are not found.
#[derive(Default)]
pub struct StubWeather {
    pub observations: HashMap<String, WeatherObservation>,
    pub failure: Option<WeatherError>,
    pub seen: Mutex<Vec<String>>,
}

impl StubWeather {
    pub fn with_city(mut self, city: &str, temperature: f64, feels_like: f64) -> Self {
        self.observations.insert(
            city.to_string(),
            WeatherObservation {
                temperature,
                feels_like,
                description: "céu limpo".to_string(),
                humidity: 70,
                wind_speed: 3.6,
            },
        );
        self
    }

    pub fn failing(failure: WeatherError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.seen.lock().expect("lookups lock").clone()
    }
}

#[async_trait]
impl WeatherProvider for StubWeather {
    async fn fetch_weather(&self, city: &str) -> Result<WeatherObservation, Report<WeatherError>> {
        self.seen.lock().expect("lookups lock").push(city.to_string());
        tokio::task::yield_now().await;
        if let Some(failure) = &self.failure {
            return Err(failure.clone().into());
        }
        self.observations.get(city).cloned().ok_or_else(|| {
            WeatherError::NotFound {
                city: city.to_string(),
            }
            .into()
        })
    }
}

/// Model provider replaying a queue of responses, then repeating `fallback`.
#[derive(Default)]
pub struct ScriptedProvider {
    pub script: Mutex<VecDeque<Result<GenerateResponse, ProviderError>>>,
    pub fallback: Option<GenerateResponse>,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = GenerateResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    pub fn repeating(response: GenerateResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            script: Mutex::new(VecDeque::from([Err(error)])),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, Report<ProviderError>> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(error.into()),
            None => self.fallback.clone().ok_or_else(|| {
                ProviderError::Transport {
                    reason: "script exhausted".to_string(),
                }
                .into()
            }),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
