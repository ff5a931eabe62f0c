//! Capability registry.
//!
//! The model may call exactly three capabilities. Names are resolved to a
//! [`Capability`] once, when the registry is built; anything else the model
//! asks for comes back to it as an `UNKNOWN_CAPABILITY` tool result.

use crate::clock::Clock;
use crate::state::ConversationState;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use tempo_ai::{FunctionCall, FunctionDeclaration, FunctionResponse};
use tempo_weather::{WeatherError, WeatherProvider};
use tracing::{info, warn};

/// São Paulo has stayed on UTC-03:00 all year since 2019.
const SAO_PAULO_OFFSET_HOURS: i64 = -3;
const SAO_PAULO_LABEL: &str = "São Paulo (Horário de Brasília)";

/// A capability the model can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `getCurrentTime`
    CurrentTime,
    /// `getWeather`
    Weather,
    /// `setUserCity`
    SetUserCity,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 3] = [Self::CurrentTime, Self::Weather, Self::SetUserCity];

    /// Returns the name declared to the model.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CurrentTime => "getCurrentTime",
            Self::Weather => "getWeather",
            Self::SetUserCity => "setUserCity",
        }
    }

    /// Returns the schema declaration sent to the model.
    #[must_use]
    pub fn declaration(self) -> FunctionDeclaration {
        match self {
            Self::CurrentTime => FunctionDeclaration::new(
                self.name(),
                "Obtém a data e hora atual. Sempre retorna o horário de São Paulo, Brasil.",
            ),
            Self::Weather => FunctionDeclaration::new(
                self.name(),
                "Obtém o clima atual na cidade do usuário, que DEVE estar definida \
                 previamente. Se a cidade não estiver definida, chame setUserCity primeiro.",
            ),
            Self::SetUserCity => FunctionDeclaration::new(
                self.name(),
                "Define ou pergunta a cidade do usuário. Com 'city' VAZIO o sistema pergunta \
                 a cidade ao usuário. Com 'city' preenchido, guarda a cidade para \
                 getCurrentTime e getWeather.",
            )
            .with_parameters(json!({
                "type": "OBJECT",
                "properties": {
                    "city": {
                        "type": "STRING",
                        "description": "Nome da cidade do usuário. Deixe VAZIO para perguntar a cidade."
                    }
                },
                "required": ["city"]
            })),
        }
    }
}

/// Why a capability could not produce data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorKind {
    /// Weather was requested before a city was set.
    CityNotSet,
    /// The weather provider does not know the city.
    CityNotFound,
    /// The weather provider credential is not configured.
    ConfigMissing,
    /// The weather provider failed.
    ProviderError,
    /// The model asked for a capability that does not exist.
    UnknownCapability,
}

impl ToolErrorKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CityNotSet => "CITY_NOT_SET",
            Self::CityNotFound => "CITY_NOT_FOUND",
            Self::ConfigMissing => "CONFIG_MISSING",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::UnknownCapability => "UNKNOWN_CAPABILITY",
        }
    }
}

/// Outcome data of an executed capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Capability data for the model.
    Success(JsonValue),
    /// A recoverable failure reported back to the model.
    Error {
        /// Failure kind.
        kind: ToolErrorKind,
        /// Explanation for the model.
        message: String,
    },
}

/// The executed result of one function call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    /// Name the model used.
    pub name: String,
    /// Result payload.
    pub payload: Payload,
}

impl FunctionResult {
    fn success(name: impl Into<String>, data: JsonValue) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Success(data),
        }
    }

    fn error(name: impl Into<String>, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Error {
                kind,
                message: message.into(),
            },
        }
    }

    /// Returns the error kind, if the capability failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.payload {
            Payload::Success(_) => None,
            Payload::Error { kind, .. } => Some(*kind),
        }
    }

    /// Converts into the function response handed back to the model.
    #[must_use]
    pub fn into_response(self) -> FunctionResponse {
        let response = match self.payload {
            Payload::Success(data) => data,
            Payload::Error { kind, message } => json!({
                "error": kind.as_str(),
                "message": message,
            }),
        };
        FunctionResponse {
            name: self.name,
            response,
        }
    }
}

/// What the loop must do after a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Feed this result back to the model.
    Completed(FunctionResult),
    /// Stop the turn and ask the user for their city.
    AskCity,
}

/// Resolves and executes model function calls.
pub struct CapabilityRegistry {
    by_name: HashMap<&'static str, Capability>,
    weather: Arc<dyn WeatherProvider>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.by_name.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CapabilityRegistry {
    /// Creates a registry backed by the given collaborators.
    #[must_use]
    pub fn new(weather: Arc<dyn WeatherProvider>, clock: Arc<dyn Clock>) -> Self {
        let by_name = Capability::ALL
            .into_iter()
            .map(|capability| (capability.name(), capability))
            .collect();
        Self {
            by_name,
            weather,
            clock,
        }
    }

    /// Resolves a declared name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Capability> {
        self.by_name.get(name).copied()
    }

    /// Returns the declarations to send to the model.
    #[must_use]
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        Capability::ALL.into_iter().map(Capability::declaration).collect()
    }

    /// Executes one function call against a conversation's state.
    pub async fn dispatch(
        &self,
        call: &FunctionCall,
        state: &mut ConversationState,
    ) -> DispatchOutcome {
        let Some(capability) = self.resolve(&call.name) else {
            warn!(capability = %call.name, "model called an unknown capability");
            return DispatchOutcome::Completed(FunctionResult::error(
                &call.name,
                ToolErrorKind::UnknownCapability,
                format!("Função '{}' não implementada.", call.name),
            ));
        };

        match capability {
            Capability::CurrentTime => DispatchOutcome::Completed(self.current_time()),
            Capability::Weather => DispatchOutcome::Completed(self.weather(state).await),
            Capability::SetUserCity => set_user_city(call, state),
        }
    }

    fn current_time(&self) -> FunctionResult {
        let local = self.clock.now().naive_utc() + TimeDelta::hours(SAO_PAULO_OFFSET_HOURS);
        FunctionResult::success(
            Capability::CurrentTime.name(),
            json!({
                "dateTime": local.format("%d/%m/%Y, %H:%M:%S").to_string(),
                "timeZoneLabel": SAO_PAULO_LABEL,
            }),
        )
    }

    async fn weather(&self, state: &ConversationState) -> FunctionResult {
        let name = Capability::Weather.name();
        let Some(city) = state.city() else {
            return FunctionResult::error(
                name,
                ToolErrorKind::CityNotSet,
                "A cidade do usuário não foi definida. Chame setUserCity antes de getWeather.",
            );
        };

        match self.weather.fetch_weather(city).await {
            Ok(observation) => FunctionResult::success(
                name,
                json!({
                    "city": city,
                    "temperature": observation.temperature.round() as i64,
                    "feelsLike": observation.feels_like.round() as i64,
                    "description": observation.description,
                    "humidity": observation.humidity,
                    "windSpeed": observation.wind_speed,
                }),
            ),
            Err(report) => {
                warn!(city, error = %report.current_context(), "weather lookup failed");
                match report.current_context() {
                    WeatherError::NotFound { .. } => FunctionResult::error(
                        name,
                        ToolErrorKind::CityNotFound,
                        format!(
                            "Não consegui encontrar o clima para \"{city}\". Por favor, verifique o nome."
                        ),
                    ),
                    WeatherError::MissingCredential => FunctionResult::error(
                        name,
                        ToolErrorKind::ConfigMissing,
                        "A chave da API de clima não está configurada.",
                    ),
                    WeatherError::Unauthorized
                    | WeatherError::UnexpectedStatus { .. }
                    | WeatherError::Transport { .. }
                    | WeatherError::MalformedResponse { .. } => FunctionResult::error(
                        name,
                        ToolErrorKind::ProviderError,
                        "Tive um problema ao consultar o clima no momento.",
                    ),
                }
            }
        }
    }
}

/// A missing, null or non-string `city` counts as empty.
fn set_user_city(call: &FunctionCall, state: &mut ConversationState) -> DispatchOutcome {
    let requested = call.str_arg("city").unwrap_or_default();
    let Some(city) = state.set_city(requested) else {
        return DispatchOutcome::AskCity;
    };

    info!(city, "user city set");
    DispatchOutcome::Completed(FunctionResult::success(
        Capability::SetUserCity.name(),
        json!({
            "status": "SUCCESS",
            "citySet": city,
            "messageForLLM": format!(
                "A cidade do usuário foi definida como {city}. Prossiga com a solicitação \
                 original do usuário, se aplicável (como obter clima ou hora)."
            ),
        }),
    ))
}
