//! The orchestration loop.
//!
//! One call to [`Orchestrator::respond`] turns a user message into exactly
//! one reply. In between, the model may request capabilities; each request
//! is executed and fed back until the model answers with text, asks for the
//! user's city, is blocked, or the iteration budget runs out.
//!
//! The conversation's state mutex is held for the whole turn, so turns of
//! the same conversation are serialized. Callers that persist history take
//! the [`ConversationLock`] themselves, read history under it and record the
//! exchange before releasing it.

use crate::capability::{CapabilityRegistry, DispatchOutcome, ToolErrorKind};
use crate::error::TurnError;
use crate::materialize::TurnMaterializer;
use crate::message::StoredMessage;
use crate::state::{ConversationState, ConversationStates};
use rootcause::Report;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tempo_ai::{
    Classification, GenerateRequest, ModelProvider, Turn, classify, last_text_only_model_turn,
};
use tempo_core::ConversationId;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

/// Default bound on model round-trips per turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Reply when the model decides it needs the user's city.
pub const ASK_CITY_QUESTION: &str = "Qual é a sua cidade?";

/// Reply when the model produced nothing usable.
pub const EMPTY_RESPONSE_MESSAGE: &str =
    "Desculpe, não consegui gerar uma resposta para isso. Pode reformular?";

/// Reply when the budget ran out and no text could be salvaged.
pub const SIMPLIFY_FALLBACK_MESSAGE: &str =
    "Desculpe, não consegui concluir sua solicitação. Poderia simplificar o pedido?";

/// Orchestrator settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    max_iterations: u32,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl OrchestratorConfig {
    /// Sets the iteration budget. Zero is raised to one.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Caps the tokens generated per model call.
    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    /// Returns the iteration budget.
    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

/// Bounds model/tool round-trips within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBudget {
    used: u32,
    max: u32,
}

impl LoopBudget {
    /// Creates an unused budget.
    #[must_use]
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Returns whether another iteration may start.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.used < self.max
    }

    /// Records a completed tool round-trip.
    pub fn consume(&mut self) {
        self.used = (self.used + 1).min(self.max);
    }

    /// Returns the iterations spent.
    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExitReason {
    /// The model answered with text.
    Done,
    /// The model asked for the user's city; the fixed question was returned.
    AskCity,
    /// The model returned nothing usable.
    Blocked,
    /// The budget ran out. `salvaged` tells whether earlier model text was reused.
    BudgetExhausted { salvaged: bool },
}

/// One executed capability request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Name the model used.
    pub capability: String,
    /// Arguments the model sent.
    pub args: Map<String, JsonValue>,
    /// Set when the capability reported an error to the model.
    pub error: Option<ToolErrorKind>,
    /// Wall time spent in the capability.
    pub latency_ms: u64,
}

/// The answer to one turn plus its trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// Text for the user.
    pub reply: String,
    /// Why the loop stopped.
    pub exit: ExitReason,
    /// Number of model calls made.
    pub model_calls: u32,
    /// Capability requests in the order the model issued them.
    pub tool_invocations: Vec<ToolInvocation>,
    /// Provider block reason, when the response was blocked.
    pub block_reason: Option<String>,
    /// Tokens reported by the provider across all calls.
    pub tokens_used: u32,
}

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// The conversation this turn belongs to.
    pub conversation_id: ConversationId,
    /// Durable history, excluding `user_text`.
    pub prior_messages: Vec<StoredMessage>,
    /// The new user message.
    pub user_text: String,
}

#[derive(Debug, Default)]
struct Trace {
    model_calls: u32,
    tool_invocations: Vec<ToolInvocation>,
    tokens_used: u32,
}

impl Trace {
    fn finish(self, reply: impl Into<String>, exit: ExitReason) -> TurnOutcome {
        TurnOutcome {
            reply: reply.into(),
            exit,
            model_calls: self.model_calls,
            tool_invocations: self.tool_invocations,
            block_reason: None,
            tokens_used: self.tokens_used,
        }
    }
}

/// Exclusive hold on one conversation's state.
///
/// Callers that keep durable history read it after taking the lock and
/// persist the exchange before dropping it, so queued turns of the same
/// conversation see each other's messages.
pub struct ConversationLock {
    id: ConversationId,
    state: OwnedMutexGuard<ConversationState>,
}

impl ConversationLock {
    /// Returns the locked conversation.
    #[must_use]
    pub fn id(&self) -> ConversationId {
        self.id
    }

    /// Returns the conversation's current city.
    #[must_use]
    pub fn city(&self) -> Option<&str> {
        self.state.city()
    }
}

impl std::fmt::Debug for ConversationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLock")
            .field("id", &self.id)
            .field("state", &*self.state)
            .finish()
    }
}

/// Drives turns between the model and the capability registry.
pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    registry: CapabilityRegistry,
    states: ConversationStates,
    materializer: TurnMaterializer,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator with its own state registry.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: CapabilityRegistry,
        materializer: TurnMaterializer,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            states: ConversationStates::new(),
            materializer,
            config,
        }
    }

    /// Returns the per-conversation state registry.
    #[must_use]
    pub fn states(&self) -> &ConversationStates {
        &self.states
    }

    /// Destroys a conversation's state. Returns true if it existed.
    pub fn end_conversation(&self, id: ConversationId) -> bool {
        let ended = self.states.end(id);
        if ended {
            debug!(conversation_id = %id, "conversation state dropped");
        }
        ended
    }

    /// Takes exclusive hold of a conversation until the returned lock drops.
    pub async fn lock(&self, id: ConversationId) -> ConversationLock {
        let handle = self.states.handle(id);
        ConversationLock {
            id,
            state: handle.lock_owned().await,
        }
    }

    /// Produces the reply for one user message.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::respond_locked`].
    pub async fn respond(&self, request: &TurnRequest) -> Result<TurnOutcome, Report<TurnError>> {
        let mut lock = self.lock(request.conversation_id).await;
        self.respond_locked(&mut lock, &request.prior_messages, &request.user_text)
            .await
    }

    /// Produces the reply for one user message of an already locked
    /// conversation. `prior_messages` excludes `user_text`.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::ProviderUnavailable`] when a model call fails and
    /// [`TurnError::MalformedResponse`] when a response cannot be classified.
    /// Tool failures never surface here.
    #[instrument(
        skip(self, lock, prior_messages, user_text),
        fields(conversation_id = %lock.id, model = self.provider.model())
    )]
    pub async fn respond_locked(
        &self,
        lock: &mut ConversationLock,
        prior_messages: &[StoredMessage],
        user_text: &str,
    ) -> Result<TurnOutcome, Report<TurnError>> {
        let materialized = self.materializer.build(prior_messages, user_text);
        let mut generate = GenerateRequest::new(materialized.contents)
            .with_system_instruction(materialized.system_instruction)
            .with_tools(self.registry.declarations());
        if let Some(temperature) = self.config.temperature {
            generate = generate.with_temperature(temperature);
        }
        if let Some(max_output_tokens) = self.config.max_output_tokens {
            generate = generate.with_max_output_tokens(max_output_tokens);
        }

        let mut budget = LoopBudget::new(self.config.max_iterations);
        let mut trace = Trace::default();

        while budget.has_remaining() {
            let response = self.provider.generate(&generate).await.map_err(|report| {
                let error = TurnError::from(report.current_context().clone());
                report.context(error)
            })?;
            trace.model_calls += 1;
            if let Some(usage) = response.usage_metadata {
                trace.tokens_used = trace.tokens_used.saturating_add(usage.total());
            }

            let classification = classify(&response).map_err(TurnError::from)?;
            debug!(iteration = budget.used(), ?classification, "model responded");

            match classification {
                Classification::EmptyOrBlocked { reason } => {
                    warn!(block_reason = ?reason, "model returned no usable content");
                    let mut outcome = trace.finish(EMPTY_RESPONSE_MESSAGE, ExitReason::Blocked);
                    outcome.block_reason = reason;
                    return Ok(outcome);
                }
                Classification::TextFinal { text } => {
                    info!(model_calls = trace.model_calls, "turn answered");
                    return Ok(trace.finish(text, ExitReason::Done));
                }
                Classification::ToolRequested { call } => {
                    if let Some(turn) = response.primary_content() {
                        generate.contents.push(turn.clone());
                    }

                    let started = Instant::now();
                    let dispatched = self.registry.dispatch(&call, &mut lock.state).await;
                    let latency_ms =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                    match dispatched {
                        DispatchOutcome::AskCity => {
                            trace.tool_invocations.push(ToolInvocation {
                                capability: call.name,
                                args: call.args,
                                error: None,
                                latency_ms,
                            });
                            info!("asking the user for their city");
                            return Ok(trace.finish(ASK_CITY_QUESTION, ExitReason::AskCity));
                        }
                        DispatchOutcome::Completed(result) => {
                            debug!(capability = %call.name, latency_ms, error = ?result.error_kind(), "capability executed");
                            trace.tool_invocations.push(ToolInvocation {
                                capability: call.name,
                                args: call.args,
                                error: result.error_kind(),
                                latency_ms,
                            });
                            generate.contents.push(Turn::tool(result.into_response()));
                            budget.consume();
                        }
                    }
                }
            }
        }

        let salvaged = last_text_only_model_turn(&generate.contents).map(Turn::joined_text);
        warn!(
            iterations = budget.used(),
            salvaged = salvaged.is_some(),
            "iteration budget exhausted"
        );
        Ok(match salvaged {
            Some(text) => trace.finish(text, ExitReason::BudgetExhausted { salvaged: true }),
            None => trace.finish(
                SIMPLIFY_FALLBACK_MESSAGE,
                ExitReason::BudgetExhausted { salvaged: false },
            ),
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.provider.model())
            .field("registry", &self.registry)
            .field("materializer", &self.materializer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::testing::{ScriptedProvider, StubWeather};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempo_ai::{FunctionCall, GenerateResponse, Part, ProviderError, Role};

    fn call(name: &str) -> GenerateResponse {
        GenerateResponse::from_turn(Turn::function_call(FunctionCall::new(name)))
    }

    fn set_city(city: &str) -> GenerateResponse {
        GenerateResponse::from_turn(Turn::function_call(
            FunctionCall::new("setUserCity").with_arg("city", city),
        ))
    }

    fn text(reply: &str) -> GenerateResponse {
        GenerateResponse::from_turn(Turn::model(reply))
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, weather: Arc<StubWeather>) -> Orchestrator {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap());
        Orchestrator::new(
            provider,
            CapabilityRegistry::new(weather, Arc::new(clock)),
            TurnMaterializer::default(),
            OrchestratorConfig::default(),
        )
    }

    fn turn(id: ConversationId, user_text: &str) -> TurnRequest {
        TurnRequest {
            conversation_id: id,
            prior_messages: Vec::new(),
            user_text: user_text.to_string(),
        }
    }

    fn tool_payload(request: &GenerateRequest) -> &JsonValue {
        match request.contents.last().map(|t| (t.role, &t.parts[0])) {
            Some((Role::Tool, Part::FunctionResponse(response))) => &response.response,
            other => panic!("expected trailing tool turn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_only_reply_is_returned_trimmed() {
        let provider = Arc::new(ScriptedProvider::new([text("  Olá!  ")]));
        let orch = orchestrator(Arc::clone(&provider), Arc::new(StubWeather::default()));

        let outcome = orch.respond(&turn(ConversationId::new(), "oi")).await.unwrap();

        assert_eq!(outcome.reply, "Olá!");
        assert_eq!(outcome.exit, ExitReason::Done);
        assert_eq!(outcome.model_calls, 1);
        assert!(outcome.tool_invocations.is_empty());
        assert_eq!(provider.requests()[0].tools.len(), 3);
    }

    #[tokio::test]
    async fn model_calls_never_exceed_budget() {
        let provider = Arc::new(ScriptedProvider::repeating(call("getCurrentTime")));
        let orch = orchestrator(Arc::clone(&provider), Arc::new(StubWeather::default()));

        let outcome = orch.respond(&turn(ConversationId::new(), "oi")).await.unwrap();

        assert_eq!(provider.calls(), DEFAULT_MAX_ITERATIONS as usize);
        assert_eq!(outcome.model_calls, DEFAULT_MAX_ITERATIONS);
        assert_eq!(outcome.reply, SIMPLIFY_FALLBACK_MESSAGE);
        assert_eq!(outcome.exit, ExitReason::BudgetExhausted { salvaged: false });
        assert_eq!(outcome.tool_invocations.len(), DEFAULT_MAX_ITERATIONS as usize);
    }

    #[tokio::test]
    async fn custom_budget_is_respected() {
        let provider = Arc::new(ScriptedProvider::repeating(call("getCurrentTime")));
        let clock = FixedClock(Utc::now());
        let orch = Orchestrator::new(
            Arc::clone(&provider) as Arc<dyn ModelProvider>,
            CapabilityRegistry::new(Arc::new(StubWeather::default()), Arc::new(clock)),
            TurnMaterializer::default(),
            OrchestratorConfig::default().with_max_iterations(3),
        );

        orch.respond(&turn(ConversationId::new(), "oi")).await.unwrap();
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn empty_city_short_circuits_with_question() {
        let provider = Arc::new(ScriptedProvider::new([set_city(""), text("never sent")]));
        let weather = Arc::new(StubWeather::default());
        let orch = orchestrator(Arc::clone(&provider), Arc::clone(&weather));
        let id = ConversationId::new();

        let outcome = orch.respond(&turn(id, "que horas são?")).await.unwrap();

        assert_eq!(outcome.reply, "Qual é a sua cidade?");
        assert_eq!(outcome.exit, ExitReason::AskCity);
        assert_eq!(provider.calls(), 1);
        assert!(weather.lookups().is_empty());
        assert_eq!(orch.states().get(id).await.city(), None);
    }

    #[tokio::test]
    async fn empty_city_short_circuits_even_with_city_and_history() {
        let provider = Arc::new(ScriptedProvider::new([set_city("   ")]));
        let orch = orchestrator(Arc::clone(&provider), Arc::new(StubWeather::default()));
        let id = ConversationId::new();
        orch.states().set_city(id, "Manaus").await;

        let request = TurnRequest {
            conversation_id: id,
            prior_messages: (0..20)
                .map(|i| StoredMessage::user(format!("mensagem {i}")))
                .collect(),
            user_text: "e agora?".to_string(),
        };
        let outcome = orch.respond(&request).await.unwrap();

        assert_eq!(outcome.reply, ASK_CITY_QUESTION);
        assert_eq!(provider.calls(), 1);
        assert_eq!(orch.states().get(id).await.city(), Some("Manaus"));
    }

    #[tokio::test]
    async fn trimmed_city_feeds_next_weather_lookup() {
        let provider = Arc::new(ScriptedProvider::new([
            set_city("  Curitiba "),
            call("getWeather"),
            text("Em Curitiba faz 18°C."),
        ]));
        let weather = Arc::new(StubWeather::default().with_city("Curitiba", 17.6, 16.4));
        let orch = orchestrator(Arc::clone(&provider), Arc::clone(&weather));
        let id = ConversationId::new();

        let outcome = orch.respond(&turn(id, "como está o tempo?")).await.unwrap();

        assert_eq!(outcome.exit, ExitReason::Done);
        assert_eq!(outcome.model_calls, 3);
        assert_eq!(weather.lookups(), vec!["Curitiba".to_string()]);
        assert_eq!(orch.states().get(id).await.city(), Some("Curitiba"));

        let requests = provider.requests();
        assert_eq!(tool_payload(&requests[1])["citySet"], "Curitiba");
        assert_eq!(tool_payload(&requests[2])["temperature"], 18);
    }

    #[tokio::test]
    async fn salvador_weather_is_rounded_and_reaches_the_model() {
        let provider = Arc::new(ScriptedProvider::new([
            call("getWeather"),
            text("Em Salvador faz 29°C, sensação de 33°C."),
        ]));
        let weather = Arc::new(StubWeather::default().with_city("Salvador", 28.7, 32.5));
        let orch = orchestrator(Arc::clone(&provider), weather);
        let id = ConversationId::new();
        orch.states().set_city(id, "Salvador").await;

        let outcome = orch.respond(&turn(id, "e a temperatura?")).await.unwrap();

        let payload = tool_payload(&provider.requests()[1]).clone();
        assert_eq!(payload["city"], "Salvador");
        assert_eq!(payload["temperature"], json!(29));
        assert_eq!(payload["feelsLike"], json!(33));
        assert!(outcome.reply.contains("Salvador"));
    }

    #[tokio::test]
    async fn unknown_city_is_fed_back_not_raised() {
        let provider = Arc::new(ScriptedProvider::new([
            call("getWeather"),
            text("Não encontrei Xyzzy."),
        ]));
        let orch = orchestrator(Arc::clone(&provider), Arc::new(StubWeather::default()));
        let id = ConversationId::new();
        orch.states().set_city(id, "Xyzzy").await;

        let outcome = orch.respond(&turn(id, "clima?")).await.unwrap();

        assert_eq!(outcome.exit, ExitReason::Done);
        assert_eq!(
            outcome.tool_invocations[0].error,
            Some(ToolErrorKind::CityNotFound)
        );
        assert_eq!(tool_payload(&provider.requests()[1])["error"], "CITY_NOT_FOUND");
    }

    #[tokio::test]
    async fn unknown_capability_is_reported_to_model() {
        let provider = Arc::new(ScriptedProvider::new([
            call("getStockPrice"),
            text("Não sei cotações."),
        ]));
        let orch = orchestrator(Arc::clone(&provider), Arc::new(StubWeather::default()));

        let outcome = orch.respond(&turn(ConversationId::new(), "PETR4?")).await.unwrap();

        assert_eq!(outcome.reply, "Não sei cotações.");
        assert_eq!(
            outcome.tool_invocations[0].error,
            Some(ToolErrorKind::UnknownCapability)
        );
        assert_eq!(
            tool_payload(&provider.requests()[1])["error"],
            "UNKNOWN_CAPABILITY"
        );
    }

    #[tokio::test]
    async fn function_call_wins_over_text_in_same_turn() {
        let mixed = GenerateResponse::from_turn(Turn::new(
            Role::Model,
            vec![
                Part::Text("Vou verificar.".into()),
                Part::FunctionCall(FunctionCall::new("getCurrentTime")),
            ],
        ));
        let provider = Arc::new(ScriptedProvider::new([mixed, text("São 12:09.")]));
        let orch = orchestrator(Arc::clone(&provider), Arc::new(StubWeather::default()));

        let outcome = orch.respond(&turn(ConversationId::new(), "hora?")).await.unwrap();

        assert_eq!(outcome.reply, "São 12:09.");
        assert_eq!(outcome.model_calls, 2);
        let second = &provider.requests()[1];
        assert_eq!(second.contents.len(), 3);
        assert_eq!(second.contents[1].role, Role::Model);
        assert_eq!(tool_payload(second)["dateTime"], "14/03/2026, 12:09:26");
    }

    #[tokio::test]
    async fn blocked_response_ends_turn_with_reason() {
        let provider = Arc::new(ScriptedProvider::new([GenerateResponse::blocked("SAFETY")]));
        let orch = orchestrator(Arc::clone(&provider), Arc::new(StubWeather::default()));

        let outcome = orch.respond(&turn(ConversationId::new(), "...")).await.unwrap();

        assert_eq!(outcome.exit, ExitReason::Blocked);
        assert_eq!(outcome.reply, EMPTY_RESPONSE_MESSAGE);
        assert_eq!(outcome.block_reason.as_deref(), Some("SAFETY"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn transport_failure_escapes_as_provider_unavailable() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::Transport {
            reason: "connection reset".into(),
        }));
        let orch = orchestrator(provider, Arc::new(StubWeather::default()));

        let err = orch
            .respond(&turn(ConversationId::new(), "oi"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            TurnError::ProviderUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn function_response_from_model_is_malformed() {
        let bogus = GenerateResponse::from_turn(Turn::tool(tempo_ai::FunctionResponse {
            name: "getWeather".into(),
            response: json!({}),
        }));
        let provider = Arc::new(ScriptedProvider::new([bogus]));
        let orch = orchestrator(provider, Arc::new(StubWeather::default()));

        let err = orch
            .respond(&turn(ConversationId::new(), "oi"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            TurnError::MalformedResponse { .. }
        ));
    }

    /// Answers from the request alone, so concurrent turns can share it.
    struct CityEcho;

    #[async_trait::async_trait]
    impl ModelProvider for CityEcho {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, Report<ProviderError>> {
            tokio::task::yield_now().await;
            let last = request.contents.last().expect("turns");
            Ok(match &last.parts[0] {
                Part::Text(text) => set_city(text.trim_start_matches("moro em ")),
                Part::FunctionResponse(r) if r.name == "setUserCity" => call("getWeather"),
                Part::FunctionResponse(r) => {
                    text(&format!("Clima em {}", r.response["city"].as_str().unwrap_or("?")))
                }
                Part::FunctionCall(_) => panic!("unexpected trailing call"),
            })
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn concurrent_conversations_keep_their_own_city() {
        let cities = ["Recife", "Porto Alegre", "Belém", "Natal"];
        let weather = cities
            .iter()
            .fold(StubWeather::default(), |w, city| w.with_city(city, 25.0, 26.0));
        let orch = Arc::new(Orchestrator::new(
            Arc::new(CityEcho),
            CapabilityRegistry::new(Arc::new(weather), Arc::new(FixedClock(Utc::now()))),
            TurnMaterializer::default(),
            OrchestratorConfig::default(),
        ));

        let tasks: Vec<_> = cities
            .into_iter()
            .map(|city| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move {
                    let id = ConversationId::new();
                    let outcome = orch
                        .respond(&turn(id, &format!("moro em {city}")))
                        .await
                        .unwrap();
                    (id, city, outcome)
                })
            })
            .collect();

        for task in tasks {
            let (id, city, outcome) = task.await.unwrap();
            assert_eq!(outcome.reply, format!("Clima em {city}"));
            assert_eq!(orch.states().get(id).await.city(), Some(city));
        }
        assert_eq!(orch.states().len(), 4);
    }

    /// Reports how many turns it was sent; tracks overlapping calls.
    #[derive(Default)]
    struct SlowCounter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ModelProvider for SlowCounter {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, Report<ProviderError>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(text(&format!("turns={}", request.contents.len())))
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    fn slow_orchestrator(provider: Arc<SlowCounter>) -> Orchestrator {
        Orchestrator::new(
            provider,
            CapabilityRegistry::new(
                Arc::new(StubWeather::default()),
                Arc::new(FixedClock(Utc::now())),
            ),
            TurnMaterializer::default(),
            OrchestratorConfig::default(),
        )
    }

    #[tokio::test]
    async fn turns_of_one_conversation_never_overlap() {
        let provider = Arc::new(SlowCounter::default());
        let orch = slow_orchestrator(Arc::clone(&provider));
        let id = ConversationId::new();

        let (turn_a, turn_b) = (turn(id, "a"), turn(id, "b"));
        let (a, b) = tokio::join!(orch.respond(&turn_a), orch.respond(&turn_b));
        a.unwrap();
        b.unwrap();

        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queued_turn_reads_history_written_by_earlier_turn() {
        let orch = slow_orchestrator(Arc::new(SlowCounter::default()));
        let id = ConversationId::new();
        let history = tokio::sync::Mutex::new(vec![
            StoredMessage::user("oi"),
            StoredMessage::assistant("Olá!"),
        ]);

        let (orch, history) = (&orch, &history);
        let run = move |user_text: &'static str| async move {
            let mut lock = orch.lock(id).await;
            let prior = history.lock().await.clone();
            let outcome = orch.respond_locked(&mut lock, &prior, user_text).await.unwrap();
            history.lock().await.extend([
                StoredMessage::user(user_text),
                StoredMessage::assistant(outcome.reply.clone()),
            ]);
            outcome.reply
        };

        let (a, b) = tokio::join!(run("a"), run("b"));
        let mut replies = vec![a, b];
        replies.sort();
        assert_eq!(replies, vec!["turns=3", "turns=5"]);
        assert_eq!(history.lock().await.len(), 6);
    }

    #[tokio::test]
    async fn generation_settings_reach_the_request() {
        let provider = Arc::new(ScriptedProvider::new([text("ok")]));
        let orch = Orchestrator::new(
            Arc::clone(&provider) as Arc<dyn ModelProvider>,
            CapabilityRegistry::new(
                Arc::new(StubWeather::default()),
                Arc::new(FixedClock(Utc::now())),
            ),
            TurnMaterializer::default(),
            OrchestratorConfig::default()
                .with_temperature(0.3)
                .with_max_output_tokens(400),
        );

        orch.respond(&turn(ConversationId::new(), "oi")).await.unwrap();

        let sent = &provider.requests()[0];
        assert_eq!(sent.temperature, Some(0.3));
        assert_eq!(sent.max_output_tokens, Some(400));
    }

    #[tokio::test]
    async fn token_count_saturates() {
        let mut heavy = call("getCurrentTime");
        heavy.usage_metadata = Some(tempo_ai::UsageMetadata {
            prompt_token_count: u32::MAX,
            candidates_token_count: 0,
        });
        let mut last = text("ok");
        last.usage_metadata = heavy.usage_metadata;
        let provider = Arc::new(ScriptedProvider::new([heavy, last]));
        let orch = orchestrator(provider, Arc::new(StubWeather::default()));

        let outcome = orch.respond(&turn(ConversationId::new(), "hora?")).await.unwrap();
        assert_eq!(outcome.tokens_used, u32::MAX);
    }

    #[tokio::test]
    async fn end_conversation_drops_state() {
        let provider = Arc::new(ScriptedProvider::new([set_city("Natal"), text("Ok!")]));
        let orch = orchestrator(provider, Arc::new(StubWeather::default()));
        let id = ConversationId::new();

        orch.respond(&turn(id, "moro em Natal")).await.unwrap();
        assert_eq!(orch.states().get(id).await.city(), Some("Natal"));

        assert!(orch.end_conversation(id));
        assert_eq!(orch.states().get(id).await.city(), None);
    }

    #[test]
    fn budget_saturates_at_max() {
        let mut budget = LoopBudget::new(2);
        budget.consume();
        budget.consume();
        budget.consume();
        assert_eq!(budget.used(), 2);
        assert!(!budget.has_remaining());
    }
}
