//! Turn-bounded execution engine
//!
//! Drives one orchestrated call against the model. Three protocols share the
//! same skeleton: open a session and a termination context, run 1..N model
//! calls, finalize the last response, then release both before returning.
//!
//! - [`ExecutionEngine::run_with_guides`]: the model may request craft guides
//!   from an enumerated catalog.
//! - [`ExecutionEngine::run_with_context`]: the model may request project
//!   context resources; ends with a forced recovery turn when the turn
//!   ceiling is hit on an unfulfilled request.
//! - [`ExecutionEngine::run_single_turn`]: one call, no resource capability.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::Instrument;

use crate::config::{Configuration, EnvironmentLoader, SessionsConfig};
use crate::observability::Logger;
use crate::orchestration::directives::{DirectiveParser, TagDirectiveParser};
use crate::orchestration::error::{OrchestrationError, OrchestrationResult};
use crate::orchestration::fulfillment::{
    assemble_context_turn, assemble_guide_turn, guide_catalog_section, guide_failure_placeholder,
    GUIDE_GROUP, RECOVERY_PROMPT, TRUNCATION_NOTE,
};
use crate::orchestration::resources::{
    ContextResourceProvider, GuideLoader, LoadedResource, StatusCallback, UsageCallback,
};
use crate::orchestration::session::{ReaperHandle, SessionGuard, SessionStore};
use crate::orchestration::termination::{compose, AbortSignal, TerminationContext};
use crate::orchestration::usage::accumulate;
use crate::provider::{collect_stream, ChatMessage, Completion, CompletionOptions, ModelClient, TokenUsage};

/// Default turn ceiling
pub const DEFAULT_MAX_TURNS: u32 = 3;

/// Default word budget for guide and context turns
pub const DEFAULT_WORD_BUDGET: usize = 50_000;

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum model calls per orchestrated call, recovery turn excluded
    pub max_turns: u32,
    /// Word ceiling for an assembled guide turn
    pub guide_word_budget: usize,
    /// Word ceiling for an assembled context-resource turn
    pub context_word_budget: usize,
    /// Wall-clock limit applied when the request sets none
    pub timeout: Option<Duration>,
    /// Offer the guide catalog at all
    pub enable_guides: bool,
    /// Sampling temperature passed to every call
    pub temperature: Option<f32>,
    /// Output token cap passed to every call
    pub max_tokens: Option<u32>,
    /// Use the streaming variant of the model client
    pub streaming: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            guide_word_budget: DEFAULT_WORD_BUDGET,
            context_word_budget: DEFAULT_WORD_BUDGET,
            timeout: None,
            enable_guides: true,
            temperature: None,
            max_tokens: None,
            streaming: false,
        }
    }
}

impl From<&Configuration> for EngineConfig {
    fn from(config: &Configuration) -> Self {
        Self {
            max_turns: config.orchestration.max_turns,
            guide_word_budget: config.orchestration.guide_word_budget,
            context_word_budget: config.orchestration.context_word_budget,
            timeout: config.orchestration.timeout_ms.map(Duration::from_millis),
            enable_guides: config.orchestration.enable_guides,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            streaming: config.llm.enable_streaming,
        }
    }
}

impl EngineConfig {
    /// Set the turn ceiling
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Set both word budgets
    pub fn with_word_budgets(mut self, guide: usize, context: usize) -> Self {
        self.guide_word_budget = guide;
        self.context_word_budget = context;
        self
    }

    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable the streaming client path
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Patch values overridden through the environment
    pub fn apply_overrides(&mut self, env: &EnvironmentLoader) {
        if let Some(max_turns) = env.max_turns() {
            self.max_turns = max_turns;
        }
        if let Some(timeout_ms) = env.timeout_ms() {
            self.timeout = Some(Duration::from_millis(timeout_ms));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> OrchestrationResult<()> {
        if self.max_turns == 0 {
            return Err(OrchestrationError::invalid_config("max_turns must be at least 1"));
        }
        if self.guide_word_budget == 0 || self.context_word_budget == 0 {
            return Err(OrchestrationError::invalid_config(
                "word budgets must be greater than 0",
            ));
        }
        self.completion_options()
            .validate()
            .map_err(|e| OrchestrationError::invalid_config(e.to_string()))
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            cancellation: None,
        }
    }
}

/// One orchestrated call as issued by a feature
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Diagnostic name of the calling feature
    pub tool_label: String,
    /// Fixed leading system message
    pub system_prompt: Option<String>,
    /// Base user prompt
    pub prompt: String,
    /// Caller-owned cancellation
    pub cancel: Option<AbortSignal>,
    /// Overrides the engine's default timeout
    pub timeout: Option<Duration>,
    /// Offer guides for this call (guide protocol only)
    pub guides_enabled: bool,
}

impl ExecutionRequest {
    /// Create a request
    pub fn new(tool_label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            tool_label: tool_label.into(),
            system_prompt: None,
            prompt: prompt.into(),
            cancel: None,
            timeout: None,
            guides_enabled: true,
        }
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Attach a caller cancellation signal
    pub fn with_cancel(mut self, signal: AbortSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Set a timeout for this call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable guide requests for this call
    pub fn without_guides(mut self) -> Self {
        self.guides_enabled = false;
        self
    }
}

/// Outcome of a successful orchestrated call
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Final content with directives stripped
    pub content: String,
    /// Guide ids as requested, or context ids actually delivered
    pub used_ids: Vec<String>,
    /// Usage summed over every call
    pub usage: Option<TokenUsage>,
    /// Model calls made
    pub turns: u32,
    /// The loop stopped at the ceiling with a request still pending
    pub turn_ceiling_reached: bool,
    /// A recovery turn was issued
    pub recovered: bool,
    /// The last call stopped at the output token cap
    pub truncated: bool,
}

/// Per-call state: owned session, termination and running totals
struct ActiveCall {
    session: SessionGuard,
    termination: TerminationContext,
    usage: Option<TokenUsage>,
    turns: u32,
}

impl ActiveCall {
    fn release(&self) {
        self.termination.release();
        self.session.release();
    }
}

/// Orchestration engine shared by all features
pub struct ExecutionEngine {
    client: Arc<dyn ModelClient>,
    sessions: SessionStore,
    config: EngineConfig,
    guide_loader: Option<Arc<dyn GuideLoader>>,
    context_provider: Option<Arc<dyn ContextResourceProvider>>,
    guide_parser: Arc<dyn DirectiveParser>,
    context_parser: Arc<dyn DirectiveParser>,
    status: Option<Arc<dyn StatusCallback>>,
    usage_callback: Option<Arc<dyn UsageCallback>>,
    logger: Option<Arc<Logger>>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("client", &self.client.name())
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl ExecutionEngine {
    /// Create an engine with a fresh session store
    pub fn new(client: Arc<dyn ModelClient>, config: EngineConfig) -> OrchestrationResult<Self> {
        config.validate()?;
        Ok(Self {
            client,
            sessions: SessionStore::new(),
            config,
            guide_loader: None,
            context_provider: None,
            guide_parser: Arc::new(TagDirectiveParser::guides()),
            context_parser: Arc::new(TagDirectiveParser::context()),
            status: None,
            usage_callback: None,
            logger: None,
        })
    }

    /// Create an engine from a loaded configuration.
    ///
    /// A transcript logger is attached when `[logging] log_file` is set.
    pub fn from_configuration(
        client: Arc<dyn ModelClient>,
        config: &Configuration,
    ) -> OrchestrationResult<Self> {
        let mut engine = Self::new(client, EngineConfig::from(config))?;
        if let Some(log_file) = &config.logging.log_file {
            let logger = Logger::new(Some(Path::new(log_file)), Some(&config.logging.log_level))
                .map_err(|e| OrchestrationError::invalid_config(format!("{:#}", e)))?;
            engine.logger = Some(Arc::new(logger));
        }
        Ok(engine)
    }

    /// Share an existing session store
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    /// Attach the guide loader
    pub fn with_guide_loader(mut self, loader: Arc<dyn GuideLoader>) -> Self {
        self.guide_loader = Some(loader);
        self
    }

    /// Attach the context resource provider
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextResourceProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    /// Replace the guide directive parser
    pub fn with_guide_parser(mut self, parser: Arc<dyn DirectiveParser>) -> Self {
        self.guide_parser = parser;
        self
    }

    /// Replace the context directive parser
    pub fn with_context_parser(mut self, parser: Arc<dyn DirectiveParser>) -> Self {
        self.context_parser = parser;
        self
    }

    /// Attach a progress callback
    pub fn with_status_callback(mut self, callback: Arc<dyn StatusCallback>) -> Self {
        self.status = Some(callback);
        self
    }

    /// Attach a per-call usage callback
    pub fn with_usage_callback(mut self, callback: Arc<dyn UsageCallback>) -> Self {
        self.usage_callback = Some(callback);
        self
    }

    /// Attach a transcript logger
    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Session store used by this engine
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the stale-session reaper on this engine's store
    pub fn start_reaper(&self, config: &SessionsConfig) -> ReaperHandle {
        self.sessions.spawn_reaper(
            Duration::from_secs(config.reaper_interval_seconds),
            Duration::from_secs(config.max_session_age_seconds),
        )
    }

    /// Run the guide protocol.
    ///
    /// Degrades to [`ExecutionEngine::run_single_turn`] when guides are
    /// disabled in the config or on the request, or no loader is attached.
    pub async fn run_with_guides(
        &self,
        request: ExecutionRequest,
    ) -> OrchestrationResult<ExecutionResult> {
        let loader = match self.guide_loader.as_deref() {
            Some(loader) if self.config.enable_guides && request.guides_enabled => loader,
            _ => {
                tracing::debug!(tool = %request.tool_label, "guides disabled, running single turn");
                return self.run_single_turn(request).await;
            }
        };

        let span = tracing::info_span!("orchestration", protocol = "guides", tool = %request.tool_label);
        async {
            let mut call = self.open(&request, "guides");
            let outcome = self.guide_protocol(&mut call, &request, loader).await;
            self.close(call, outcome)
        }
        .instrument(span)
        .await
    }

    /// Run the context resource protocol
    pub async fn run_with_context(
        &self,
        request: ExecutionRequest,
    ) -> OrchestrationResult<ExecutionResult> {
        let Some(provider) = self.context_provider.as_deref() else {
            return Err(OrchestrationError::invalid_config(
                "no context resource provider attached",
            ));
        };

        let span = tracing::info_span!("orchestration", protocol = "context", tool = %request.tool_label);
        async {
            let mut call = self.open(&request, "context");
            let outcome = self.context_protocol(&mut call, &request, provider).await;
            self.close(call, outcome)
        }
        .instrument(span)
        .await
    }

    /// Run a single model call without resource capability
    pub async fn run_single_turn(
        &self,
        request: ExecutionRequest,
    ) -> OrchestrationResult<ExecutionResult> {
        let span = tracing::info_span!("orchestration", protocol = "single", tool = %request.tool_label);
        async {
            let mut call = self.open(&request, "single");
            let outcome = self.single_protocol(&mut call, &request).await;
            self.close(call, outcome)
        }
        .instrument(span)
        .await
    }

    async fn single_protocol(
        &self,
        call: &mut ActiveCall,
        request: &ExecutionRequest,
    ) -> OrchestrationResult<ExecutionResult> {
        call.session.append(ChatMessage::user(request.prompt.clone()))?;
        let response = self.call_model(call).await?;
        let content = response.content.clone();
        Ok(self.finalize(call, &response, content, Vec::new(), false, false))
    }

    async fn guide_protocol(
        &self,
        call: &mut ActiveCall,
        request: &ExecutionRequest,
        loader: &dyn GuideLoader,
    ) -> OrchestrationResult<ExecutionResult> {
        let catalog = loader.catalog();
        let mut first_turn = request.prompt.clone();
        if !catalog.is_empty() {
            first_turn.push_str("\n\n");
            first_turn.push_str(&guide_catalog_section(&catalog));
        }
        call.session.append(ChatMessage::user(first_turn))?;

        let mut response = self.call_model(call).await?;
        let mut used_ids = Vec::new();

        while call.turns < self.config.max_turns {
            let directive = self.guide_parser.parse(&response.content);
            if !directive.wants_resources() {
                break;
            }
            let ids = directive.ids().to_vec();
            self.record_request("guide", &ids);

            let signal = call.termination.signal().clone();
            let guides = until_aborted(&signal, self.load_guides(loader, &ids)).await?;
            used_ids.extend(ids);

            let turn = assemble_guide_turn(&guides, self.config.guide_word_budget);
            if let Some(trim) = &turn.trim {
                tracing::info!(
                    original = trim.original_word_count,
                    trimmed = trim.trimmed_word_count,
                    "guide content trimmed"
                );
            }

            call.session.append(ChatMessage::assistant(response.content.clone()))?;
            call.session.append(ChatMessage::user(turn.text))?;
            response = self.call_model(call).await?;
        }

        let ceiling_reached = self.guide_parser.parse(&response.content).wants_resources();
        if ceiling_reached {
            self.record_ceiling(call);
        }
        let content = self.guide_parser.strip(&response.content);
        Ok(self.finalize(call, &response, content, used_ids, ceiling_reached, false))
    }

    async fn context_protocol(
        &self,
        call: &mut ActiveCall,
        request: &ExecutionRequest,
        provider: &dyn ContextResourceProvider,
    ) -> OrchestrationResult<ExecutionResult> {
        // The catalog is observed for diagnostics only; the prompt goes out as given.
        let catalog = provider.catalog();
        if !catalog.is_empty() {
            let listing = catalog
                .iter()
                .map(|entry| format!("- {} ({})", entry.id, entry.group))
                .collect::<Vec<_>>()
                .join("\n");
            tracing::debug!(entries = catalog.len(), "context catalog available");
            self.log_with(|logger| logger.log_custom("Context Catalog", &listing));
        }

        call.session.append(ChatMessage::user(request.prompt.clone()))?;
        let mut response = self.call_model(call).await?;
        let mut delivered = Vec::new();

        while call.turns < self.config.max_turns {
            let directive = self.context_parser.parse(&response.content);
            if !directive.wants_resources() {
                break;
            }
            let ids = directive.ids().to_vec();
            self.record_request("context", &ids);
            self.notify_status(&format!("Loading context: {}", ids.join(", ")), None);

            let signal = call.termination.signal().clone();
            let loaded = until_aborted(&signal, provider.load_many(&ids)).await?;
            if loaded.len() < ids.len() {
                tracing::debug!(requested = ids.len(), loaded = loaded.len(), "some context resources not found");
            }
            delivered.extend(loaded.iter().map(|resource| resource.id.clone()));

            let turn = assemble_context_turn(&ids, &loaded, self.config.context_word_budget);
            if let Some(trim) = &turn.trim {
                tracing::info!(
                    original = trim.original_word_count,
                    trimmed = trim.trimmed_word_count,
                    "context content trimmed"
                );
            }

            call.session.append(ChatMessage::assistant(response.content.clone()))?;
            call.session.append(ChatMessage::user(turn.text))?;
            response = self.call_model(call).await?;
        }

        // The loop only ends on a pending request once the ceiling is hit.
        let ceiling_reached = self.context_parser.parse(&response.content).wants_resources();
        let mut recovered = false;
        if ceiling_reached {
            self.record_ceiling(call);
            tracing::info!(turns = call.turns, "issuing recovery turn");
            call.session.append(ChatMessage::assistant(response.content.clone()))?;
            call.session.append(ChatMessage::user(RECOVERY_PROMPT))?;
            response = self.call_model(call).await?;
            recovered = true;
        }

        let content = self.context_parser.strip(&response.content);
        Ok(self.finalize(call, &response, content, delivered, ceiling_reached, recovered))
    }

    fn open(&self, request: &ExecutionRequest, protocol: &str) -> ActiveCall {
        let timeout = request.timeout.or(self.config.timeout);
        let termination = compose(request.cancel.as_ref(), timeout);
        let session = self
            .sessions
            .acquire(&request.tool_label, request.system_prompt.as_deref());

        tracing::info!(session_id = session.id(), max_turns = self.config.max_turns, "orchestrated call started");
        self.log_with(|logger| {
            let mut settings = HashMap::new();
            settings.insert("protocol".to_string(), serde_json::json!(protocol));
            settings.insert("session_id".to_string(), serde_json::json!(session.id()));
            settings.insert("max_turns".to_string(), serde_json::json!(self.config.max_turns));
            settings.insert(
                "timeout_ms".to_string(),
                serde_json::json!(timeout.map(|t| t.as_millis() as u64)),
            );
            logger.log_session_start(&request.tool_label, &settings)
        });

        ActiveCall {
            session,
            termination,
            usage: None,
            turns: 0,
        }
    }

    fn close(
        &self,
        call: ActiveCall,
        outcome: OrchestrationResult<ExecutionResult>,
    ) -> OrchestrationResult<ExecutionResult> {
        call.release();

        match &outcome {
            Ok(result) => {
                tracing::info!(turns = result.turns, used = result.used_ids.len(), "orchestrated call finished");
                self.log_with(|logger| logger.log_completion("finished"));
            }
            Err(OrchestrationError::Cancelled { reason }) => {
                tracing::info!(turns = call.turns, reason = %reason, "orchestrated call cancelled");
                self.log_with(|logger| logger.log_completion(&format!("cancelled: {}", reason)));
            }
            Err(e) => {
                tracing::warn!(turns = call.turns, error = %e, "orchestrated call failed");
                self.log_with(|logger| logger.log_error(&e.to_string(), None));
            }
        }
        outcome
    }

    async fn call_model(&self, call: &mut ActiveCall) -> OrchestrationResult<Completion> {
        let signal = call.termination.signal().clone();
        if signal.is_aborted() {
            return Err(OrchestrationError::cancelled(signal.reason()));
        }

        let messages = call.session.messages();
        let mut options = self.config.completion_options();
        options.cancellation = Some(signal.token());

        call.turns += 1;
        let turn = call.turns;
        tracing::debug!(turn, messages = messages.len(), client = self.client.name(), "model call");

        let completion = match until_aborted(&signal, self.request_completion(messages.clone(), &options)).await? {
            Ok(completion) => completion,
            Err(_) if signal.is_aborted() => return Err(OrchestrationError::cancelled(signal.reason())),
            Err(e) => return Err(OrchestrationError::Model(e)),
        };

        call.usage = accumulate(call.usage.take(), completion.usage.as_ref());
        if let (Some(callback), Some(delta)) = (&self.usage_callback, &completion.usage) {
            callback.notify(delta);
        }

        let finish_reason = completion.finish_reason.as_ref().map(|r| r.to_string());
        self.log_with(|logger| {
            logger.log_model_call(turn, &messages, &completion.content, finish_reason.as_deref())
        });

        Ok(completion)
    }

    async fn request_completion(
        &self,
        messages: Vec<ChatMessage>,
        options: &CompletionOptions,
    ) -> anyhow::Result<Completion> {
        if self.config.streaming {
            let stream = self.client.complete_stream(messages, options).await?;
            collect_stream(stream).await
        } else {
            self.client.complete(messages, options).await
        }
    }

    async fn load_guides(&self, loader: &dyn GuideLoader, ids: &[String]) -> Vec<LoadedResource> {
        let loads = ids.iter().map(|id| async move {
            self.notify_status(&format!("Loading guide: {}", id), Some(id.as_str()));
            match loader.load(id).await {
                Ok(content) => LoadedResource::new(id.as_str(), content, GUIDE_GROUP),
                Err(e) => {
                    tracing::warn!(guide = %id, error = %e, "guide failed to load");
                    LoadedResource::new(id.as_str(), guide_failure_placeholder(id, &e), GUIDE_GROUP)
                }
            }
        });
        join_all(loads).await
    }

    fn finalize(
        &self,
        call: &ActiveCall,
        last: &Completion,
        mut content: String,
        used_ids: Vec<String>,
        turn_ceiling_reached: bool,
        recovered: bool,
    ) -> ExecutionResult {
        let truncated = last.is_truncated();
        if truncated {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(TRUNCATION_NOTE);
        }

        ExecutionResult {
            content,
            used_ids,
            usage: call.usage.clone(),
            turns: call.turns,
            turn_ceiling_reached,
            recovered,
            truncated,
        }
    }

    fn record_request(&self, kind: &str, ids: &[String]) {
        tracing::info!(kind, ids = ?ids, "resource request");
        self.log_with(|logger| logger.log_resource_request(kind, ids));
    }

    fn record_ceiling(&self, call: &ActiveCall) {
        tracing::warn!(turns = call.turns, max_turns = self.config.max_turns, "turn ceiling reached with a pending request");
        self.log_with(|logger| logger.log_turn_ceiling(self.config.max_turns));
    }

    fn notify_status(&self, message: &str, ticker: Option<&str>) {
        if let Some(status) = &self.status {
            status.notify(message, ticker);
        }
    }

    fn log_with<F>(&self, write: F)
    where
        F: FnOnce(&Logger) -> anyhow::Result<()>,
    {
        if let Some(logger) = &self.logger {
            if let Err(e) = write(logger) {
                tracing::warn!(error = %e, "failed to write orchestration log");
            }
        }
    }
}

/// Run `future` unless `signal` fires first
async fn until_aborted<F: Future>(signal: &AbortSignal, future: F) -> OrchestrationResult<F::Output> {
    tokio::select! {
        biased;
        _ = signal.aborted() => Err(OrchestrationError::cancelled(signal.reason())),
        output = future => Ok(output),
    }
}
