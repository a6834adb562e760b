//! The completion orchestrator: one inbound message in, a stream of output
//! chunks out.
//!
//! A turn runs as:
//!
//! 1. **Classify** the text (system prompt, direct plugin call, user message)
//! 2. **Budget check**: if the last reported token usage is above the
//!    high-water mark, evict a few early assistant replies
//! 3. **Complete**: send the conversation; on a context overflow drop the
//!    oldest message and retry a bounded number of times
//! 4. **Emit** the reply (and token counts when verbose)
//! 5. **Directive?** If the reply asks a plugin, dispatch the query, append
//!    the answer, emit its snapshot, wait out the plugin spacing and go back
//!    to 3. Otherwise the turn is over.
//!
//! Plugin rounds are capped per turn. Turns on the same session are
//! serialized by a per-session lock; different sessions run concurrently.

use crate::directive::{DirectiveParse, parse_directive};
use crate::input::{Input, classify};
use crate::snapshot::SnapshotPolicy;
use crate::stream_event::OutputChunk;
use chatrelay_config::AppConfig;
use chatrelay_core::error::{PluginError, StoreError};
use chatrelay_core::message::{Conversation, ConversationId, Message, Role};
use chatrelay_core::plugin::{PluginKind, PluginRegistry};
use chatrelay_core::provider::{Provider, ProviderRequest, ProviderResponse};
use chatrelay_core::store::ConversationStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stands in for an empty plugin answer, both in the conversation and in
/// the delivered snapshot.
pub const QUERY_FAILED: &str = "query failed";

const OUTPUT_BUFFER: usize = 32;

/// Tunables for the completion loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub temperature: f32,
    /// Token usage above which early replies are evicted.
    pub high_water_mark: u32,
    pub max_evictions: usize,
    /// Trailing positions eviction never touches.
    pub protected_tail: usize,
    pub overflow_retries: u32,
    /// Overflow truncation only happens above this many messages.
    pub overflow_min_messages: usize,
    pub overflow_retry_delay: Duration,
    pub max_plugin_rounds: u32,
    /// Minimum time from a plugin query to the next completion request.
    pub plugin_spacing: Duration,
    pub snapshot: SnapshotPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let o = &config.orchestrator;
        Self {
            model: config.completion.model.clone(),
            temperature: config.completion.temperature,
            high_water_mark: config.high_water_mark(),
            max_evictions: o.max_evictions,
            protected_tail: o.protected_tail,
            overflow_retries: o.overflow_retries,
            overflow_min_messages: o.overflow_min_messages,
            overflow_retry_delay: Duration::from_millis(o.overflow_retry_delay_ms),
            max_plugin_rounds: o.max_plugin_rounds,
            plugin_spacing: Duration::from_millis(o.plugin_spacing_ms),
            snapshot: SnapshotPolicy::from_config(o),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model gave an answer without a directive.
    Final { rounds: u32 },
    SystemPromptSet,
    DirectPlugin,
    /// The model kept asking plugins past the round cap.
    MaxRoundsExceeded { rounds: u32 },
    /// A completion, plugin or store error ended the turn.
    Failed(String),
    /// The output receiver was dropped mid-turn.
    ConsumerGone,
}

/// Early exit from a turn.
enum Stop {
    ConsumerGone,
    Failed(String),
}

impl From<Stop> for TurnOutcome {
    fn from(stop: Stop) -> Self {
        match stop {
            Stop::ConsumerGone => Self::ConsumerGone,
            Stop::Failed(reason) => Self::Failed(reason),
        }
    }
}

struct Emitter {
    tx: mpsc::Sender<OutputChunk>,
}

impl Emitter {
    async fn emit(&self, chunk: OutputChunk) -> Result<(), Stop> {
        self.tx.send(chunk).await.map_err(|_| Stop::ConsumerGone)
    }

    /// Report a failure to the consumer and end the turn with it.
    async fn fail(&self, reason: String) -> Stop {
        match self.emit(OutputChunk::Error(reason.clone())).await {
            Ok(()) => Stop::Failed(reason),
            Err(stop) => stop,
        }
    }
}

/// A plugin answer appended during the current turn.
struct PluginAnswer {
    plugin: String,
    kind: PluginKind,
    answer: String,
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    plugins: Arc<PluginRegistry>,
    store: Arc<dyn ConversationStore>,
    settings: OrchestratorSettings,
    sessions: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        plugins: Arc<PluginRegistry>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            provider,
            plugins,
            store,
            settings: OrchestratorSettings::default(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Start a turn in the background and return its output stream.
    ///
    /// The stream closes when the turn ends. Dropping the receiver abandons
    /// the turn at its next output.
    pub fn send_message(
        self: &Arc<Self>,
        session: ConversationId,
        text: impl Into<String>,
    ) -> mpsc::Receiver<OutputChunk> {
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let this = Arc::clone(self);
        let text = text.into();
        tokio::spawn(async move {
            this.run_turn(&session, &text, tx).await;
        });
        rx
    }

    /// Run one turn to completion, writing its output to `tx`.
    pub async fn run_turn(
        &self,
        session: &ConversationId,
        text: &str,
        tx: mpsc::Sender<OutputChunk>,
    ) -> TurnOutcome {
        let emitter = Emitter { tx };

        let result = match classify(text) {
            Input::DirectPlugin { plugin, query } => {
                self.direct_plugin(session, &plugin, &query, &emitter).await
            }
            Input::SystemPrompt(prompt) => {
                let lock = self.session_lock(session).await;
                let _guard = lock.lock().await;
                self.set_system_prompt(session, prompt, &emitter).await
            }
            Input::User(text) => {
                let lock = self.session_lock(session).await;
                let _guard = lock.lock().await;
                self.user_turn(session, text, &emitter).await
            }
        };
        let outcome = result.unwrap_or_else(TurnOutcome::from);

        match &outcome {
            TurnOutcome::Final { rounds } => info!(%session, rounds, "Turn finished"),
            TurnOutcome::MaxRoundsExceeded { rounds } => {
                warn!(%session, rounds, "Turn stopped at the plugin round cap")
            }
            TurnOutcome::Failed(reason) => warn!(%session, %reason, "Turn failed"),
            TurnOutcome::ConsumerGone => info!(%session, "Output consumer gone, turn abandoned"),
            other => debug!(%session, outcome = ?other, "Turn finished"),
        }
        outcome
    }

    /// Delete a session's conversation and release its plugin state.
    pub async fn reset(&self, session: &ConversationId) -> Result<bool, StoreError> {
        let lock = self.session_lock(session).await;
        let guard = lock.lock().await;
        let existed = self.store.delete(session).await;
        if existed.is_ok() {
            self.plugins.end_session(session).await;
        }
        drop(guard);

        // Forget the lock unless another turn is already queued on it.
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(session)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2)
        {
            sessions.remove(session);
        }
        drop(sessions);

        let existed = existed?;
        info!(%session, existed, "Conversation reset");
        Ok(existed)
    }

    /// Flip a session's verbose flag, returning the new value.
    pub async fn toggle_verbose(&self, session: &ConversationId) -> Result<bool, StoreError> {
        let lock = self.session_lock(session).await;
        let _guard = lock.lock().await;
        let mut conv = self.store.get_or_new(session).await?;
        conv.verbose = !conv.verbose;
        let verbose = conv.verbose;
        self.store.put(conv).await?;
        Ok(verbose)
    }

    async fn session_lock(&self, session: &ConversationId) -> Arc<Mutex<()>> {
        self.sessions
            .lock()
            .await
            .entry(session.clone())
            .or_default()
            .clone()
    }

    async fn load(&self, session: &ConversationId, em: &Emitter) -> Result<Conversation, Stop> {
        match self.store.get_or_new(session).await {
            Ok(conv) => Ok(conv),
            Err(e) => Err(em.fail(format!("Could not load conversation: {e}")).await),
        }
    }

    async fn save(&self, conv: Conversation) {
        let session = conv.id.clone();
        if let Err(e) = self.store.put(conv).await {
            warn!(%session, error = %e, "Failed to save conversation");
        }
    }

    async fn set_system_prompt(
        &self,
        session: &ConversationId,
        prompt: String,
        em: &Emitter,
    ) -> Result<TurnOutcome, Stop> {
        if prompt.is_empty() {
            return Err(em.fail("Usage: /system <prompt>".into()).await);
        }
        let mut conv = self.load(session, em).await?;
        conv.push(Message::system(prompt));
        self.save(conv).await;
        info!(%session, "Set system prompt");
        em.emit(OutputChunk::Info("Added system prompt".into()))
            .await?;
        Ok(TurnOutcome::SystemPromptSet)
    }

    async fn user_turn(
        &self,
        session: &ConversationId,
        text: String,
        em: &Emitter,
    ) -> Result<TurnOutcome, Stop> {
        let mut conv = self.load(session, em).await?;
        conv.push(Message::user(text));
        let result = self.drive(&mut conv, em).await;
        self.save(conv).await;
        result
    }

    async fn direct_plugin(
        &self,
        session: &ConversationId,
        name: &str,
        query: &str,
        em: &Emitter,
    ) -> Result<TurnOutcome, Stop> {
        let Some(plugin) = self.plugins.get(name).cloned() else {
            return Err(em.fail(PluginError::UnknownPlugin(name.into()).to_string()).await);
        };
        info!(%session, plugin = plugin.name(), "Direct plugin query");

        match plugin.send(session, query).await {
            Ok(answer) if answer.trim().is_empty() => {
                em.emit(OutputChunk::Info(plugin_message(plugin.name(), QUERY_FAILED)))
                    .await?
            }
            Ok(answer) => em.emit(OutputChunk::Text(answer.trim().to_string())).await?,
            Err(e) => {
                return Err(em.fail(format!("{} query failed: {e}", plugin.name())).await);
            }
        }
        Ok(TurnOutcome::DirectPlugin)
    }

    /// The completion loop for a conversation whose last message is the
    /// user's. However the turn ends, its plugin answers are condensed in
    /// the history.
    async fn drive(&self, conv: &mut Conversation, em: &Emitter) -> Result<TurnOutcome, Stop> {
        let mut answers = Vec::new();
        let result = self.plugin_rounds(conv, em, &mut answers).await;
        self.condense(conv, &answers);
        result
    }

    async fn plugin_rounds(
        &self,
        conv: &mut Conversation,
        em: &Emitter,
        answers: &mut Vec<PluginAnswer>,
    ) -> Result<TurnOutcome, Stop> {
        self.enforce_budget(conv, em).await?;

        let mut rounds = 0;

        loop {
            let response = self.complete(conv, em).await?;
            let usage = response.usage;
            let reply = response.message.content.clone();

            conv.record_usage(usage.prompt_tokens, usage.completion_tokens);
            conv.push(response.message);

            if !reply.trim().is_empty() {
                em.emit(OutputChunk::Text(reply.clone())).await?;
            }
            if conv.verbose {
                em.emit(OutputChunk::Info(format!(
                    "Tokens: {} => {}",
                    usage.prompt_tokens, usage.completion_tokens
                )))
                .await?;
            }

            let DirectiveParse::Directive { plugin, query } = parse_directive(&reply) else {
                return Ok(TurnOutcome::Final { rounds });
            };

            if rounds >= self.settings.max_plugin_rounds {
                em.emit(OutputChunk::Error(format!(
                    "Stopped after {rounds} plugin rounds without a final answer."
                )))
                .await?;
                return Ok(TurnOutcome::MaxRoundsExceeded { rounds });
            }
            rounds += 1;

            answers.push(self.dispatch(conv, &plugin, &query, em).await?);
        }
    }

    async fn enforce_budget(&self, conv: &mut Conversation, em: &Emitter) -> Result<(), Stop> {
        if conv.total_tokens <= self.settings.high_water_mark {
            return Ok(());
        }
        let removed =
            conv.evict_assistant_messages(self.settings.max_evictions, self.settings.protected_tail);
        if removed == 0 {
            return Ok(());
        }
        info!(
            session = %conv.id,
            tokens = conv.total_tokens,
            removed,
            "Conversation getting too long, evicted earliest replies"
        );
        if conv.verbose {
            em.emit(OutputChunk::Info(format!(
                "Conversation getting too long, deleted {removed} earliest replies"
            )))
            .await?;
        }
        Ok(())
    }

    async fn complete(
        &self,
        conv: &mut Conversation,
        em: &Emitter,
    ) -> Result<ProviderResponse, Stop> {
        let mut truncations = 0;
        loop {
            let request = ProviderRequest::new(
                self.settings.model.clone(),
                conv.messages.clone(),
                self.settings.temperature,
            );
            debug!(session = %conv.id, messages = conv.len(), "Requesting completion");

            match self.provider.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e)
                    if e.is_bad_request()
                        && conv.len() > self.settings.overflow_min_messages
                        && truncations < self.settings.overflow_retries =>
                {
                    truncations += 1;
                    conv.drop_oldest_non_system();
                    warn!(
                        session = %conv.id,
                        error = %e,
                        messages = conv.len(),
                        "Max tokens exceeded, deleted earliest message"
                    );
                    if conv.verbose {
                        em.emit(OutputChunk::Info(
                            "Max tokens exceeded, deleted earliest message".into(),
                        ))
                        .await?;
                    }
                    tokio::time::sleep(self.settings.overflow_retry_delay).await;
                }
                Err(e) => {
                    warn!(session = %conv.id, error = %e, "Completion failed");
                    return Err(em.fail(e.to_string()).await);
                }
            }
        }
    }

    async fn dispatch(
        &self,
        conv: &mut Conversation,
        name: &str,
        query: &str,
        em: &Emitter,
    ) -> Result<PluginAnswer, Stop> {
        let started = Instant::now();

        let Some(plugin) = self.plugins.get(name).cloned() else {
            warn!(session = %conv.id, plugin = name, "Model asked for an unknown plugin");
            return Err(em.fail(PluginError::UnknownPlugin(name.into()).to_string()).await);
        };
        info!(session = %conv.id, plugin = plugin.name(), query, "Dispatching plugin query");

        let answer = match plugin.send(&conv.id, query).await {
            Ok(answer) => answer.trim().to_string(),
            Err(e) => {
                warn!(session = %conv.id, plugin = plugin.name(), error = %e, "Plugin failed");
                return Err(em.fail(format!("{} query failed: {e}", plugin.name())).await);
            }
        };

        let answer = if answer.is_empty() {
            QUERY_FAILED.to_string()
        } else {
            answer
        };
        let shown = if conv.verbose {
            answer.clone()
        } else {
            self.settings.snapshot.apply(&answer, plugin.kind())
        };

        conv.push(Message::assistant(plugin_message(plugin.name(), &answer)));
        em.emit(OutputChunk::Info(plugin_message(plugin.name(), &shown)))
            .await?;

        tokio::time::sleep_until(started + self.settings.plugin_spacing).await;

        Ok(PluginAnswer {
            plugin: plugin.name().to_string(),
            kind: plugin.kind(),
            answer,
        })
    }

    /// Replace this turn's long plugin answers with their snapshots so they
    /// stop weighing on later turns.
    fn condense(&self, conv: &mut Conversation, answers: &[PluginAnswer]) {
        for a in answers {
            let snapshot = self.settings.snapshot.apply(&a.answer, a.kind);
            if snapshot == a.answer {
                continue;
            }
            let full = plugin_message(&a.plugin, &a.answer);
            let Some(index) = conv
                .messages
                .iter()
                .position(|m| m.role == Role::Assistant && m.content == full)
            else {
                continue;
            };
            conv.replace_message(index, Message::assistant(plugin_message(&a.plugin, &snapshot)));
            debug!(session = %conv.id, plugin = %a.plugin, index, "Condensed plugin answer");
        }
    }
}

fn plugin_message(plugin: &str, answer: &str) -> String {
    format!("{plugin} answered:\n\n{answer}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatrelay_core::error::ProviderError;
    use chatrelay_core::plugin::Plugin;
    use chatrelay_core::provider::Usage;
    use chatrelay_memory::InMemoryStore;
    use std::collections::VecDeque;

    type Reply = Result<ProviderResponse, ProviderError>;

    /// Replays a fixed script of completions and records every request.
    struct ScriptedProvider {
        script: std::sync::Mutex<VecDeque<Reply>>,
        requests: std::sync::Mutex<Vec<ProviderRequest>>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                requests: std::sync::Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn replies(texts: &[&str]) -> Arc<Self> {
            Self::new(texts.iter().map(|t| reply(t, 10, 5)).collect())
        }

        fn slow(texts: &[&str], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(texts.iter().map(|t| reply(t, 10, 5)).collect()),
                requests: std::sync::Mutex::new(Vec::new()),
                delay,
            })
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn reply(text: &str, prompt: u32, completion: u32) -> Reply {
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            },
            model: "scripted".into(),
        })
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted".into(),
                })
            })
        }
    }

    /// Answers every query with the same text (or fails when `answer` is None).
    struct StaticPlugin {
        name: &'static str,
        kind: PluginKind,
        answer: Option<String>,
        queries: std::sync::Mutex<Vec<String>>,
        ended: std::sync::Mutex<Vec<ConversationId>>,
    }

    impl StaticPlugin {
        fn new(name: &'static str, kind: PluginKind, answer: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                kind,
                answer: answer.map(String::from),
                queries: std::sync::Mutex::new(Vec::new()),
                ended: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Plugin for StaticPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> PluginKind {
            self.kind
        }

        fn description(&self) -> &str {
            "test plugin"
        }

        async fn send(&self, _session: &ConversationId, query: &str) -> Result<String, PluginError> {
            self.queries.lock().unwrap().push(query.to_string());
            self.answer.clone().ok_or_else(|| PluginError::Decode {
                plugin: self.name.into(),
                reason: "service unavailable".into(),
            })
        }

        async fn end_session(&self, session: &ConversationId) {
            self.ended.lock().unwrap().push(session.clone());
        }
    }

    fn setup(
        provider: Arc<ScriptedProvider>,
        plugins: Vec<Arc<StaticPlugin>>,
    ) -> (Orchestrator, Arc<InMemoryStore>) {
        let mut registry = PluginRegistry::new();
        for plugin in plugins {
            registry.register(plugin);
        }
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(provider, Arc::new(registry), store.clone());
        (orchestrator, store)
    }

    async fn run(
        orchestrator: &Orchestrator,
        session: &ConversationId,
        text: &str,
    ) -> (TurnOutcome, Vec<OutputChunk>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = orchestrator.run_turn(session, text, tx).await;
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        (outcome, chunks)
    }

    fn history(roles_and_text: &[(Role, &str)]) -> Conversation {
        let mut conv = Conversation::new(1);
        for (role, text) in roles_and_text {
            conv.push(Message {
                role: *role,
                content: text.to_string(),
            });
        }
        conv
    }

    #[tokio::test]
    async fn hello_on_fresh_session() {
        let provider = ScriptedProvider::replies(&["Hi there!"]);
        let (orch, store) = setup(provider.clone(), vec![]);
        let session = ConversationId::from(1);

        let (outcome, chunks) = run(&orch, &session, "Hello").await;

        assert_eq!(outcome, TurnOutcome::Final { rounds: 0 });
        assert_eq!(chunks, vec![OutputChunk::Text("Hi there!".into())]);
        assert_eq!(provider.requests().len(), 1);

        let conv = store.get(&session).await.unwrap().unwrap();
        assert_eq!(conv.messages, vec![Message::user("Hello"), Message::assistant("Hi there!")]);
        assert_eq!(conv.total_tokens, 15);
    }

    #[tokio::test]
    async fn system_prompt_is_stored_without_completion() {
        let provider = ScriptedProvider::replies(&[]);
        let (orch, store) = setup(provider.clone(), vec![]);
        let session = ConversationId::from(1);

        let (outcome, chunks) = run(&orch, &session, "/system   Be brief.  ").await;

        assert_eq!(outcome, TurnOutcome::SystemPromptSet);
        assert_eq!(chunks, vec![OutputChunk::Info("Added system prompt".into())]);
        assert!(provider.requests().is_empty());
        let conv = store.get(&session).await.unwrap().unwrap();
        assert_eq!(conv.first_system(), Some("Be brief."));
    }

    #[tokio::test]
    async fn empty_system_prompt_is_rejected() {
        let (orch, store) = setup(ScriptedProvider::replies(&[]), vec![]);
        let session = ConversationId::from(1);
        let (outcome, chunks) = run(&orch, &session, "/system").await;
        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert!(chunks[0].is_error());
        assert!(store.get(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verbose_reports_tokens() {
        let (orch, store) = setup(ScriptedProvider::replies(&["Sure."]), vec![]);
        let session = ConversationId::from(1);
        assert!(orch.toggle_verbose(&session).await.unwrap());

        let (_, chunks) = run(&orch, &session, "Hello").await;
        assert_eq!(
            chunks,
            vec![
                OutputChunk::Text("Sure.".into()),
                OutputChunk::Info("Tokens: 10 => 5".into()),
            ]
        );
        assert!(store.get(&session).await.unwrap().unwrap().verbose);
    }

    #[tokio::test(start_paused = true)]
    async fn directive_round_trip() {
        let provider = ScriptedProvider::replies(&["ℹ️ Ask Bing: weather", "It's sunny in Paris."]);
        let bing = StaticPlugin::new("Bing", PluginKind::Search, Some("[Paris](https://w.example) 20C, sunny"));
        let (orch, store) = setup(provider.clone(), vec![bing.clone()]);
        let session = ConversationId::from(1);

        let started = Instant::now();
        let (outcome, chunks) = run(&orch, &session, "Weather in Paris?").await;

        assert_eq!(outcome, TurnOutcome::Final { rounds: 1 });
        assert_eq!(bing.queries(), vec!["weather"]);
        assert_eq!(
            chunks,
            vec![
                OutputChunk::Text("ℹ️ Ask Bing: weather".into()),
                OutputChunk::Info("Bing answered:\n\n[Paris](https://w.example) 20C, sunny".into()),
                OutputChunk::Text("It's sunny in Paris.".into()),
            ]
        );

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let fed_back = requests[1].messages.last().unwrap();
        assert_eq!(fed_back.role, Role::Assistant);
        assert!(fed_back.content.contains("20C, sunny"));

        let conv = store.get(&session).await.unwrap().unwrap();
        assert_eq!(conv.len(), 4);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn plugin_names_are_case_insensitive() {
        let provider = ScriptedProvider::replies(&["ℹ️ Ask wolfram: 2+2", "4"]);
        let wolfram = StaticPlugin::new("Wolfram", PluginKind::Knowledge, Some("Result: 4"));
        let (orch, _) = setup(provider, vec![wolfram.clone()]);
        let (outcome, _) = run(&orch, &ConversationId::from(1), "2+2?").await;
        assert_eq!(outcome, TurnOutcome::Final { rounds: 1 });
        assert_eq!(wolfram.queries(), vec!["2+2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_answer_becomes_query_failed() {
        let provider = ScriptedProvider::replies(&["ℹ️ Ask Bing: weather", "Sorry, no data."]);
        let bing = StaticPlugin::new("Bing", PluginKind::Search, Some(""));
        let (orch, _) = setup(provider.clone(), vec![bing]);

        let (outcome, chunks) = run(&orch, &ConversationId::from(1), "Weather?").await;

        assert_eq!(outcome, TurnOutcome::Final { rounds: 1 });
        assert_eq!(chunks[1], OutputChunk::Info(format!("Bing answered:\n\n{QUERY_FAILED}")));
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages.last().unwrap().content.ends_with(QUERY_FAILED));
    }

    #[tokio::test]
    async fn unknown_plugin_ends_turn() {
        let provider = ScriptedProvider::replies(&["ℹ️ Ask Oracle: future", "unused"]);
        let (orch, _) = setup(provider.clone(), vec![]);

        let (outcome, chunks) = run(&orch, &ConversationId::from(1), "?").await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(provider.requests().len(), 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], OutputChunk::Error("Unknown plugin: Oracle".into()));
    }

    #[tokio::test]
    async fn plugin_error_ends_turn() {
        let provider = ScriptedProvider::replies(&["ℹ️ Ask Bing: x", "unused"]);
        let bing = StaticPlugin::new("Bing", PluginKind::Search, None);
        let (orch, _) = setup(provider.clone(), vec![bing]);

        let (outcome, chunks) = run(&orch, &ConversationId::from(1), "?").await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert!(chunks.last().unwrap().text().starts_with("Bing query failed"));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn plugin_rounds_are_capped() {
        let provider = ScriptedProvider::replies(&[
            "ℹ️ Ask Bing: a",
            "ℹ️ Ask Bing: b",
            "ℹ️ Ask Bing: c",
            "never reached",
        ]);
        let bing = StaticPlugin::new("Bing", PluginKind::Search, Some("[x](y)"));
        let (orch, _) = setup(provider.clone(), vec![bing.clone()]);
        let settings = OrchestratorSettings {
            max_plugin_rounds: 2,
            ..OrchestratorSettings::default()
        };
        let orch = orch.with_settings(settings);

        let (outcome, chunks) = run(&orch, &ConversationId::from(1), "loop").await;

        assert_eq!(outcome, TurnOutcome::MaxRoundsExceeded { rounds: 2 });
        assert_eq!(bing.queries(), vec!["a", "b"]);
        assert_eq!(provider.requests().len(), 3);
        assert!(chunks.last().unwrap().is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn context_overflow_drops_oldest_and_retries() {
        let mut prior = vec![(Role::System, "sys")];
        for i in 1..=4 {
            prior.push((Role::User, ["u1", "u2", "u3", "u4"][i - 1]));
            prior.push((Role::Assistant, ["a1", "a2", "a3", "a4"][i - 1]));
        }
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::ContextLengthExceeded(
                "This model's maximum context length is 8192 tokens".into(),
            )),
            reply("Done.", 10, 5),
        ]);
        let (orch, store) = setup(provider.clone(), vec![]);
        store.put(history(&prior)).await.unwrap();

        let (outcome, chunks) = run(&orch, &ConversationId::from(1), "next").await;

        assert_eq!(outcome, TurnOutcome::Final { rounds: 0 });
        assert_eq!(chunks, vec![OutputChunk::Text("Done.".into())]);
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 10);
        assert_eq!(requests[1].messages.len(), 9);
        assert_eq!(requests[1].messages[0].content, "sys");
        assert_eq!(requests[1].messages[1].content, "a1");
    }

    #[tokio::test]
    async fn overflow_on_short_conversation_is_an_error() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::ContextLengthExceeded(
            "too many tokens".into(),
        ))]);
        let (orch, store) = setup(provider.clone(), vec![]);
        let session = ConversationId::from(1);

        let (outcome, chunks) = run(&orch, &session, "a very long message").await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_error());
        assert_eq!(provider.requests().len(), 1);
        // The user message stays in the history.
        assert_eq!(store.get(&session).await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn budget_eviction_removes_at_most_two_early_replies() {
        let prior = [
            (Role::System, "sys"),
            (Role::User, "u1"),
            (Role::Assistant, "a1"),
            (Role::User, "u2"),
            (Role::Assistant, "a2"),
            (Role::User, "u3"),
            (Role::Assistant, "a3"),
            (Role::User, "u4"),
            (Role::Assistant, "a4"),
            (Role::User, "u5"),
            (Role::Assistant, "a5"),
            (Role::User, "u6"),
        ];
        let mut conv = history(&prior);
        conv.record_usage(7000, 1000);
        let provider = ScriptedProvider::replies(&["ok"]);
        let (orch, store) = setup(provider.clone(), vec![]);
        store.put(conv).await.unwrap();

        run(&orch, &ConversationId::from(1), "next").await;

        let sent: Vec<String> = provider.requests()[0]
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(sent.len(), 11);
        assert!(!sent.contains(&"a1".to_string()));
        assert!(!sent.contains(&"a2".to_string()));
        assert!(sent.contains(&"a3".to_string()));
        assert_eq!(&sent[5..], ["u4", "a4", "u5", "a5", "u6", "next"]);
    }

    #[tokio::test]
    async fn no_eviction_under_high_water_mark() {
        let mut conv = history(&[(Role::User, "u1"), (Role::Assistant, "a1")]);
        conv.record_usage(100, 20);
        let provider = ScriptedProvider::replies(&["ok"]);
        let (orch, store) = setup(provider.clone(), vec![]);
        store.put(conv).await.unwrap();

        run(&orch, &ConversationId::from(1), "next").await;
        assert_eq!(provider.requests()[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn direct_plugin_bypasses_conversation() {
        let provider = ScriptedProvider::replies(&[]);
        let wolfram = StaticPlugin::new("Wolfram", PluginKind::Knowledge, Some("Result: 42\n"));
        let (orch, store) = setup(provider.clone(), vec![wolfram.clone()]);

        let (outcome, chunks) = run(&orch, &ConversationId::from(1), "!wolfram 6 * 7").await;

        assert_eq!(outcome, TurnOutcome::DirectPlugin);
        assert_eq!(chunks, vec![OutputChunk::Text("Result: 42".into())]);
        assert_eq!(wolfram.queries(), vec!["6 * 7"]);
        assert!(provider.requests().is_empty());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_unknown_plugin_is_an_error() {
        let (orch, _) = setup(ScriptedProvider::replies(&[]), vec![]);
        let (outcome, chunks) = run(&orch, &ConversationId::from(1), "!nope hi").await;
        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(chunks, vec![OutputChunk::Error("Unknown plugin: nope".into())]);
    }

    #[tokio::test]
    async fn dropped_consumer_stops_turn_but_keeps_history() {
        let provider = ScriptedProvider::replies(&["ℹ️ Ask Bing: x", "unused"]);
        let bing = StaticPlugin::new("Bing", PluginKind::Search, Some("[a](b)"));
        let (orch, store) = setup(provider.clone(), vec![bing.clone()]);
        let session = ConversationId::from(1);

        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let outcome = orch.run_turn(&session, "Hello", tx).await;

        assert_eq!(outcome, TurnOutcome::ConsumerGone);
        assert!(bing.queries().is_empty());
        assert_eq!(store.get(&session).await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_conversation_and_plugin_state() {
        let bing = StaticPlugin::new("Bing", PluginKind::Search, Some(""));
        let (orch, store) = setup(ScriptedProvider::replies(&["hi"]), vec![bing.clone()]);
        let session = ConversationId::from(9);
        run(&orch, &session, "Hello").await;

        assert!(orch.reset(&session).await.unwrap());
        assert!(store.get(&session).await.unwrap().is_none());
        assert_eq!(*bing.ended.lock().unwrap(), vec![session.clone()]);
        assert!(!orch.reset(&session).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn long_answers_are_snapshotted_then_condensed() {
        let long: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let provider = ScriptedProvider::replies(&["ℹ️ Ask Python: print_lines()", "Printed."]);
        let python = StaticPlugin::new("Python", PluginKind::Code, Some(&long));
        let (orch, store) = setup(provider.clone(), vec![python]);
        let session = ConversationId::from(1);

        let (_, chunks) = run(&orch, &session, "Go").await;

        // Delivered as a snapshot...
        assert!(chunks[1].text().contains("more lines"));
        // ...fed back to the model in full...
        let fed_back = &provider.requests()[1].messages[2].content;
        assert!(fed_back.contains("line 50"));
        // ...and condensed in the stored history afterwards.
        let conv = store.get(&session).await.unwrap().unwrap();
        assert!(!conv.messages[2].content.contains("line 50"));
        assert!(conv.messages[2].content.contains("more lines"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_answers_are_condensed_when_the_turn_fails() {
        let long: String = (0..100).map(|i| format!("line {i}\n")).collect();
        // The follow-up completion fails: the script runs out.
        let provider = ScriptedProvider::replies(&["ℹ️ Ask Python: print_lines()"]);
        let python = StaticPlugin::new("Python", PluginKind::Code, Some(&long));
        let (orch, store) = setup(provider.clone(), vec![python]);
        let session = ConversationId::from(1);

        let (outcome, chunks) = run(&orch, &session, "Go").await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert!(chunks.last().unwrap().is_error());
        assert_eq!(provider.requests().len(), 2);
        let conv = store.get(&session).await.unwrap().unwrap();
        assert_eq!(conv.len(), 3);
        assert!(!conv.messages[2].content.contains("line 50"));
        assert!(conv.messages[2].content.contains("more lines"));
    }

    #[tokio::test]
    async fn reset_forgets_the_session_lock() {
        let (orch, _) = setup(ScriptedProvider::replies(&["hi"]), vec![]);
        let session = ConversationId::from(3);
        run(&orch, &session, "Hello").await;
        assert_eq!(orch.sessions.lock().await.len(), 1);

        orch.reset(&session).await.unwrap();
        assert!(orch.sessions.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn turns_on_one_session_are_serialized() {
        let provider = ScriptedProvider::slow(&["one", "two"], Duration::from_millis(200));
        let (orch, _) = setup(provider.clone(), vec![]);
        let orch = Arc::new(orch);
        let session = ConversationId::from(1);

        let mut first = orch.send_message(session.clone(), "first");
        let mut second = orch.send_message(session.clone(), "second");
        while first.recv().await.is_some() {}
        while second.recv().await.is_some() {}

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        // The second turn saw the first turn's exchange.
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_run_independently() {
        let provider = ScriptedProvider::slow(&["one", "two"], Duration::from_millis(200));
        let (orch, _) = setup(provider.clone(), vec![]);
        let orch = Arc::new(orch);

        let mut a = orch.send_message(ConversationId::from(1), "a");
        let mut b = orch.send_message(ConversationId::from(2), "b");
        while a.recv().await.is_some() {}
        while b.recv().await.is_some() {}

        assert!(provider.requests().iter().all(|r| r.messages.len() == 1));
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.completion.model = "gpt-4o".into();
        config.orchestrator.max_plugin_rounds = 3;
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.max_plugin_rounds, 3);
        assert_eq!(settings.high_water_mark, 7373);
        assert_eq!(settings.plugin_spacing, Duration::from_secs(1));
        assert_eq!(settings.snapshot, SnapshotPolicy::default());
    }
}
