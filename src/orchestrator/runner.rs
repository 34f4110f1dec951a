//! The session state machine.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::budget::{SessionBudget, SessionGate};
use super::dedup::DuplicateCallDetector;
use super::events::{EventEmitter, EventStream, StreamEvent};
use super::finalizer::ForcedFinalizer;
use super::round::{RoundOutcome, RoundState};
use super::router::{ToolRoute, ToolRouter};
use crate::config::OrchestratorConfig;
use crate::error::CarnetError;
use crate::provider::{BackendRequest, ModelBackend};
use crate::store::{SessionOutcome, SessionRecord, SessionStore};
use crate::tools::{AuthContext, ToolExecutionContext, ToolExecutor, ToolRegistry, ToolSpec};
use crate::types::{pending_tool_call_ids, FinishReason, Message, TerminalSignal};

const EVENT_BUFFER: usize = 64;

/// Input of one streaming request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub session_id: Uuid,
    /// System prompt, history and the new user turn.
    pub conversation: Vec<Message>,
    /// Tools offered to the model, local and external.
    pub available_tools: Vec<ToolSpec>,
    /// Tools the backend executes itself.
    pub external_tool_names: HashSet<String>,
    pub auth: AuthContext,
}

impl StreamRequest {
    pub fn new(conversation: Vec<Message>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            conversation,
            available_tools: Vec::new(),
            external_tool_names: HashSet::new(),
            auth: AuthContext::default(),
        }
    }

    /// Offer every tool of `registry`.
    pub fn from_registry(conversation: Vec<Message>, registry: &ToolRegistry) -> Self {
        Self::new(conversation)
            .with_tools(registry.specs())
            .with_external_tool_names(registry.external_tool_names())
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.available_tools = tools;
        self
    }

    pub fn with_external_tool_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_tool_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Drives streaming sessions against one backend and one tool executor.
///
/// Each call to [`StreamOrchestrator::stream`] runs an independent session
/// on its own task.
#[derive(Clone)]
pub struct StreamOrchestrator {
    backend: Arc<dyn ModelBackend>,
    executor: Arc<dyn ToolExecutor>,
    config: OrchestratorConfig,
    store: Option<Arc<dyn SessionStore>>,
}

impl StreamOrchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        executor: Arc<dyn ToolExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            executor,
            config,
            store: None,
        }
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a session. The clock starts now.
    pub fn stream(&self, request: StreamRequest) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let session_id = request.session_id;
        let session = Session::new(self, request, tx, cancel.clone());
        tokio::spawn(session.run());
        EventStream::new(session_id, rx, cancel)
    }
}

impl std::fmt::Debug for StreamOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOrchestrator")
            .field("backend", &self.backend.backend_name())
            .field("config", &self.config)
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// States of one session.
#[derive(Debug)]
enum SessionState {
    AwaitingModel,
    ExecutingTools(RoundOutcome),
    Finalizing,
    Done,
    Error(CarnetError),
}

struct Session {
    id: Uuid,
    conversation: Vec<Message>,
    tools: Vec<ToolSpec>,
    auth: AuthContext,
    backend: Arc<dyn ModelBackend>,
    router: ToolRouter,
    dedup: DuplicateCallDetector,
    budget: SessionBudget,
    gate: SessionGate,
    emitter: EventEmitter,
    finalization_prompt: Option<String>,
    validate_arguments: bool,
    store: Option<Arc<dyn SessionStore>>,
    model_calls: usize,
    unknown_signals: usize,
}

impl Session {
    fn new(
        orchestrator: &StreamOrchestrator,
        request: StreamRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let config = &orchestrator.config;
        let budget = SessionBudget::from_config(config);
        let gate = SessionGate::new(cancel, budget.guard());
        Self {
            id: request.session_id,
            conversation: request.conversation,
            tools: request.available_tools,
            auth: request.auth,
            backend: Arc::clone(&orchestrator.backend),
            router: ToolRouter::new(
                Arc::clone(&orchestrator.executor),
                request.external_tool_names,
                config.tool_error_prefix.clone(),
            ),
            dedup: DuplicateCallDetector::new(),
            emitter: EventEmitter::new(tx, gate.clone()),
            gate,
            budget,
            finalization_prompt: config.finalization_prompt.clone(),
            validate_arguments: config.validate_arguments,
            store: orchestrator.store.clone(),
            model_calls: 0,
            unknown_signals: 0,
        }
    }

    async fn run(mut self) {
        info!(
            session_id = %self.id,
            backend = self.backend.backend_name(),
            tools = self.tools.len(),
            max_rounds = self.budget.max_rounds(),
            "session start"
        );

        let mut state = match self.emitter.emit(StreamEvent::start()).await {
            Ok(()) => SessionState::AwaitingModel,
            Err(err) => SessionState::Error(err),
        };

        let outcome = loop {
            state = match state {
                SessionState::AwaitingModel => self
                    .await_model()
                    .await
                    .unwrap_or_else(SessionState::Error),
                SessionState::ExecutingTools(round) => self
                    .execute_tools(round)
                    .await
                    .unwrap_or_else(SessionState::Error),
                SessionState::Finalizing => {
                    self.finalize().await.unwrap_or_else(SessionState::Error)
                }
                SessionState::Done => {
                    info!(
                        session_id = %self.id,
                        rounds = self.model_calls,
                        elapsed_ms = self.budget.elapsed().as_millis() as u64,
                        "session done"
                    );
                    self.emitter
                        .finish(StreamEvent::Done {
                            rounds: self.model_calls,
                        })
                        .await;
                    break Some(SessionOutcome::Completed);
                }
                SessionState::Error(err) => {
                    warn!(session_id = %self.id, error = %err, "session failed");
                    self.emitter.finish(StreamEvent::error(&err)).await;
                    break match err {
                        CarnetError::Canceled => None,
                        other => Some(SessionOutcome::Failed {
                            error: other.to_string(),
                        }),
                    };
                }
            };
        };

        if self.unknown_signals > 0 {
            warn!(
                session_id = %self.id,
                unknown_signals = self.unknown_signals,
                "rounds ended without a recognized finish reason"
            );
        }
        if let Some(outcome) = outcome {
            self.persist(outcome);
        }
    }

    fn offered_tools(&self) -> Option<Vec<ToolSpec>> {
        (!self.tools.is_empty()).then(|| self.tools.clone())
    }

    async fn await_model(&mut self) -> Result<SessionState, CarnetError> {
        self.gate.check()?;
        let pending = pending_tool_call_ids(&self.conversation);
        if !pending.is_empty() {
            warn!(
                session_id = %self.id,
                pending = ?pending,
                "calling the model with unresolved tool calls"
            );
        }

        self.model_calls += 1;
        let mut round = RoundState::new(self.model_calls);
        debug!(session_id = %self.id, round = round.index(), "awaiting model");

        let request = BackendRequest {
            messages: self.conversation.clone(),
            tools: self.offered_tools(),
        };
        let mut stream = self.gate.run(self.backend.stream(&request)).await??;

        while let Some(item) = self.gate.run(stream.next()).await? {
            let chunk = item?;
            if debug_enabled() {
                debug!(session_id = %self.id, round = round.index(), chunk = ?chunk, "model chunk");
            }
            if let Some(forward) = round.absorb(chunk) {
                self.emitter.emit(StreamEvent::delta(forward)).await?;
            }
        }
        drop(stream);

        let outcome = round.finish();
        if outcome.unrecognized {
            self.unknown_signals += 1;
            warn!(
                session_id = %self.id,
                round = outcome.index,
                finish_reason = ?outcome.finish_reason,
                resolved = %outcome.signal,
                "unrecognized terminal signal"
            );
        }

        if outcome.signal == TerminalSignal::ToolCalls {
            self.emitter
                .emit(StreamEvent::AssistantRoundComplete {
                    content: outcome.text.clone(),
                    tool_calls: outcome.tool_calls.clone(),
                    finish_reason: FinishReason::ToolCalls,
                    forced: None,
                })
                .await?;
            return Ok(SessionState::ExecutingTools(outcome));
        }

        if !outcome.text.is_empty() {
            self.emitter
                .emit(StreamEvent::AssistantRoundComplete {
                    content: outcome.text.clone(),
                    tool_calls: Vec::new(),
                    finish_reason: outcome.reported_finish_reason(),
                    forced: None,
                })
                .await?;
            self.conversation.push(Message::assistant(outcome.text));
        }
        Ok(SessionState::Done)
    }

    async fn execute_tools(&mut self, round: RoundOutcome) -> Result<SessionState, CarnetError> {
        let (local, external): (Vec<_>, Vec<_>) = round
            .tool_calls
            .iter()
            .cloned()
            .partition(|call| self.router.route(call) == ToolRoute::Local);

        if !round.text.is_empty() || !local.is_empty() {
            self.conversation
                .push(Message::assistant_with_tool_calls(round.text.clone(), local.clone()));
        }
        self.emitter
            .emit(StreamEvent::ToolExecution {
                tool_count: local.len(),
                external_tools: external.iter().map(|c| c.function_name.clone()).collect(),
            })
            .await?;

        for call in &round.tool_calls {
            if self.dedup.observe(call) {
                warn!(
                    session_id = %self.id,
                    tool_name = %call.function_name,
                    tool_call_id = %call.id,
                    "duplicate tool call; executing anyway"
                );
            }
            if self.router.route(call) == ToolRoute::External {
                debug!(
                    session_id = %self.id,
                    tool_name = %call.function_name,
                    "skipping externally executed tool"
                );
                continue;
            }

            self.gate.check()?;
            let ctx = ToolExecutionContext {
                session_id: Some(self.id),
                tool_call_id: Some(call.id.clone()),
                auth: self.auth.clone(),
                validate_arguments: self.validate_arguments,
            };
            let result = self.gate.run(self.router.dispatch(call, &ctx)).await?;
            if !result.succeeded {
                debug!(
                    session_id = %self.id,
                    tool_name = %result.name,
                    tool_call_id = %result.tool_call_id,
                    "tool failed"
                );
            }
            self.conversation.push(Message::tool_result(&result));
            self.emitter.emit(StreamEvent::tool_result(&result)).await?;
        }

        let completed = self.budget.complete_round();
        debug!(session_id = %self.id, rounds_completed = completed, "tool round complete");
        if self.budget.exhausted() {
            info!(
                session_id = %self.id,
                max_rounds = self.budget.max_rounds(),
                "round budget exhausted; forcing a final answer"
            );
            Ok(SessionState::Finalizing)
        } else {
            Ok(SessionState::AwaitingModel)
        }
    }

    async fn finalize(&mut self) -> Result<SessionState, CarnetError> {
        self.gate.check()?;
        self.model_calls += 1;
        let text = ForcedFinalizer::new(self.backend.as_ref())
            .with_prompt(self.finalization_prompt.as_deref())
            .finalize(&self.conversation, &self.gate)
            .await?;

        self.emitter
            .emit(StreamEvent::AssistantRoundComplete {
                content: text.clone(),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
                forced: Some(true),
            })
            .await?;
        self.conversation.push(Message::assistant(text));
        Ok(SessionState::Done)
    }

    fn persist(self, outcome: SessionOutcome) {
        let Some(store) = self.store else {
            return;
        };
        let record = SessionRecord {
            session_id: self.id,
            conversation: self.conversation,
            rounds: self.model_calls,
            outcome,
            unknown_signals: self.unknown_signals,
            duplicate_calls: self.dedup.duplicates(),
            finished_at: Utc::now(),
        };
        tokio::spawn(async move {
            let session_id = record.session_id;
            if let Err(err) = store.save(record).await {
                warn!(session_id = %session_id, error = %err, "failed to save session");
            }
        });
    }
}

fn debug_enabled() -> bool {
    matches!(std::env::var("CARNET_DEBUG").as_deref(), Ok("1"))
}
