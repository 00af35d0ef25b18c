pub mod approval;
pub mod events;
pub mod history;
pub mod stream;
pub mod tools;

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::agent::approval::{ApprovalEngine, Decision};
use crate::agent::events::AgentEvent;
use crate::agent::history::History;
use crate::agent::stream::ToolCallAccumulator;
use crate::agent::tools::file_ops::FileOperationsTool;
use crate::agent::tools::git::GitOperationsTool;
use crate::agent::tools::project::ProjectAnalyzeTool;
use crate::agent::tools::shell::ShellExecuteTool;
use crate::agent::tools::{ExecutionContext, ToolRegistry};
use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::providers::base::{
    ChatRequest, FinishReason, Provider, TokenUsage, ToolCallRequest, ToolDefinition,
};
use crate::sandbox::{Policy, Sandbox};
use crate::utils::cancel::{CancelHandle, CancelToken};

const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The agent runtime: history, tool registry, approval engine and provider,
/// driven one user turn at a time through [`Agent::stream_events`].
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    provider: Arc<dyn Provider>,
    approval: Arc<ApprovalEngine>,
    tools: Arc<ToolRegistry>,
    base_path: PathBuf,
    history: Mutex<History>,
    /// Serialises turns; one session never interleaves two.
    turn_lock: Mutex<()>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn Provider>,
        sandbox: Sandbox,
        approval: Arc<ApprovalEngine>,
        base_path: PathBuf,
    ) -> anyhow::Result<Self> {
        let base_path = base_path
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("workspace '{}': {}", base_path.display(), e))?;

        let policy = Policy::from_config(&config.sandbox);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FileOperationsTool::new()));
        registry.register(Arc::new(ShellExecuteTool::new(
            sandbox,
            policy.clone(),
            config.blocked_commands.clone(),
        )));
        registry.register(Arc::new(GitOperationsTool::new(sandbox, policy)));
        registry.register(Arc::new(ProjectAnalyzeTool::new(
            config.code_extensions.clone(),
        )));

        let system_prompt = build_system_prompt(&base_path, &registry.definitions());
        info!(
            "agent ready: workspace={}, tools=[{}]",
            base_path.display(),
            registry.tool_names().join(", ")
        );

        Ok(Self {
            inner: Arc::new(AgentInner {
                config,
                provider,
                approval,
                tools: Arc::new(registry),
                history: Mutex::new(History::new(&system_prompt)),
                turn_lock: Mutex::new(()),
                base_path,
            }),
        })
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.inner.tools.definitions()
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.inner.base_path
    }

    /// Snapshot of the dialogue history (system prompt included).
    pub async fn history(&self) -> Vec<crate::providers::base::Message> {
        self.inner.history.lock().await.snapshot()
    }

    /// Run one user turn. Returns the ordered event stream and a handle that
    /// cancels the in-flight provider stream, subprocesses and approval wait.
    pub fn stream_events(&self, user_text: impl Into<String>) -> (EventStream, CancelHandle) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (handle, token) = CancelToken::new();
        let inner = self.inner.clone();
        let user_text = user_text.into();
        tokio::spawn(async move {
            inner.run_turn(user_text, tx, token).await;
        });
        (EventStream { rx }, handle)
    }
}

/// The ordered event stream of one turn. Ends after `Done`.
pub struct EventStream {
    rx: mpsc::Receiver<AgentEvent>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to completion, collecting every event.
    pub async fn collect_all(mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// What one round of streaming produced.
struct RoundOutcome {
    assistant_text: String,
    calls: Vec<crate::agent::stream::AssembledToolCall>,
    finish: Option<FinishReason>,
}

enum RoundError {
    Cancelled,
    Provider(AgentError),
}

/// How approval arbitration resolved for one call.
enum Arbitration {
    /// Execute the tool.
    Proceed,
    /// Skip this call; a denial record is already in place.
    Skip,
    /// The turn is over; terminal events were already emitted.
    Fatal,
}

impl AgentInner {
    async fn run_turn(
        self: Arc<Self>,
        user_text: String,
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancelToken,
    ) {
        let _guard = self.turn_lock.lock().await;
        let started = Instant::now();
        let turn_budget = Duration::from_secs(self.config.timeout_secs);
        let mut usage = TokenUsage::default();

        self.history.lock().await.push_user(&user_text);
        let defs = self.tools.definitions();

        for round in 1..=self.config.max_tool_rounds {
            if started.elapsed() >= turn_budget {
                emit(
                    &tx,
                    AgentEvent::Error {
                        kind: "timeout".into(),
                        message: format!("turn exceeded {}s budget", turn_budget.as_secs()),
                    },
                )
                .await;
                emit(&tx, AgentEvent::Done { usage }).await;
                return;
            }

            debug!("starting round {} of {}", round, self.config.max_tool_rounds);
            let messages = self.history.lock().await.snapshot();
            let request = ChatRequest {
                messages,
                tools: Some(defs.clone()),
                model: None,
                max_tokens: DEFAULT_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
            };

            let outcome = match self.drain_stream(request, &tx, &cancel, &mut usage).await {
                Ok(outcome) => outcome,
                Err(RoundError::Cancelled) => {
                    // The partial assistant message is discarded; history
                    // keeps the user message only.
                    emit(
                        &tx,
                        AgentEvent::Error {
                            kind: "cancelled".into(),
                            message: "turn cancelled".into(),
                        },
                    )
                    .await;
                    emit(&tx, AgentEvent::Done { usage }).await;
                    return;
                }
                Err(RoundError::Provider(e)) => {
                    warn!("provider stream failed: {}", e);
                    emit(
                        &tx,
                        AgentEvent::Error {
                            kind: e.kind().into(),
                            message: e.to_string(),
                        },
                    )
                    .await;
                    emit(&tx, AgentEvent::Done { usage }).await;
                    return;
                }
            };

            match outcome.finish {
                Some(FinishReason::Length) => {
                    let mut history = self.history.lock().await;
                    history.push_assistant(outcome.assistant_text, None);
                    emit(
                        &tx,
                        AgentEvent::Error {
                            kind: "truncated".into(),
                            message: "response truncated by the model's length limit".into(),
                        },
                    )
                    .await;
                    emit(&tx, AgentEvent::Done { usage }).await;
                    return;
                }
                Some(FinishReason::ContentFilter) => {
                    emit(
                        &tx,
                        AgentEvent::Error {
                            kind: "filtered".into(),
                            message: "response blocked by the provider's content filter".into(),
                        },
                    )
                    .await;
                    emit(&tx, AgentEvent::Done { usage }).await;
                    return;
                }
                _ => {}
            }

            if outcome.calls.is_empty() {
                self.history
                    .lock()
                    .await
                    .push_assistant(outcome.assistant_text, None);
                emit(&tx, AgentEvent::Done { usage }).await;
                return;
            }

            // Parse every call up front; unparseable arguments stay in the
            // history as raw strings so the dialogue record is faithful.
            let parsed: Vec<(String, Result<ToolCallRequest, AgentError>)> = outcome
                .calls
                .iter()
                .map(|call| (call.id.clone(), call.parse()))
                .collect();
            let history_calls: Vec<ToolCallRequest> = outcome
                .calls
                .iter()
                .map(|call| match call.parse() {
                    Ok(parsed) => parsed,
                    Err(_) => ToolCallRequest {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: serde_json::Value::String(call.arguments.clone()),
                    },
                })
                .collect();
            self.history
                .lock()
                .await
                .push_assistant(outcome.assistant_text.clone(), Some(history_calls));

            for (call_id, parse_result) in parsed {
                if cancel.is_cancelled() {
                    emit(
                        &tx,
                        AgentEvent::Error {
                            kind: "cancelled".into(),
                            message: "turn cancelled".into(),
                        },
                    )
                    .await;
                    emit(&tx, AgentEvent::Done { usage }).await;
                    return;
                }
                if started.elapsed() >= turn_budget {
                    emit(
                        &tx,
                        AgentEvent::Error {
                            kind: "timeout".into(),
                            message: format!("turn exceeded {}s budget", turn_budget.as_secs()),
                        },
                    )
                    .await;
                    emit(&tx, AgentEvent::Done { usage }).await;
                    return;
                }

                let request = match parse_result {
                    Ok(request) => request,
                    Err(e) => {
                        self.record_tool_failure(&tx, &call_id, &e).await;
                        continue;
                    }
                };

                emit(
                    &tx,
                    AgentEvent::ToolCallProposed {
                        call: request.clone(),
                    },
                )
                .await;

                match self.arbitrate(&tx, &cancel, &request, usage).await {
                    Arbitration::Proceed => {}
                    Arbitration::Skip => continue,
                    Arbitration::Fatal => return,
                }

                let ctx =
                    ExecutionContext::with_cancel(self.base_path.clone(), cancel.clone());
                match self
                    .tools
                    .execute(&request.name, request.arguments.clone(), &ctx)
                    .await
                {
                    Ok(result) => {
                        let _ = self.history.lock().await.push_tool_result(
                            &call_id,
                            result.content.clone(),
                            result.is_error,
                        );
                        emit(
                            &tx,
                            AgentEvent::ToolResult {
                                call_id: call_id.clone(),
                                output: result.content,
                                error: result.is_error,
                            },
                        )
                        .await;
                    }
                    Err(e) => match e.downcast::<AgentError>() {
                        Ok(AgentError::Cancelled) => {
                            emit(
                                &tx,
                                AgentEvent::Error {
                                    kind: "cancelled".into(),
                                    message: "turn cancelled".into(),
                                },
                            )
                            .await;
                            emit(&tx, AgentEvent::Done { usage }).await;
                            return;
                        }
                        Ok(fatal @ AgentError::Sandbox(_)) => {
                            emit(
                                &tx,
                                AgentEvent::Error {
                                    kind: fatal.kind().into(),
                                    message: fatal.to_string(),
                                },
                            )
                            .await;
                            emit(&tx, AgentEvent::Done { usage }).await;
                            return;
                        }
                        Ok(recoverable) => {
                            self.record_tool_failure(&tx, &call_id, &recoverable).await;
                        }
                        Err(other) => {
                            let err = AgentError::Tool {
                                tool: request.name.clone(),
                                message: other.to_string(),
                            };
                            self.record_tool_failure(&tx, &call_id, &err).await;
                        }
                    },
                }
            }
        }

        emit(
            &tx,
            AgentEvent::Error {
                kind: "tool".into(),
                message: format!(
                    "stopping after {} tool rounds without a final answer",
                    self.config.max_tool_rounds
                ),
            },
        )
        .await;
        emit(&tx, AgentEvent::Done { usage }).await;
    }

    /// Issue one streaming request and drain it, merging tool-call deltas
    /// and forwarding text fragments as `TokenChunk` events.
    async fn drain_stream(
        &self,
        request: ChatRequest<'_>,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancelToken,
        usage: &mut TokenUsage,
    ) -> Result<RoundOutcome, RoundError> {
        let mut chunks = match self.provider.stream_chat(request).await {
            Ok(chunks) => chunks,
            Err(e) => return Err(RoundError::Provider(e)),
        };

        let mut assistant_text = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut finish: Option<FinishReason> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // Dropping the stream closes the underlying reader.
                    return Err(RoundError::Cancelled);
                }
                chunk = chunks.next() => match chunk {
                    None => break,
                    Some(Err(e)) => return Err(RoundError::Provider(e)),
                    Some(Ok(chunk)) => {
                        if let Some(u) = chunk.usage {
                            usage.add(u);
                        }
                        for choice in chunk.choices {
                            if let Some(content) = choice.delta.content
                                && !content.is_empty()
                            {
                                assistant_text.push_str(&content);
                                emit(tx, AgentEvent::TokenChunk { token: content }).await;
                            }
                            for delta in choice.delta.tool_calls.unwrap_or_default() {
                                accumulator.apply(&delta);
                            }
                            if let Some(reason) = choice.finish_reason {
                                finish = Some(reason);
                            }
                        }
                    }
                }
            }
        }

        Ok(RoundOutcome {
            assistant_text,
            calls: accumulator.finish(),
            finish,
        })
    }

    /// Gate one parsed call through the approval engine. Denials and blocks
    /// are recorded as synthetic tool messages so the model can react.
    async fn arbitrate(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancelToken,
        request: &ToolCallRequest,
        usage: TokenUsage,
    ) -> Arbitration {
        let decision = match self.approval.evaluate(&request.name, &request.arguments).await {
            Ok(decision) => decision,
            Err(e) => {
                self.record_tool_failure(tx, &request.id, &e).await;
                return Arbitration::Skip;
            }
        };

        match decision {
            Decision::AutoApproved { reason } => {
                debug!("auto-approved '{}' ({})", request.name, reason);
                Arbitration::Proceed
            }
            Decision::Blocked { reason } => {
                let err = AgentError::PolicyViolation(reason);
                self.record_tool_failure(tx, &request.id, &err).await;
                Arbitration::Skip
            }
            Decision::NeedsConfirmation(approval_request) => {
                emit(
                    tx,
                    AgentEvent::ApprovalPending {
                        request: (*approval_request).clone(),
                    },
                )
                .await;
                match self.approval.confirm(&approval_request, cancel).await {
                    Ok(result) if result.approved => Arbitration::Proceed,
                    Ok(result) => {
                        let err = AgentError::ApprovalDenied(result.reason);
                        self.record_tool_failure(tx, &request.id, &err).await;
                        Arbitration::Skip
                    }
                    Err(AgentError::Cancelled) => {
                        emit(
                            tx,
                            AgentEvent::Error {
                                kind: "cancelled".into(),
                                message: "turn cancelled".into(),
                            },
                        )
                        .await;
                        emit(tx, AgentEvent::Done { usage }).await;
                        Arbitration::Fatal
                    }
                    Err(e) => {
                        self.record_tool_failure(tx, &request.id, &e).await;
                        Arbitration::Skip
                    }
                }
            }
        }
    }

    /// Record a recoverable per-call failure: a synthetic tool message in
    /// the history plus an `Error` event.
    async fn record_tool_failure(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
        call_id: &str,
        error: &AgentError,
    ) {
        let _ = self.history.lock().await.push_tool_result(
            call_id,
            error.to_string(),
            true,
        );
        emit(
            tx,
            AgentEvent::Error {
                kind: error.kind().into(),
                message: error.to_string(),
            },
        )
        .await;
    }
}

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    // A dropped receiver means nobody is listening; the turn still runs to
    // completion so the history stays consistent.
    let _ = tx.send(event).await;
}

fn build_system_prompt(base_path: &std::path::Path, defs: &[ToolDefinition]) -> String {
    let mut prompt = format!(
        "You are rustle, a coding agent operating on the workspace at {}.\n\
         All file paths are relative to that workspace. You have these tools:\n",
        base_path.display()
    );
    for def in defs {
        prompt.push_str(&format!("- {}: {}\n", def.name, def.description));
    }
    prompt.push_str(
        "Use tools to inspect and modify the workspace instead of guessing. \
         Destructive actions require user approval; if one is denied, adjust \
         your plan rather than retrying it.",
    );
    prompt
}
