//! Enumeration engine.
//!
//! Drives one connection attempt through `initialize`, the `initialized`
//! notification, and the three discovery listings, then stays attached so
//! later probe traffic can be routed. A failed or timed-out first attempt
//! is retried exactly once with the SSE transport pinned to HTTP/1.1;
//! WebSocket and POST-only attempts fail without retry.
//!
//! Every inbound message is offered to the session store first and then
//! checked against the engine's own handshake and discovery ids, so an
//! external waiter and the engine can both observe the same response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, Timeouts};
use crate::error::EngineError;
use crate::session::SessionStore;
use crate::transport::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, MCP_PROTOCOL_VERSION,
    extract_id_lossy, synthetic_parse_error,
};
use crate::transport::{self, Transport, TransportEvent};

/// Lifecycle of one scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No attempt started yet.
    #[default]
    Idle,
    /// Transport is being established.
    Connecting,
    /// `initialize` sent, waiting for the server.
    Handshaking,
    /// Discovery listings in flight.
    Enumerating,
    /// All three discovery phases answered.
    Ready,
    /// Cancelled by the caller.
    Cancelled,
    /// Attempt failed (connection, handshake, or timeout).
    Failed,
}

impl EngineState {
    /// Short lowercase label for logs and status lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Enumerating => "enumerating",
            Self::Ready => "ready",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Discovery phase identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `tools/list`
    Tools,
    /// `resources/list`
    Resources,
    /// `prompts/list`
    Prompts,
}

impl Phase {
    /// The JSON-RPC method for this phase.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::Tools => "tools/list",
            Self::Resources => "resources/list",
            Self::Prompts => "prompts/list",
        }
    }
}

/// Progress notifications emitted by the engine.
#[derive(Debug)]
pub enum EngineUpdate {
    /// A state transition with a human-readable detail line.
    Status {
        /// New state.
        state: EngineState,
        /// What happened.
        detail: String,
    },
    /// The `serverInfo` object from the handshake result.
    ServerInfo(Value),
    /// One discovery phase finished, successfully or not.
    Discovery {
        /// Which listing.
        phase: Phase,
        /// The raw result, or the server's error.
        outcome: Result<Value, JsonRpcError>,
    },
}

/// Tracks which discovery phases have answered. A phase error counts as an
/// answer; readiness needs all three, in any order.
#[derive(Debug, Default)]
struct PhaseTracker {
    tools: bool,
    resources: bool,
    prompts: bool,
}

impl PhaseTracker {
    fn mark(&mut self, phase: Phase) {
        match phase {
            Phase::Tools => self.tools = true,
            Phase::Resources => self.resources = true,
            Phase::Prompts => self.prompts = true,
        }
    }

    const fn all_done(&self) -> bool {
        self.tools && self.resources && self.prompts
    }
}

/// Builds the `initialize` params, shallow-merging user options over the
/// defaults so a user-supplied `protocolVersion` (or anything else) wins.
fn initialize_params(config: &ConnectionConfig) -> Value {
    let mut params = json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcp-surface",
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    if let Some(user) = config.parsed_init_options()
        && let Some(obj) = params.as_object_mut()
    {
        for (key, value) in user {
            obj.insert(key, value);
        }
    }
    params
}

struct Inner {
    sessions: Arc<SessionStore>,
    updates: mpsc::UnboundedSender<EngineUpdate>,
    timeouts: Timeouts,
    state: watch::Sender<EngineState>,
    current: Mutex<Option<Arc<dyn Transport>>>,
    attempt_cancel: Mutex<CancellationToken>,
    // Bumped on every start(); attempts carry the value they were spawned
    // with and go silent once superseded.
    generation: AtomicU64,
}

impl Inner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// State updates from superseded attempts are dropped so a restart
    /// cannot have its observable state clobbered by the old worker.
    fn set_state(&self, generation: u64, state: EngineState, detail: impl Into<String>) {
        if self.current_generation() != generation {
            return;
        }
        let detail = detail.into();
        debug!(state = state.label(), detail = %detail, "engine state");
        self.state.send_replace(state);
        let _ = self.updates.send(EngineUpdate::Status { state, detail });
    }

    fn send_update(&self, generation: u64, update: EngineUpdate) {
        if self.current_generation() != generation {
            return;
        }
        let _ = self.updates.send(update);
    }

    fn install_transport(&self, generation: u64, transport: &Arc<dyn Transport>) {
        if self.current_generation() != generation {
            return;
        }
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(Arc::clone(transport));
        }
    }

    /// Clears `current` only when it still holds this attempt's transport;
    /// a newer attempt may already have installed its own.
    fn clear_transport(&self, transport: &Arc<dyn Transport>) {
        if let Ok(mut guard) = self.current.lock()
            && guard.as_ref().is_some_and(|t| Arc::ptr_eq(t, transport))
        {
            *guard = None;
        }
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.current.lock().ok().and_then(|g| g.clone())
    }
}

/// Handle to the enumeration engine. Cheap to clone; all clones drive the
/// same attempt.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Creates an engine and the receiving end of its update channel.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionStore>,
        timeouts: Timeouts,
    ) -> (Self, mpsc::UnboundedReceiver<EngineUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(EngineState::Idle);
        let engine = Self {
            inner: Arc::new(Inner {
                sessions,
                updates,
                timeouts,
                state,
                current: Mutex::new(None),
                attempt_cancel: Mutex::new(CancellationToken::new()),
                generation: AtomicU64::new(0),
            }),
        };
        (engine, updates_rx)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// Starts a scan attempt. Any attempt already in flight is cancelled;
    /// all per-attempt state (ids, transport) is fresh. Never blocks.
    pub fn start(&self, config: ConnectionConfig) {
        // Bump first: the old worker is already superseded by the time its
        // cancellation wakes it, so none of its late updates get through.
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = {
            let Ok(mut guard) = self.inner.attempt_cancel.lock() else {
                return;
            };
            guard.cancel();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = Attempt::run(&inner, &config, generation, cancel.clone(), false).await;
            if matches!(outcome, Outcome::Failed)
                && config.transport.retryable()
                && !cancel.is_cancelled()
            {
                info!("retrying once in legacy HTTP/1.1 mode");
                inner.set_state(
                    generation,
                    EngineState::Connecting,
                    "retrying in legacy HTTP/1.1 mode",
                );
                Attempt::run(&inner, &config, generation, cancel, true).await;
            }
        });
    }

    /// Cancels the in-flight attempt. Idempotent and callable from any task.
    pub fn cancel(&self) {
        if let Ok(guard) = self.inner.attempt_cancel.lock() {
            guard.cancel();
        }
        if let Some(transport) = self.inner.transport() {
            transport.close();
        }
    }

    /// Sends an already-serialized request through the live transport.
    pub async fn send_request(&self, payload: String) -> Result<(), EngineError> {
        let Some(transport) = self.inner.transport() else {
            return Err(EngineError::NotConnected);
        };
        if let Err(e) = transport.send(payload).await {
            warn!(error = %e, "send failed");
        }
        Ok(())
    }
}

/// How one attempt ended, as seen by the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Reached `Ready`; the attempt kept serving until cancel or disconnect.
    Ready,
    /// Failed before `Ready`. Retry-eligible.
    Failed,
    /// Cancelled. Never retried.
    Cancelled,
}

/// Per-attempt ids and progress.
struct Attempt<'a> {
    inner: &'a Inner,
    config: &'a ConnectionConfig,
    generation: u64,
    handshake_id: String,
    tools_id: String,
    resources_id: String,
    prompts_id: String,
    handshake_done: bool,
    ready: bool,
    tracker: PhaseTracker,
}

impl<'a> Attempt<'a> {
    async fn run(
        inner: &'a Inner,
        config: &'a ConnectionConfig,
        generation: u64,
        cancel: CancellationToken,
        force_legacy: bool,
    ) -> Outcome {
        let mut attempt = Self {
            inner,
            config,
            generation,
            handshake_id: Uuid::new_v4().to_string(),
            tools_id: Uuid::new_v4().to_string(),
            resources_id: Uuid::new_v4().to_string(),
            prompts_id: Uuid::new_v4().to_string(),
            handshake_done: false,
            ready: false,
            tracker: PhaseTracker::default(),
        };
        attempt.drive(cancel, force_legacy).await
    }

    fn set_state(&self, state: EngineState, detail: impl Into<String>) {
        self.inner.set_state(self.generation, state, detail);
    }

    async fn drive(&mut self, cancel: CancellationToken, force_legacy: bool) -> Outcome {
        let (events_tx, events) = mpsc::unbounded_channel();
        let transport =
            match transport::build(self.config, events_tx, &self.inner.timeouts, force_legacy) {
                Ok(t) => t,
                Err(e) => {
                    self.set_state(EngineState::Failed, format!("transport setup failed: {e}"));
                    return Outcome::Failed;
                }
            };
        self.inner.install_transport(self.generation, &transport);
        let outcome = self.event_loop(&transport, events, cancel).await;
        // Tear down only what this attempt created. A restart may already
        // have installed its own transport under `current`.
        transport.close();
        self.inner.clear_transport(&transport);
        outcome
    }

    async fn event_loop(
        &mut self,
        transport: &Arc<dyn Transport>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
    ) -> Outcome {
        self.set_state(
            EngineState::Connecting,
            format!(
                "connecting to {} via {}",
                self.config.endpoint_url(),
                self.config.transport.label()
            ),
        );

        if let Err(e) = transport.connect().await {
            self.set_state(EngineState::Failed, format!("connect failed: {e}"));
            return Outcome::Failed;
        }

        let deadline = tokio::time::Instant::now() + self.inner.timeouts.handshake;
        loop {
            let step = tokio::select! {
                () = cancel.cancelled() => {
                    self.set_state(EngineState::Cancelled, "cancelled");
                    return Outcome::Cancelled;
                }
                () = tokio::time::sleep_until(deadline), if !self.handshake_done => {
                    let e = EngineError::HandshakeTimeout(self.inner.timeouts.handshake);
                    self.set_state(EngineState::Failed, e.to_string());
                    return Outcome::Failed;
                }
                event = events.recv() => match event {
                    Some(event) => self.on_event(&**transport, event).await,
                    None => Step::Disconnected("event channel closed".to_string()),
                },
            };
            match step {
                Step::Continue => {}
                // A close racing a cancel is still a cancel.
                Step::Failed(_) | Step::Disconnected(_) if cancel.is_cancelled() => {
                    self.set_state(EngineState::Cancelled, "cancelled");
                    return Outcome::Cancelled;
                }
                Step::Failed(detail) => {
                    self.set_state(EngineState::Failed, detail);
                    return Outcome::Failed;
                }
                Step::Disconnected(detail) => {
                    if self.ready {
                        self.set_state(EngineState::Failed, format!("connection lost: {detail}"));
                        return Outcome::Ready;
                    }
                    return {
                        self.set_state(EngineState::Failed, detail);
                        Outcome::Failed
                    };
                }
            }
        }
    }

    async fn on_event(&mut self, transport: &dyn Transport, event: TransportEvent) -> Step {
        match event {
            TransportEvent::Opened => {
                if self.handshake_done {
                    return Step::Continue;
                }
                self.set_state(EngineState::Handshaking, "sending initialize");
                let request = JsonRpcRequest::new(
                    self.handshake_id.clone(),
                    "initialize",
                    Some(initialize_params(self.config)),
                );
                match serde_json::to_string(&request) {
                    Ok(payload) => {
                        if let Err(e) = transport.send(payload).await {
                            return Step::Failed(format!("initialize send failed: {e}"));
                        }
                    }
                    Err(e) => return Step::Failed(format!("initialize encode failed: {e}")),
                }
                Step::Continue
            }
            TransportEvent::Message(raw) => self.on_message(transport, &raw).await,
            TransportEvent::Closed => Step::Disconnected("connection closed".to_string()),
            TransportEvent::Error(e) => Step::Disconnected(e.to_string()),
        }
    }

    async fn on_message(&mut self, transport: &dyn Transport, raw: &str) -> Step {
        let message: JsonRpcMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                // A scraped id still lets us fail the waiter instead of
                // leaving it to time out.
                if let Some(id) = extract_id_lossy(raw)
                    && self.inner.sessions.is_pending(&id)
                    && let Ok(synthetic) = serde_json::to_value(synthetic_parse_error(&id))
                {
                    self.inner.sessions.complete(&id, synthetic);
                }
                return Step::Continue;
            }
        };

        let Some(key) = message.id_key() else {
            debug!(method = message.method().unwrap_or("?"), "ignoring notification");
            return Step::Continue;
        };

        // Session store first, engine ids second; both may observe the
        // same response.
        if let Ok(value) = serde_json::to_value(&message) {
            self.inner.sessions.complete(&key, value);
        }

        let JsonRpcMessage::Response(response) = message else {
            return Step::Continue;
        };

        if key == self.handshake_id {
            return self.on_handshake_response(transport, response).await;
        }
        let phase = if key == self.tools_id {
            Phase::Tools
        } else if key == self.resources_id {
            Phase::Resources
        } else if key == self.prompts_id {
            Phase::Prompts
        } else {
            return Step::Continue;
        };

        let outcome = match (response.result, response.error) {
            (_, Some(error)) => {
                warn!(method = phase.method(), code = error.code, "discovery phase errored");
                Err(error)
            }
            (result, None) => Ok(result.unwrap_or(Value::Null)),
        };
        self.inner
            .send_update(self.generation, EngineUpdate::Discovery { phase, outcome });
        self.tracker.mark(phase);
        if self.tracker.all_done() && !self.ready {
            self.ready = true;
            self.set_state(EngineState::Ready, "discovery complete");
        }
        Step::Continue
    }

    async fn on_handshake_response(
        &mut self,
        transport: &dyn Transport,
        response: crate::transport::jsonrpc::JsonRpcResponse,
    ) -> Step {
        if self.handshake_done {
            return Step::Continue;
        }
        if let Some(error) = response.error {
            let e = EngineError::HandshakeFailed(error.message);
            return Step::Failed(e.to_string());
        }
        self.handshake_done = true;

        let result = response.result.unwrap_or(Value::Null);
        if let Some(server_info) = result.get("serverInfo") {
            self.inner
                .send_update(self.generation, EngineUpdate::ServerInfo(server_info.clone()));
        }

        let initialized = JsonRpcNotification::new("notifications/initialized", None);
        if let Ok(payload) = serde_json::to_string(&initialized)
            && let Err(e) = transport.send(payload).await
        {
            return Step::Failed(format!("initialized notification failed: {e}"));
        }

        self.set_state(
            EngineState::Enumerating,
            "listing tools, resources, and prompts",
        );
        for (id, phase) in [
            (self.tools_id.clone(), Phase::Tools),
            (self.resources_id.clone(), Phase::Resources),
            (self.prompts_id.clone(), Phase::Prompts),
        ] {
            let request = JsonRpcRequest::new(id, phase.method(), Some(json!({})));
            match serde_json::to_string(&request) {
                Ok(payload) => {
                    if let Err(e) = transport.send(payload).await {
                        return Step::Failed(format!("{} send failed: {e}", phase.method()));
                    }
                }
                Err(e) => return Step::Failed(format!("{} encode failed: {e}", phase.method())),
            }
        }
        Step::Continue
    }
}

enum Step {
    Continue,
    Failed(String),
    Disconnected(String),
}
