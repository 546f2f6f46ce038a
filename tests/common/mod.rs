//! Shared test fixtures: in-process mock MCP servers.
//!
//! Two axum servers back the integration suites: a POST-style server that
//! answers every request in its response body, and an SSE-style server
//! that announces a message endpoint and pushes responses over the event
//! stream. Behavior knobs let individual tests force handshake failures,
//! silent servers, and vulnerable tool/resource handlers.
#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use futures::StreamExt;
use futures::stream;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast};
use tokio_stream::wrappers::BroadcastStream;

/// Barrier for `tools/call`: every response is held until calls for `need`
/// distinct tool names have arrived. A client probing tools one after
/// another deadlocks its first tool against the gate; concurrent workers
/// open it immediately.
pub struct CallGate {
    need: usize,
    seen: Mutex<HashSet<String>>,
    notify: Notify,
}

impl CallGate {
    pub fn new(need: usize) -> Arc<Self> {
        Arc::new(Self {
            need,
            seen: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        })
    }

    async fn pass(&self, tool: &str) {
        let open = {
            let mut seen = self.seen.lock().unwrap();
            seen.insert(tool.to_string());
            seen.len() >= self.need
        };
        if open {
            self.notify.notify_waiters();
            return;
        }
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.seen.lock().unwrap().len() >= self.need {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CallGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGate").field("need", &self.need).finish()
    }
}

/// How the mock answers `tools/call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolCallMode {
    /// Clean validation error for anything unexpected.
    #[default]
    Clean,
    /// Echo the arguments back verbatim (reflection-vulnerable).
    Echo,
    /// Internal error with a leaked stack trace (type-handling bug).
    InternalError,
}

/// Mock server behavior knobs.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Answer `initialize` with a JSON-RPC error.
    pub fail_initialize: bool,
    /// Never answer `initialize`.
    pub hang_initialize: bool,
    /// Answer `resources/list` with a JSON-RPC error.
    pub fail_resources: bool,
    /// Tools advertised by `tools/list`.
    pub tools: Value,
    /// Resources advertised by `resources/list`.
    pub resources: Value,
    /// Prompts advertised by `prompts/list`.
    pub prompts: Value,
    /// `tools/call` behavior.
    pub tool_call: ToolCallMode,
    /// Whether `resources/read` serves content for any URI.
    pub open_resources: bool,
    /// Optional barrier applied to every `tools/call`.
    pub call_gate: Option<Arc<CallGate>>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_initialize: false,
            hang_initialize: false,
            fail_resources: false,
            tools: json!([]),
            resources: json!([]),
            prompts: json!([]),
            tool_call: ToolCallMode::Clean,
            open_resources: false,
            call_gate: None,
        }
    }
}

/// Computes the JSON-RPC response for one request, or `None` for
/// notifications and a hung initialize.
pub async fn mock_response(behavior: &MockBehavior, raw: &str) -> Option<Value> {
    let request: Value = serde_json::from_str(raw).ok()?;
    let method = request.get("method")?.as_str()?;
    let id = request.get("id")?.clone();

    let response = match method {
        "initialize" => {
            if behavior.hang_initialize {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                return None;
            }
            if behavior.fail_initialize {
                error_response(id, -32600, "initialization rejected")
            } else {
                success_response(
                    id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "serverInfo": {"name": "mock-mcp", "version": "0.1.0"},
                    }),
                )
            }
        }
        "tools/list" => success_response(id, json!({"tools": behavior.tools})),
        "resources/list" => {
            if behavior.fail_resources {
                error_response(id, -32601, "resources not supported")
            } else {
                success_response(id, json!({"resources": behavior.resources}))
            }
        }
        "prompts/list" => success_response(id, json!({"prompts": behavior.prompts})),
        "tools/call" => {
            if let Some(gate) = &behavior.call_gate {
                let name = request
                    .get("params")
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                gate.pass(name).await;
            }
            match behavior.tool_call {
                ToolCallMode::Clean => error_response(id, -32602, "invalid params"),
                ToolCallMode::Echo => {
                    let arguments = request
                        .get("params")
                        .and_then(|p| p.get("arguments"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    success_response(
                        id,
                        json!({"content": [{"type": "text", "text": arguments.to_string()}]}),
                    )
                }
                ToolCallMode::InternalError => {
                    error_response(id, -32603, "Stacktrace: TypeError at handler.py:12")
                }
            }
        }
        "resources/read" => {
            if behavior.open_resources {
                let uri = request
                    .get("params")
                    .and_then(|p| p.get("uri"))
                    .cloned()
                    .unwrap_or(Value::Null);
                success_response(id, json!({"contents": [{"uri": uri, "text": "secret"}]}))
            } else {
                success_response(id, json!({"contents": []}))
            }
        }
        _ => error_response(id, -32601, "method not found"),
    };
    Some(response)
}

fn success_response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

/// A tool definition advertising one string and one integer parameter.
pub fn sample_tool(name: &str) -> Value {
    json!({
        "name": name,
        "description": "test fixture",
        "inputSchema": {
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "count": {"type": "integer"},
            }
        }
    })
}

async fn post_rpc(State(behavior): State<Arc<MockBehavior>>, body: String) -> axum::response::Response {
    use axum::response::IntoResponse;
    match mock_response(&behavior, &body).await {
        Some(response) => axum::Json(response).into_response(),
        None => axum::http::StatusCode::ACCEPTED.into_response(),
    }
}

/// Starts a POST-style mock MCP server on an ephemeral port.
pub async fn spawn_post_server(behavior: MockBehavior) -> SocketAddr {
    let app = Router::new()
        .route("/mcp", post(post_rpc))
        .with_state(Arc::new(behavior));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("mock server addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

struct SseState {
    behavior: MockBehavior,
    outbound: broadcast::Sender<String>,
}

async fn sse_stream(
    State(state): State<Arc<SseState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let endpoint = stream::once(async {
        Ok(Event::default().event("endpoint").data("/messages"))
    });
    let messages = BroadcastStream::new(state.outbound.subscribe())
        .filter_map(|item| async move { item.ok().map(|data| Ok(Event::default().data(data))) });
    Sse::new(endpoint.chain(messages))
}

async fn sse_messages(
    State(state): State<Arc<SseState>>,
    body: String,
) -> axum::http::StatusCode {
    let state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Some(response) = mock_response(&state.behavior, &body).await {
            let _ = state.outbound.send(response.to_string());
        }
    });
    axum::http::StatusCode::ACCEPTED
}

/// Starts an SSE-style mock MCP server: GET `/mcp` serves the stream
/// (announcing `/messages`), POST `/messages` feeds responses back over it.
pub async fn spawn_sse_server(behavior: MockBehavior) -> SocketAddr {
    let (outbound, _) = broadcast::channel(64);
    let state = Arc::new(SseState { behavior, outbound });
    let app = Router::new()
        .route("/mcp", get(sse_stream))
        .route("/messages", post(sse_messages))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("mock server addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}
