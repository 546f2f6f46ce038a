//! Automated vulnerability probes.
//!
//! Runs after discovery against the tools and resources the server
//! advertised. Three probe families: type confusion (mistyped tool
//! arguments), reflection/injection (a template-and-markup payload echoed
//! back unescaped), and broken object-level authorization (adjacent
//! resource ids). Each probe is one correlated request with a hard wait
//! ceiling; a silent server costs one timeout, never a retry.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Timeouts;
use crate::engine::Engine;
use crate::session::SessionStore;
use crate::surface::{ResourceDef, ToolDef};
use crate::transport::jsonrpc::{JsonRpcRequest, error_codes};

/// Injection probe payload: a template expression plus markup, so one
/// request covers template evaluation and unescaped reflection.
pub const INJECTION_PAYLOAD: &str = r#"{{7*7}}'"<script>alert(1)</script>"#;

/// Numeric payload sent where a non-numeric type is declared.
pub const CONFUSION_NUMBER: i64 = 12345;

/// String payload sent where a numeric type is declared.
pub const CONFUSION_STRING: &str = "not-a-number";

/// Probe family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Mistyped argument accepted or leaked a stack trace.
    TypeConfusion,
    /// Payload reflected or evaluated in the result.
    Injection,
    /// Adjacent object id readable.
    Bola,
}

impl ProbeKind {
    /// Short label for findings output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TypeConfusion => "type-confusion",
            Self::Injection => "injection",
            Self::Bola => "bola",
        }
    }
}

/// One flagged behavior.
#[derive(Debug, Clone)]
pub struct ProbeFinding {
    /// Probe family that fired.
    pub kind: ProbeKind,
    /// Tool name or resource URI that was probed.
    pub target: String,
    /// Why it was flagged.
    pub evidence: String,
}

/// Builds the mistyped value for a declared parameter type: a string where
/// a number is declared, a number everywhere else.
#[must_use]
pub fn confusion_value(declared_type: &str) -> Value {
    match declared_type {
        "integer" | "number" => Value::String(CONFUSION_STRING.to_string()),
        _ => json!(CONFUSION_NUMBER),
    }
}

/// Decides whether a `tools/call` error payload indicates a type-handling
/// failure worth flagging: internal errors and leaked stack traces.
#[must_use]
pub fn flags_type_confusion(error: &Value) -> bool {
    let code = error.get("code").and_then(Value::as_i64);
    if code == Some(error_codes::INTERNAL_ERROR) {
        return true;
    }
    error
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m.to_lowercase().contains("stacktrace"))
}

/// Decides whether a success result reflects or evaluates the injection
/// payload.
#[must_use]
pub fn flags_injection(result: &Value) -> bool {
    let rendered = result.to_string();
    rendered.contains("49") || rendered.contains("<script>")
}

/// Neighboring URIs for the BOLA probe: the last contiguous digit run,
/// decremented and incremented. Negatives are skipped; a URI without
/// digits yields nothing.
#[must_use]
pub fn bola_neighbors(uri: &str) -> Vec<String> {
    let bytes = uri.as_bytes();
    let mut end = bytes.len();
    while end > 0 && !bytes[end - 1].is_ascii_digit() {
        end -= 1;
    }
    if end == 0 {
        return Vec::new();
    }
    let mut start = end;
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    let Ok(value) = uri[start..end].parse::<i64>() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for neighbor in [value - 1, value + 1] {
        if neighbor < 0 {
            continue;
        }
        out.push(format!("{}{}{}", &uri[..start], neighbor, &uri[end..]));
    }
    out
}

/// Decides whether a `resources/read` success result exposes content.
#[must_use]
pub fn flags_bola(result: &Value) -> bool {
    result
        .get("contents")
        .and_then(Value::as_array)
        .is_some_and(|c| !c.is_empty())
}

/// Security tester bound to a ready engine.
pub struct SecurityTester {
    engine: Engine,
    sessions: Arc<SessionStore>,
    findings: mpsc::UnboundedSender<ProbeFinding>,
    timeouts: Timeouts,
}

impl SecurityTester {
    /// Creates a tester and the receiving end of its findings channel.
    #[must_use]
    pub fn new(
        engine: Engine,
        sessions: Arc<SessionStore>,
        timeouts: Timeouts,
    ) -> (Self, mpsc::UnboundedReceiver<ProbeFinding>) {
        let (findings, findings_rx) = mpsc::unbounded_channel();
        (
            Self {
                engine,
                sessions,
                findings,
                timeouts,
            },
            findings_rx,
        )
    }

    /// Probes every tool and resource, one worker task per node so a slow
    /// target never stalls the others. Resolves when all workers are done.
    pub async fn scan(self: Arc<Self>, tools: Vec<ToolDef>, resources: Vec<ResourceDef>) {
        let mut workers = tokio::task::JoinSet::new();
        for tool in tools {
            let tester = Arc::clone(&self);
            workers.spawn(async move { tester.scan_tool(&tool).await });
        }
        for resource in resources {
            let tester = Arc::clone(&self);
            workers.spawn(async move { tester.scan_resource(&resource).await });
        }
        while workers.join_next().await.is_some() {}
    }

    /// Runs the type-confusion and injection probes against one tool.
    pub async fn scan_tool(&self, tool: &ToolDef) {
        let params = tool.parameters();
        if params.is_empty() {
            debug!(tool = %tool.name, "no declared parameters, skipping");
            return;
        }

        for (param, declared) in &params {
            let args = json!({ param: confusion_value(declared) });
            if let Some(response) = self.call_tool(&tool.name, args).await
                && let Some(error) = response.get("error")
                && flags_type_confusion(error)
            {
                self.emit(ProbeFinding {
                    kind: ProbeKind::TypeConfusion,
                    target: tool.name.clone(),
                    evidence: format!("mistyped '{param}' produced {error}"),
                });
            }
        }

        for (param, declared) in &params {
            if declared != "string" {
                continue;
            }
            let args = json!({ param: INJECTION_PAYLOAD });
            if let Some(response) = self.call_tool(&tool.name, args).await
                && let Some(result) = response.get("result")
                && flags_injection(result)
            {
                self.emit(ProbeFinding {
                    kind: ProbeKind::Injection,
                    target: tool.name.clone(),
                    evidence: format!("payload reflected via '{param}'"),
                });
            }
        }
    }

    /// Runs the BOLA probe against one resource.
    pub async fn scan_resource(&self, resource: &ResourceDef) {
        for neighbor in bola_neighbors(&resource.uri) {
            let params = json!({ "uri": neighbor });
            if let Some(response) = self.probe("resources/read", params).await
                && let Some(result) = response.get("result")
                && flags_bola(result)
            {
                self.emit(ProbeFinding {
                    kind: ProbeKind::Bola,
                    target: resource.uri.clone(),
                    evidence: format!("adjacent object '{neighbor}' readable"),
                });
            }
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Option<Value> {
        self.probe("tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }

    /// One correlated request. Registers a fresh id, sends through the
    /// engine, waits up to the probe ceiling. Timeouts are logged and
    /// abandoned.
    async fn probe(&self, method: &str, params: Value) -> Option<Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.sessions.register(id.clone(), tx);

        let request = JsonRpcRequest::new(id.clone(), method, Some(params));
        let payload = match serde_json::to_string(&request) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "probe encode failed");
                self.sessions.abandon(&id);
                return None;
            }
        };
        if let Err(e) = self.engine.send_request(payload).await {
            warn!(error = %e, method, "probe send failed");
            self.sessions.abandon(&id);
            return None;
        }

        match tokio::time::timeout(self.timeouts.probe, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => {
                debug!(method, "probe waiter dropped");
                None
            }
            Err(_) => {
                info!(method, id = %id, "probe timed out, abandoning");
                self.sessions.abandon(&id);
                None
            }
        }
    }

    fn emit(&self, finding: ProbeFinding) {
        warn!(
            kind = finding.kind.label(),
            target = %finding.target,
            evidence = %finding.evidence,
            "potential vulnerability"
        );
        let _ = self.findings.send(finding);
    }
}
