//! Endpoint auto-detection.
//!
//! Stateless pre-scan probing: a fixed set of likely MCP paths is hit with
//! an SSE-flavored GET and a WebSocket upgrade attempt, and the responses
//! are classified into transport guesses. Redirects are never followed;
//! a redirect to something that smells like a login flow is itself a
//! classification.

use percent_encoding::percent_decode_str;
use tracing::debug;

use crate::config::TransportKind;
use crate::error::TransportError;
use crate::transport::http::{self, ClientOptions};

/// Paths worth probing on an unknown host.
pub const CANDIDATE_PATHS: &[&str] = &["/mcp", "/sse", "/ws", "/", "/api/mcp", "/v1/mcp"];

/// Location substrings that indicate an authentication flow.
const AUTH_MARKERS: &[&str] = &[
    "doauth", "oauth", "/auth", "login", "signin", "sign-in", "saml", "/sso", "/cas/", "adfs",
    "openid", "authorize",
];

/// Probe target: host, port, and whether to speak TLS.
#[derive(Debug, Clone)]
pub struct DetectTarget {
    /// Hostname or IP.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Use `https` for probes.
    pub tls: bool,
}

impl DetectTarget {
    fn url(&self, path: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }
}

/// One detection guess.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectionGuess {
    /// Path the guess applies to.
    pub path: String,
    /// Transport that path appears to speak.
    pub transport: &'static str,
    /// Why the classifier fired.
    pub reason: String,
    /// Whether the endpoint appears auth-gated.
    pub auth_required: bool,
}

impl DetectionGuess {
    fn new(path: &str, transport: TransportKind, reason: impl Into<String>, auth: bool) -> Self {
        Self {
            path: path.to_string(),
            transport: transport.label(),
            reason: reason.into(),
            auth_required: auth,
        }
    }
}

/// Whether a redirect `Location` points at an authentication flow.
///
/// The header is percent-decoded and lowercased before matching, so
/// `Do%41uth`-style obfuscation and mixed case do not slip through.
#[must_use]
pub fn looks_like_auth_redirect(location: &str) -> bool {
    let decoded = percent_decode_str(location)
        .decode_utf8()
        .map_or_else(|_| location.to_lowercase(), |d| d.to_lowercase());
    AUTH_MARKERS.iter().any(|m| decoded.contains(m))
}

/// Classifies the response to the SSE-flavored GET probe.
#[must_use]
pub fn classify_sse_probe(
    path: &str,
    status: u16,
    content_type: &str,
    location: Option<&str>,
) -> Option<DetectionGuess> {
    match status {
        200 if content_type.contains("text/event-stream") => Some(DetectionGuess::new(
            path,
            TransportKind::Sse,
            "200 with event-stream content type",
            false,
        )),
        401 | 403 => Some(DetectionGuess::new(
            path,
            TransportKind::Sse,
            format!("{status} suggests a protected endpoint"),
            true,
        )),
        101 | 426 => Some(DetectionGuess::new(
            path,
            TransportKind::WebSocket,
            format!("{status} upgrade response"),
            false,
        )),
        300..=308 => {
            let location = location?;
            if looks_like_auth_redirect(location) {
                Some(DetectionGuess::new(
                    path,
                    TransportKind::Sse,
                    format!("redirect to auth flow at {location}"),
                    true,
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Classifies the response to the WebSocket upgrade probe.
///
/// 101/426 is definitive for any path. Anything else only counts on a
/// path that itself looks WebSocket-shaped, and only when the server did
/// not outright deny the path.
#[must_use]
pub fn classify_ws_probe(path: &str, status: u16) -> Option<DetectionGuess> {
    match status {
        101 | 426 => Some(DetectionGuess::new(
            path,
            TransportKind::WebSocket,
            format!("{status} upgrade response"),
            false,
        )),
        404 => None,
        _ if path.contains("ws") => Some(DetectionGuess::new(
            path,
            TransportKind::WebSocket,
            format!("ws-looking path answered {status}"),
            false,
        )),
        _ => None,
    }
}

/// Probes every candidate path on the target and returns all guesses.
pub async fn detect(target: &DetectTarget) -> Result<Vec<DetectionGuess>, TransportError> {
    let client = http::build_client(&ClientOptions {
        force_http1: true,
        no_redirect: true,
        timeout: Some(std::time::Duration::from_secs(5)),
        client_cert: None,
    })?;

    let mut guesses = Vec::new();
    for path in CANDIDATE_PATHS {
        let url = target.url(path);

        let mut ws_settled = false;
        match client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status().as_u16();
                let content_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                if let Some(guess) =
                    classify_sse_probe(path, status, &content_type, location.as_deref())
                {
                    ws_settled = guess.transport == TransportKind::WebSocket.label();
                    guesses.push(guess);
                }
            }
            Err(e) => debug!(url = %url, error = %e, "sse probe failed"),
        }

        if ws_settled {
            continue;
        }
        match client
            .get(&url)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "bWNwLXN1cmZhY2UtcHJvYmU=")
            .send()
            .await
        {
            Ok(response) => {
                if let Some(guess) = classify_ws_probe(path, response.status().as_u16()) {
                    guesses.push(guess);
                }
            }
            Err(e) => debug!(url = %url, error = %e, "ws probe failed"),
        }
    }
    Ok(guesses)
}
