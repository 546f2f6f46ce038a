//! Connection and timing configuration.
//!
//! [`ConnectionConfig`] captures everything needed to reach one MCP server:
//! target address, transport kind, TLS posture, extra headers, and raw
//! initialization options. [`Timeouts`] holds the ceilings the engine and
//! scanner wait against, overridable through environment variables so tests
//! can shrink them.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;

/// Which transport to speak to the target with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Persistent `text/event-stream` with decoupled POST sends.
    #[default]
    Sse,
    /// Full-duplex WebSocket, text frames both ways.
    WebSocket,
    /// One HTTP exchange per outbound message, no persistent stream.
    Post,
}

impl TransportKind {
    /// Human-readable label used in status lines and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::WebSocket => "websocket",
            Self::Post => "post",
        }
    }

    /// Whether a failed attempt may be retried in legacy HTTP/1.1 mode.
    ///
    /// Only the SSE transport has a meaningful legacy fallback; WebSocket
    /// and POST-only attempts fail outright.
    #[must_use]
    pub const fn retryable(self) -> bool {
        matches!(self, Self::Sse)
    }
}

/// Target connection parameters for one scan.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Target hostname or IP.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Whether to use `https`/`wss`.
    pub tls: bool,
    /// Request path, leading slash included.
    pub path: String,
    /// Transport to connect with.
    pub transport: TransportKind,
    /// Extra headers applied to every HTTP request, in order.
    pub headers: Vec<(String, String)>,
    /// Raw `--init-options` JSON, merged into the `initialize` params.
    pub init_options: Option<String>,
    /// PKCS#12 client identity for mutual TLS.
    pub client_cert: Option<ClientCert>,
}

/// PKCS#12 client identity, loaded lazily by the HTTP client builder.
#[derive(Debug, Clone)]
pub struct ClientCert {
    /// Path to the `.p12`/`.pfx` bundle.
    pub path: String,
    /// Bundle password, possibly empty.
    pub password: String,
}

impl ConnectionConfig {
    /// Base URL without path, e.g. `https://host:8443`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Full URL of the configured path.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("{}{}", self.base_url(), normalize_path(&self.path))
    }

    /// WebSocket URL of the configured path (`ws`/`wss` scheme).
    #[must_use]
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}{}",
            self.host,
            self.port,
            normalize_path(&self.path)
        )
    }

    /// Parses the raw `--init-options` JSON into an object map.
    ///
    /// Best effort: invalid JSON or a non-object value is logged and treated
    /// as absent, so a typo never aborts a scan.
    #[must_use]
    pub fn parsed_init_options(&self) -> Option<serde_json::Map<String, Value>> {
        let raw = self.init_options.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => {
                warn!("ignoring --init-options: not a JSON object");
                None
            }
            Err(e) => {
                warn!(error = %e, "ignoring --init-options: invalid JSON");
                None
            }
        }
    }
}

/// Ensures a path begins with exactly one `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Parses one `--header` argument of the form `Name: value`.
pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidHeader(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::InvalidHeader(raw.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Reads a numeric environment variable, falling back to a default when
/// unset or unparsable.
#[must_use]
pub fn env_or(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Wait ceilings used across the engine and scanner.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Ceiling on the `initialize` round trip.
    pub handshake: Duration,
    /// How long an SSE `send` waits for the announced endpoint.
    pub endpoint_wait: Duration,
    /// Ceiling on each security probe round trip.
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_millis(env_or("MCP_SURFACE_HANDSHAKE_TIMEOUT_MS", 30_000)),
            endpoint_wait: Duration::from_millis(env_or("MCP_SURFACE_ENDPOINT_WAIT_MS", 2_000)),
            probe: Duration::from_millis(env_or("MCP_SURFACE_PROBE_TIMEOUT_MS", 5_000)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            host: "target.example".to_string(),
            port: 8443,
            tls: true,
            path: "/mcp".to_string(),
            transport: TransportKind::Sse,
            headers: vec![],
            init_options: None,
            client_cert: None,
        }
    }

    #[test]
    fn test_base_url() {
        assert_eq!(config().base_url(), "https://target.example:8443");
    }

    #[test]
    fn test_endpoint_url_plain() {
        let mut c = config();
        c.tls = false;
        c.port = 8080;
        assert_eq!(c.endpoint_url(), "http://target.example:8080/mcp");
    }

    #[test]
    fn test_ws_url_scheme() {
        let mut c = config();
        assert_eq!(c.ws_url(), "wss://target.example:8443/mcp");
        c.tls = false;
        assert_eq!(c.ws_url(), "ws://target.example:8443/mcp");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/mcp"), "/mcp");
        assert_eq!(normalize_path("mcp"), "/mcp");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("  /sse "), "/sse");
    }

    #[test]
    fn test_parse_header_ok() {
        let (name, value) = parse_header("Authorization: Bearer xyz").unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer xyz");
    }

    #[test]
    fn test_parse_header_value_with_colon() {
        let (name, value) = parse_header("X-Forward: http://a:1").unwrap();
        assert_eq!(name, "X-Forward");
        assert_eq!(value, "http://a:1");
    }

    #[test]
    fn test_parse_header_rejects_missing_colon() {
        assert!(parse_header("not-a-header").is_err());
        assert!(parse_header(": value-only").is_err());
    }

    #[test]
    fn test_parsed_init_options_object() {
        let mut c = config();
        c.init_options = Some(r#"{"protocolVersion":"2025-01-01"}"#.to_string());
        let map = c.parsed_init_options().unwrap();
        assert_eq!(map["protocolVersion"], "2025-01-01");
    }

    #[test]
    fn test_parsed_init_options_invalid_ignored() {
        let mut c = config();
        c.init_options = Some("{broken".to_string());
        assert!(c.parsed_init_options().is_none());
    }

    #[test]
    fn test_parsed_init_options_non_object_ignored() {
        let mut c = config();
        c.init_options = Some("[1,2]".to_string());
        assert!(c.parsed_init_options().is_none());
    }

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("MCP_SURFACE_TEST_UNSET_VAR", 1234), 1234);
    }

    #[test]
    fn test_transport_kind_retryable() {
        assert!(TransportKind::Sse.retryable());
        assert!(!TransportKind::WebSocket.retryable());
        assert!(!TransportKind::Post.retryable());
    }
}
