//! Shared `reqwest` client construction.
//!
//! All HTTP traffic (SSE stream, decoupled POSTs, POST-only transport, the
//! endpoint detector) goes through clients built here: permissive TLS trust
//! so intercepted and self-signed targets work, optional PKCS#12 client
//! identity for mutual TLS, and an optional HTTP/1.1 pin for servers that
//! mishandle h2 upgrades.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::config::ClientCert;
use crate::error::{ConfigError, TransportError};

/// Browser-style User-Agent sent on every HTTP request. Some gateways route
/// non-browser agents to different backends.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Knobs for [`build_client`].
#[derive(Debug, Default)]
pub struct ClientOptions {
    /// Pin the client to HTTP/1.1 (legacy retry mode).
    pub force_http1: bool,
    /// Disable redirect following (the detector classifies redirects itself).
    pub no_redirect: bool,
    /// Overall per-request timeout. `None` leaves streams unbounded.
    pub timeout: Option<Duration>,
    /// PKCS#12 client identity for mutual TLS.
    pub client_cert: Option<ClientCert>,
}

/// Builds a `reqwest` client with permissive certificate trust.
pub fn build_client(opts: &ClientOptions) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10));

    if opts.force_http1 {
        builder = builder.http1_only();
    }
    if opts.no_redirect {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    if let Some(timeout) = opts.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(cert) = &opts.client_cert {
        let identity =
            load_identity(cert).map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
}

/// Loads a PKCS#12 client identity from disk.
pub fn load_identity(cert: &ClientCert) -> Result<reqwest::Identity, ConfigError> {
    let der = std::fs::read(&cert.path).map_err(|e| ConfigError::ClientCert {
        path: cert.path.clone(),
        message: e.to_string(),
    })?;
    reqwest::Identity::from_pkcs12_der(&der, &cert.password).map_err(|e| ConfigError::ClientCert {
        path: cert.path.clone(),
        message: e.to_string(),
    })
}

/// Converts configured `(name, value)` pairs into a `HeaderMap`.
///
/// Pairs that do not survive HTTP header validation are logged and skipped
/// rather than aborting the connection.
#[must_use]
pub fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(n), Ok(v)) => {
                map.append(n, v);
            }
            _ => warn!(header = %name, "skipping invalid header"),
        }
    }
    map
}
