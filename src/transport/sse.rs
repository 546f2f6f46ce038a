//! Server-Sent Events transport.
//!
//! Maintains one long-lived GET stream for inbound traffic and issues a
//! decoupled HTTP POST per outbound message. Servers announce the POST
//! target through an `endpoint` control event; until that arrives (or when
//! it never does) sends fall back to the configured path. An announced
//! endpoint pointing at a different host or port than the original
//! connection is rejected, so a hostile stream cannot redirect our POSTs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::TransportError;

use super::http::{self, ClientOptions};
use super::{EventSender, Transport, TransportEvent, deliver};

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, when present.
    pub event: Option<String>,
    /// Accumulated `data:` lines, newline-joined.
    pub data: String,
}

/// Incremental SSE frame decoder.
///
/// Feed raw byte chunks as they arrive; completed events come back out.
/// Handles partial lines across chunk boundaries, CRLF line endings,
/// comment lines, and the end-of-stream flush of a trailing unterminated
/// event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk of stream text, returning any events it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.push_line(line.trim_end_matches(['\n', '\r'])) {
                out.push(event);
            }
        }
        out
    }

    /// Flushes a pending event at end of stream, if any.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let trailing = std::mem::take(&mut self.buffer);
        if !trailing.is_empty() {
            self.push_line(trailing.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim().to_string());
        }
        // "id:", "retry:", and comment lines are irrelevant here
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Resolves an announced `endpoint` event against the original connection.
///
/// Relative URLs are joined with the connection's base. Absolute URLs must
/// keep the original host (case-insensitive) and port; anything else is
/// rejected and the caller stays on the configured default path.
#[must_use]
pub fn resolve_post_endpoint(announced: &str, config: &ConnectionConfig) -> Option<String> {
    let base = Url::parse(&config.base_url()).ok()?;
    let resolved = base.join(announced.trim()).ok()?;

    let same_host = resolved
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(&config.host));
    let same_port = resolved.port_or_known_default() == Some(config.port);
    if !same_host || !same_port {
        warn!(
            announced = %announced,
            "rejecting announced endpoint on foreign host/port"
        );
        return None;
    }
    Some(resolved.to_string())
}

/// SSE transport: GET stream inbound, per-message POST outbound.
pub struct SseTransport {
    config: ConnectionConfig,
    events: EventSender,
    client: reqwest::Client,
    endpoint: watch::Sender<Option<String>>,
    cancel: CancellationToken,
    endpoint_wait: Duration,
}

impl SseTransport {
    /// Creates the transport. `force_legacy` pins the HTTP client to
    /// HTTP/1.1 for servers that mishandle h2; `endpoint_wait` bounds how
    /// long a send waits for the server-announced endpoint.
    pub fn new(
        config: ConnectionConfig,
        events: EventSender,
        force_legacy: bool,
        endpoint_wait: Duration,
    ) -> Result<Self, TransportError> {
        let client = http::build_client(&ClientOptions {
            force_http1: force_legacy,
            client_cert: config.client_cert.clone(),
            ..ClientOptions::default()
        })?;
        let (endpoint, _) = watch::channel(None);
        Ok(Self {
            config,
            events,
            client,
            endpoint,
            cancel: CancellationToken::new(),
            endpoint_wait,
        })
    }

    /// Waits briefly for the server-announced endpoint, falling back to the
    /// configured path.
    async fn post_target(&self) -> String {
        let mut rx = self.endpoint.subscribe();
        let wait = async {
            loop {
                if let Some(url) = rx.borrow_and_update().clone() {
                    return url;
                }
                if rx.changed().await.is_err() {
                    // sender gone, fall back
                    return self.config.endpoint_url();
                }
            }
        };
        match tokio::time::timeout(self.endpoint_wait, wait).await {
            Ok(url) => url,
            Err(_) => {
                debug!("no endpoint event within wait window, using configured path");
                self.config.endpoint_url()
            }
        }
    }

    async fn run_stream(
        client: reqwest::Client,
        config: ConnectionConfig,
        events: EventSender,
        endpoint: watch::Sender<Option<String>>,
        cancel: CancellationToken,
    ) {
        let request = client
            .get(config.endpoint_url())
            .header("Accept", "text/event-stream")
            .headers(http::header_map(&config.headers));

        let response = tokio::select! {
            () = cancel.cancelled() => return,
            r = request.send() => r,
        };

        let mut response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let status = r.status().as_u16();
                let body = r.text().await.unwrap_or_default();
                let _ = events.send(TransportEvent::Error(TransportError::HttpStatus {
                    status,
                    body: body.chars().take(256).collect(),
                }));
                return;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(TransportError::ConnectionFailed(
                    e.to_string(),
                )));
                return;
            }
        };

        info!(url = %config.endpoint_url(), "event stream established");
        let _ = events.send(TransportEvent::Opened);

        let mut decoder = SseDecoder::new();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => break,
                c = response.chunk() => c,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    for event in decoder.push(&text) {
                        Self::handle_event(&config, &events, &endpoint, event);
                    }
                }
                Ok(None) => {
                    if let Some(event) = decoder.finish() {
                        Self::handle_event(&config, &events, &endpoint, event);
                    }
                    let _ = events.send(TransportEvent::Closed);
                    return;
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(
                        TransportError::ConnectionClosed(e.to_string()),
                    ));
                    return;
                }
            }
        }
        let _ = events.send(TransportEvent::Closed);
    }

    fn handle_event(
        config: &ConnectionConfig,
        events: &EventSender,
        endpoint: &watch::Sender<Option<String>>,
        event: SseEvent,
    ) {
        if event.event.as_deref() == Some("endpoint") {
            if let Some(url) = resolve_post_endpoint(&event.data, config) {
                info!(url = %url, "server announced message endpoint");
                // send_replace: the value must stick even while nothing
                // is subscribed between sends.
                endpoint.send_replace(Some(url));
            }
            return;
        }
        deliver(events, &event.data);
    }

    /// Handles the body of a POST response, which servers answer either with
    /// a direct JSON payload or with a one-shot embedded event stream.
    pub(crate) fn deliver_post_response(events: &EventSender, content_type: &str, body: &str) {
        if content_type.contains("text/event-stream") {
            let mut decoder = SseDecoder::new();
            for event in decoder.push(body) {
                deliver(events, &event.data);
            }
            if let Some(event) = decoder.finish() {
                deliver(events, &event.data);
            }
        } else if !body.trim().is_empty() {
            deliver(events, body);
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        tokio::spawn(Self::run_stream(
            self.client.clone(),
            self.config.clone(),
            self.events.clone(),
            self.endpoint.clone(),
            self.cancel.clone(),
        ));
        Ok(())
    }

    async fn send(&self, payload: String) -> Result<(), TransportError> {
        let url = self.post_target().await;
        let client = self.client.clone();
        let headers = http::header_map(&self.config.headers);
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        // Decoupled send: the stream stays responsive while POSTs run.
        tokio::spawn(async move {
            let request = client
                .post(&url)
                .header("Content-Type", "application/json")
                .headers(headers)
                .body(payload);
            let response = tokio::select! {
                () = cancel.cancelled() => return,
                r = request.send() => r,
            };
            match response {
                Ok(r) if r.status().is_success() => {
                    let content_type = r
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    match r.text().await {
                        Ok(body) => {
                            SseTransport::deliver_post_response(&events, &content_type, &body);
                        }
                        Err(e) => debug!(error = %e, "failed reading POST response body"),
                    }
                }
                Ok(r) => warn!(status = r.status().as_u16(), url = %url, "POST rejected"),
                Err(e) => warn!(error = %e, url = %url, "POST failed"),
            }
        });
        Ok(())
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}
