//! POST-only transport.
//!
//! No persistent stream: every outbound message is one HTTP exchange
//! against the configured path, and whatever the response body carries is
//! delivered as inbound traffic. Suits stateless MCP servers that answer
//! each request directly.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::TransportError;

use super::http::{self, ClientOptions};
use super::sse::SseTransport;
use super::{EventSender, Transport, TransportEvent};

/// Request/response transport with no inbound stream.
pub struct PostTransport {
    config: ConnectionConfig,
    events: EventSender,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl PostTransport {
    /// Creates the transport.
    pub fn new(config: ConnectionConfig, events: EventSender) -> Result<Self, TransportError> {
        let client = http::build_client(&ClientOptions {
            client_cert: config.client_cert.clone(),
            ..ClientOptions::default()
        })?;
        Ok(Self {
            config,
            events,
            client,
            cancel: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Transport for PostTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // Nothing to establish: ready as soon as the consumer is listening.
        let _ = self.events.send(TransportEvent::Opened);
        Ok(())
    }

    async fn send(&self, payload: String) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::ConnectionClosed("transport closed".to_string()));
        }

        let request = self
            .client
            .post(self.config.endpoint_url())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .headers(http::header_map(&self.config.headers))
            .body(payload);
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        // The exchange runs detached so a slow server never stalls the
        // caller's event loop; failures come back as Error events.
        tokio::spawn(async move {
            let response = tokio::select! {
                () = cancel.cancelled() => return,
                r = request.send() => r,
            };
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(TransportError::ConnectionFailed(
                        e.to_string(),
                    )));
                    return;
                }
            };
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let _ = events.send(TransportEvent::Error(TransportError::HttpStatus {
                    status,
                    body: body.chars().take(256).collect(),
                }));
                return;
            }

            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            match response.text().await {
                Ok(body) => SseTransport::deliver_post_response(&events, &content_type, &body),
                Err(e) => debug!(error = %e, "failed reading response body"),
            }
        });
        Ok(())
    }

    fn close(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            let _ = self.events.send(TransportEvent::Closed);
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Post
    }
}
