//! Transport layer for MCP connections.
//!
//! Three transports share one object-safe [`Transport`] trait: a persistent
//! SSE stream with decoupled POST sends, a full-duplex WebSocket, and a
//! POST-only request/response mode. Inbound traffic is pushed into an
//! unbounded channel as [`TransportEvent`]s; the enumeration engine owns the
//! receiving end and does all correlation.

pub mod http;
pub mod jsonrpc;
pub mod post;
pub mod sse;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TransportKind;
use crate::error::TransportError;

pub use http::USER_AGENT;

/// Inbound notifications from a transport to its consumer.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport can now send. Emitted exactly once per connection.
    Opened,
    /// One raw JSON-RPC message (batches are already split).
    Message(String),
    /// The connection ended, cleanly or not. Terminal.
    Closed,
    /// A connection-level failure. Terminal.
    Error(TransportError),
}

/// Sender half of a transport's event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// An MCP client transport.
///
/// `close` must be idempotent and callable from any task while `connect` or
/// `send` is in flight; implementations back it with a cancellation token.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the connection. Resolves once the connection attempt has
    /// been started; readiness is signalled via [`TransportEvent::Opened`].
    async fn connect(&self) -> Result<(), TransportError>;

    /// Sends one serialized JSON-RPC message.
    async fn send(&self, payload: String) -> Result<(), TransportError>;

    /// Tears the connection down. Idempotent.
    fn close(&self);

    /// Which transport this is, for logs and retry policy.
    fn kind(&self) -> TransportKind;
}

/// Constructs the transport named by `config.transport`.
///
/// `timeouts` carries the endpoint-announcement wait for SSE sends.
/// `force_legacy` pins the SSE transport's HTTP client to HTTP/1.1; it is
/// set by the engine's single retry attempt and ignored by the other
/// transports.
pub fn build(
    config: &crate::config::ConnectionConfig,
    events: EventSender,
    timeouts: &crate::config::Timeouts,
    force_legacy: bool,
) -> Result<std::sync::Arc<dyn Transport>, TransportError> {
    match config.transport {
        TransportKind::Sse => Ok(std::sync::Arc::new(sse::SseTransport::new(
            config.clone(),
            events,
            force_legacy,
            timeouts.endpoint_wait,
        )?)),
        TransportKind::WebSocket => Ok(std::sync::Arc::new(ws::WebSocketTransport::new(
            config.clone(),
            events,
        ))),
        TransportKind::Post => Ok(std::sync::Arc::new(post::PostTransport::new(
            config.clone(),
            events,
        )?)),
    }
}

/// Delivers a raw payload as one or more `Message` events, splitting JSON
/// batches. Send failures mean the consumer is gone and are ignored.
pub(crate) fn deliver(events: &EventSender, raw: &str) {
    for part in jsonrpc::split_batch(raw) {
        let _ = events.send(TransportEvent::Message(part));
    }
}
