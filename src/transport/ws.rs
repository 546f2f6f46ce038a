//! WebSocket transport.
//!
//! One full-duplex connection carries both directions as text frames. TLS
//! trust matches the HTTP transports: invalid certificates and hostnames
//! are accepted, and a PKCS#12 client identity is presented when configured.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::TransportError;

use super::http::USER_AGENT;
use super::{EventSender, Transport, TransportEvent, deliver};

/// Full-duplex WebSocket transport.
pub struct WebSocketTransport {
    config: ConnectionConfig,
    events: EventSender,
    outbound: mpsc::UnboundedSender<String>,
    outbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
}

impl WebSocketTransport {
    /// Creates the transport.
    #[must_use]
    pub fn new(config: ConnectionConfig, events: EventSender) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        Self {
            config,
            events,
            outbound,
            outbound_rx: std::sync::Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
        }
    }

    fn tls_connector(
        config: &ConnectionConfig,
    ) -> Result<tokio_tungstenite::Connector, TransportError> {
        let mut builder = native_tls::TlsConnector::builder();
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
        if let Some(cert) = &config.client_cert {
            let der = std::fs::read(&cert.path).map_err(TransportError::Io)?;
            let identity = native_tls::Identity::from_pkcs12(&der, &cert.password)
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            builder.identity(identity);
        }
        let connector = builder
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(tokio_tungstenite::Connector::NativeTls(connector))
    }

    async fn run(
        config: ConnectionConfig,
        events: EventSender,
        mut outbound: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) {
        let url = config.ws_url();
        let mut request = match url.clone().into_client_request() {
            Ok(r) => r,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(TransportError::ConnectionFailed(
                    e.to_string(),
                )));
                return;
            }
        };
        {
            let headers = request.headers_mut();
            if let Ok(ua) = USER_AGENT.parse() {
                headers.insert("User-Agent", ua);
            }
            for (name, value) in super::http::header_map(&config.headers) {
                if let Some(name) = name {
                    headers.insert(name, value);
                }
            }
        }

        let connector = match Self::tls_connector(&config) {
            Ok(c) => c,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e));
                return;
            }
        };

        let connect = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(connector),
        );
        let stream = tokio::select! {
            () = cancel.cancelled() => return,
            r = connect => r,
        };
        let (ws, _) = match stream {
            Ok(pair) => pair,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(TransportError::ConnectionFailed(
                    e.to_string(),
                )));
                return;
            }
        };

        info!(url = %url, "websocket established");
        let _ = events.send(TransportEvent::Opened);

        let (mut sink, mut source) = ws.split();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                payload = outbound.recv() => {
                    let Some(payload) = payload else { break };
                    if let Err(e) = sink.send(Message::Text(payload.into())).await {
                        let _ = events.send(TransportEvent::Error(
                            TransportError::ConnectionClosed(e.to_string()),
                        ));
                        return;
                    }
                }
                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => deliver(&events, &text),
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = events.send(TransportEvent::Closed);
                            return;
                        }
                        Some(Ok(_)) => debug!("ignoring non-text frame"),
                        Some(Err(e)) => {
                            let _ = events.send(TransportEvent::Error(
                                TransportError::ConnectionClosed(e.to_string()),
                            ));
                            return;
                        }
                    }
                }
            }
        }
        let _ = events.send(TransportEvent::Closed);
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let rx = self
            .outbound_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let Some(rx) = rx else {
            warn!("websocket connect called twice");
            return Ok(());
        };
        tokio::spawn(Self::run(
            self.config.clone(),
            self.events.clone(),
            rx,
            self.cancel.clone(),
        ));
        Ok(())
    }

    async fn send(&self, payload: String) -> Result<(), TransportError> {
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::ConnectionClosed("websocket worker gone".to_string()))
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}
