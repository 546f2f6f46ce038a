//! SSE transport against a mock server with a real event stream.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{MockBehavior, spawn_sse_server};
use mcp_surface::config::{ConnectionConfig, Timeouts, TransportKind};
use mcp_surface::engine::{Engine, EngineState, EngineUpdate};
use mcp_surface::session::SessionStore;
use mcp_surface::transport::{self, TransportEvent};

fn short_timeouts() -> Timeouts {
    Timeouts {
        handshake: Duration::from_secs(5),
        endpoint_wait: Duration::from_millis(500),
        probe: Duration::from_secs(1),
    }
}

fn config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        tls: false,
        path: "/mcp".to_string(),
        transport: TransportKind::Sse,
        headers: vec![],
        init_options: None,
        client_cert: None,
    }
}

#[tokio::test]
async fn stream_opens_and_routes_messages() {
    let addr = spawn_sse_server(MockBehavior::default()).await;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let t = transport::build(&config(addr), events_tx, &short_timeouts(), false).unwrap();
    t.connect().await.unwrap();

    let first = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no transport event")
        .expect("event channel closed");
    assert!(matches!(first, TransportEvent::Opened));

    // A request POSTed to the announced endpoint comes back on the stream.
    let request = json!({
        "jsonrpc": "2.0",
        "id": "probe-1",
        "method": "tools/list",
        "params": {},
    });
    t.send(request.to_string()).await.unwrap();

    let inbound = loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no inbound message")
            .expect("event channel closed");
        if let TransportEvent::Message(raw) = event {
            break raw;
        }
    };
    let parsed: serde_json::Value = serde_json::from_str(&inbound).unwrap();
    assert_eq!(parsed["id"], "probe-1");
    assert!(parsed["result"]["tools"].is_array());

    t.close();
}

#[tokio::test]
async fn engine_reaches_ready_over_sse() {
    let addr = spawn_sse_server(MockBehavior {
        tools: json!([common::sample_tool("echo")]),
        resources: json!([{"uri": "db://items/5"}]),
        ..MockBehavior::default()
    })
    .await;

    let (engine, mut updates) = Engine::new(Arc::new(SessionStore::new()), short_timeouts());
    engine.start(config(addr));

    loop {
        let update = timeout(Duration::from_secs(10), updates.recv())
            .await
            .expect("timed out before ready")
            .expect("update channel closed");
        if let EngineUpdate::Status { state, detail } = update {
            match state {
                EngineState::Ready => break,
                EngineState::Failed | EngineState::Cancelled => {
                    panic!("scan did not reach ready: {detail}")
                }
                _ => {}
            }
        }
    }
    assert_eq!(engine.state(), EngineState::Ready);
    engine.cancel();
}

#[tokio::test]
async fn close_is_idempotent_mid_stream() {
    let addr = spawn_sse_server(MockBehavior::default()).await;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let t = transport::build(&config(addr), events_tx, &short_timeouts(), false).unwrap();
    t.connect().await.unwrap();

    let first = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no transport event")
        .expect("event channel closed");
    assert!(matches!(first, TransportEvent::Opened));

    t.close();
    t.close();

    // The reader task winds down with a terminal event.
    let last = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no terminal event")
        .expect("event channel closed");
    assert!(matches!(
        last,
        TransportEvent::Closed | TransportEvent::Error(_)
    ));
}
