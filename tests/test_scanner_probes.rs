//! Security probes end to end against vulnerable and clean mock servers.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use common::{CallGate, MockBehavior, ToolCallMode, spawn_post_server};
use mcp_surface::config::{ConnectionConfig, Timeouts, TransportKind};
use mcp_surface::engine::{Engine, EngineState, EngineUpdate};
use mcp_surface::scanner::{ProbeFinding, ProbeKind, SecurityTester};
use mcp_surface::session::SessionStore;
use mcp_surface::surface::{ResourceDef, ToolDef};

fn config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        tls: false,
        path: "/mcp".to_string(),
        transport: TransportKind::Post,
        headers: vec![],
        init_options: None,
        client_cert: None,
    }
}

fn timeouts() -> Timeouts {
    Timeouts {
        handshake: Duration::from_secs(5),
        endpoint_wait: Duration::from_millis(500),
        probe: Duration::from_secs(2),
    }
}

async fn ready_engine(addr: SocketAddr) -> (Engine, Arc<SessionStore>) {
    let sessions = Arc::new(SessionStore::new());
    let (engine, mut updates) = Engine::new(Arc::clone(&sessions), timeouts());
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
                    panic!("engine not ready: {detail}")
                }
                _ => {}
            }
        }
    }
    (engine, sessions)
}

fn sample_tool_def() -> ToolDef {
    serde_json::from_value(common::sample_tool("echo")).unwrap()
}

async fn run_scan(
    addr: SocketAddr,
    tools: Vec<ToolDef>,
    resources: Vec<ResourceDef>,
) -> Vec<ProbeFinding> {
    let (engine, sessions) = ready_engine(addr).await;
    let (tester, mut findings_rx) = SecurityTester::new(engine.clone(), sessions, timeouts());
    Arc::new(tester).scan(tools, resources).await;
    engine.cancel();

    let mut findings = Vec::new();
    while let Ok(finding) = findings_rx.try_recv() {
        findings.push(finding);
    }
    findings
}

#[tokio::test]
async fn echo_server_flags_injection() {
    let addr = spawn_post_server(MockBehavior {
        tools: json!([common::sample_tool("echo")]),
        tool_call: ToolCallMode::Echo,
        ..MockBehavior::default()
    })
    .await;

    let findings = run_scan(addr, vec![sample_tool_def()], vec![]).await;
    assert!(
        findings
            .iter()
            .any(|f| f.kind == ProbeKind::Injection && f.target == "echo"),
        "expected injection finding, got {findings:?}"
    );
}

#[tokio::test]
async fn stacktrace_server_flags_type_confusion() {
    let addr = spawn_post_server(MockBehavior {
        tools: json!([common::sample_tool("fragile")]),
        tool_call: ToolCallMode::InternalError,
        ..MockBehavior::default()
    })
    .await;

    let mut tool = sample_tool_def();
    tool.name = "fragile".to_string();
    let findings = run_scan(addr, vec![tool], vec![]).await;
    assert!(
        findings
            .iter()
            .any(|f| f.kind == ProbeKind::TypeConfusion && f.target == "fragile"),
        "expected type confusion finding, got {findings:?}"
    );
}

#[tokio::test]
async fn clean_server_yields_no_findings() {
    let addr = spawn_post_server(MockBehavior {
        tools: json!([common::sample_tool("strict")]),
        tool_call: ToolCallMode::Clean,
        ..MockBehavior::default()
    })
    .await;

    let mut tool = sample_tool_def();
    tool.name = "strict".to_string();
    let findings = run_scan(addr, vec![tool], vec![]).await;
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");
}

#[tokio::test]
async fn tools_are_probed_on_independent_workers() {
    // Every tools/call is held until both tools have called in. Probing
    // the tools one after another would starve the first tool behind the
    // gate; per-tool workers satisfy it immediately.
    let addr = spawn_post_server(MockBehavior {
        tools: json!([common::sample_tool("left"), common::sample_tool("right")]),
        tool_call: ToolCallMode::Echo,
        call_gate: Some(CallGate::new(2)),
        ..MockBehavior::default()
    })
    .await;

    let left: ToolDef = serde_json::from_value(common::sample_tool("left")).unwrap();
    let right: ToolDef = serde_json::from_value(common::sample_tool("right")).unwrap();
    let findings = run_scan(addr, vec![left, right], vec![]).await;

    for name in ["left", "right"] {
        assert!(
            findings
                .iter()
                .any(|f| f.kind == ProbeKind::Injection && f.target == name),
            "missing injection finding for {name}, got {findings:?}"
        );
    }
}

#[tokio::test]
async fn open_resources_flag_bola() {
    let addr = spawn_post_server(MockBehavior {
        resources: json!([{"uri": "file:///logs/123"}]),
        open_resources: true,
        ..MockBehavior::default()
    })
    .await;

    let resource = ResourceDef {
        uri: "file:///logs/123".to_string(),
        name: None,
        description: None,
    };
    let findings = run_scan(addr, vec![], vec![resource]).await;
    let bola: Vec<_> = findings
        .iter()
        .filter(|f| f.kind == ProbeKind::Bola)
        .collect();
    assert!(!bola.is_empty(), "expected bola findings, got {findings:?}");
    assert!(bola.iter().all(|f| f.target == "file:///logs/123"));
}

#[tokio::test]
async fn closed_resources_yield_no_bola() {
    let addr = spawn_post_server(MockBehavior {
        resources: json!([{"uri": "file:///logs/123"}]),
        open_resources: false,
        ..MockBehavior::default()
    })
    .await;

    let resource = ResourceDef {
        uri: "file:///logs/123".to_string(),
        name: None,
        description: None,
    };
    let findings = run_scan(addr, vec![], vec![resource]).await;
    assert!(findings.is_empty(), "unexpected findings: {findings:?}");
}
