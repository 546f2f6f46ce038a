//! `scan` command: connect, enumerate, optionally probe.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use crate::cli::args::{OutputFormat, ScanArgs};
use crate::config::{ClientCert, ConnectionConfig, Timeouts, parse_header};
use crate::engine::{Engine, EngineState, EngineUpdate, Phase};
use crate::error::{EngineError, McpSurfaceError};
use crate::scanner::{ProbeFinding, SecurityTester};
use crate::session::SessionStore;
use crate::surface::{
    PromptDef, ResourceDef, ToolDef, prompts_from_result, resources_from_result, tools_from_result,
};

/// Everything a finished scan learned, for rendering.
#[derive(Debug, Default)]
struct ScanReport {
    server_info: Option<Value>,
    tools: Vec<ToolDef>,
    resources: Vec<ResourceDef>,
    prompts: Vec<PromptDef>,
    findings: Vec<ProbeFinding>,
}

fn build_config(args: &ScanArgs) -> Result<ConnectionConfig, McpSurfaceError> {
    let headers = args
        .headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let client_cert = args.client_cert.as_ref().map(|path| ClientCert {
        path: path.display().to_string(),
        password: args.cert_password.clone().unwrap_or_default(),
    });
    Ok(ConnectionConfig {
        host: args.host.clone(),
        port: args.port,
        tls: args.tls,
        path: args.path.clone(),
        transport: args.transport.into(),
        headers,
        init_options: args.init_options.clone(),
        client_cert,
    })
}

/// Runs a scan to completion.
pub async fn run(args: &ScanArgs) -> Result<(), McpSurfaceError> {
    let config = build_config(args)?;
    let human = args.format == OutputFormat::Human;

    let sessions = Arc::new(SessionStore::new());
    let timeouts = Timeouts::default();
    let (engine, mut updates) = Engine::new(Arc::clone(&sessions), timeouts);
    engine.start(config.clone());

    // One retry happens inside the engine for SSE targets, so the second
    // Failed status is the final verdict.
    let allowed_failures = if config.transport.retryable() { 2 } else { 1 };
    let mut failures = 0;
    let mut report = ScanReport::default();

    while let Some(update) = updates.recv().await {
        match update {
            EngineUpdate::Status { state, detail } => {
                if human {
                    println!("[{}] {detail}", state.label());
                }
                match state {
                    EngineState::Ready => break,
                    EngineState::Cancelled => return Err(EngineError::Cancelled.into()),
                    EngineState::Failed => {
                        failures += 1;
                        if failures >= allowed_failures {
                            return Err(EngineError::ScanFailed(detail).into());
                        }
                    }
                    _ => {}
                }
            }
            EngineUpdate::ServerInfo(info) => {
                if human {
                    let name = info.get("name").and_then(Value::as_str).unwrap_or("?");
                    let version = info.get("version").and_then(Value::as_str).unwrap_or("?");
                    println!("server: {name} {version}");
                }
                report.server_info = Some(info);
            }
            EngineUpdate::Discovery { phase, outcome } => match outcome {
                Ok(result) => match phase {
                    Phase::Tools => report.tools = tools_from_result(&result),
                    Phase::Resources => report.resources = resources_from_result(&result),
                    Phase::Prompts => report.prompts = prompts_from_result(&result),
                },
                Err(e) => warn!(method = phase.method(), code = e.code, message = %e.message, "listing rejected"),
            },
        }
    }

    if human {
        print_surface(&report);
    }

    if args.probe {
        let (tester, mut findings_rx) =
            SecurityTester::new(engine.clone(), Arc::clone(&sessions), timeouts);
        let tools = report.tools.clone();
        let resources = report.resources.clone();
        Arc::new(tester).scan(tools, resources).await;
        while let Ok(finding) = findings_rx.try_recv() {
            report.findings.push(finding);
        }
        if human {
            print_findings(&report.findings);
        }
    }

    engine.cancel();

    if !human {
        println!("{}", serde_json::to_string_pretty(&render_json(&report))?);
    }
    Ok(())
}

fn print_surface(report: &ScanReport) {
    println!(
        "discovered {} tools, {} resources, {} prompts",
        report.tools.len(),
        report.resources.len(),
        report.prompts.len()
    );
    for tool in &report.tools {
        let desc = tool.description.as_deref().unwrap_or("");
        println!("  tool      {:<30} {desc}", tool.name);
    }
    for resource in &report.resources {
        let desc = resource.description.as_deref().unwrap_or("");
        println!("  resource  {:<30} {desc}", resource.uri);
    }
    for prompt in &report.prompts {
        let desc = prompt.description.as_deref().unwrap_or("");
        println!("  prompt    {:<30} {desc}", prompt.name);
    }
}

fn print_findings(findings: &[ProbeFinding]) {
    if findings.is_empty() {
        println!("no findings");
        return;
    }
    println!("{} finding(s):", findings.len());
    for finding in findings {
        println!(
            "  [{}] {} — {}",
            finding.kind.label(),
            finding.target,
            finding.evidence
        );
    }
}

fn render_json(report: &ScanReport) -> Value {
    json!({
        "serverInfo": report.server_info,
        "tools": report.tools,
        "resources": report.resources,
        "prompts": report.prompts,
        "findings": report
            .findings
            .iter()
            .map(|f| json!({
                "kind": f.kind.label(),
                "target": f.target,
                "evidence": f.evidence,
            }))
            .collect::<Vec<_>>(),
    })
}
