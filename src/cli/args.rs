//! CLI argument definitions
//!
//! All Clap derive structs for `mcp-surface` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::TransportKind;

// ============================================================================
// Root CLI
// ============================================================================

/// MCP attack-surface discovery and probing tool.
#[derive(Parser, Debug)]
#[command(name = "mcp-surface", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "MCP_SURFACE_COLOR")]
    pub color: ColorChoice,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect, enumerate the attack surface, and optionally probe it.
    Scan(ScanArgs),

    /// Guess plausible MCP endpoints on a host without a full scan.
    Detect(DetectArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),
}

// ============================================================================
// Scan Command
// ============================================================================

/// Arguments for `scan`.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Target hostname or IP.
    pub host: String,

    /// Target port.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Connect with TLS (https/wss).
    #[arg(long)]
    pub tls: bool,

    /// Endpoint path.
    #[arg(long, default_value = "/mcp")]
    pub path: String,

    /// Transport to connect with.
    #[arg(short, long, default_value = "sse")]
    pub transport: TransportArg,

    /// Extra HTTP header, `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Raw JSON object merged into the initialize params.
    #[arg(long, env = "MCP_SURFACE_INIT_OPTIONS")]
    pub init_options: Option<String>,

    /// PKCS#12 client certificate for mutual TLS.
    #[arg(long, requires = "tls")]
    pub client_cert: Option<PathBuf>,

    /// Password for the client certificate bundle.
    #[arg(long, env = "MCP_SURFACE_CERT_PASSWORD", requires = "client_cert")]
    pub cert_password: Option<String>,

    /// Run the vulnerability probes after discovery.
    #[arg(long)]
    pub probe: bool,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Detect Command
// ============================================================================

/// Arguments for `detect`.
#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Target hostname or IP.
    pub host: String,

    /// Target port.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Probe with TLS (https).
    #[arg(long)]
    pub tls: bool,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Completions
// ============================================================================

/// Arguments for shell completion generation.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script.
    pub shell: Shell,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportArg {
    /// Persistent event stream with POSTed messages.
    #[default]
    Sse,
    /// Full-duplex WebSocket.
    Websocket,
    /// One HTTP exchange per message.
    Post,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Sse => Self::Sse,
            TransportArg::Websocket => Self::WebSocket,
            TransportArg::Post => Self::Post,
        }
    }
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Shell type for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell.
    Bash,
    /// Zsh shell.
    Zsh,
    /// Fish shell.
    Fish,
    /// `PowerShell`.
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell.
    Elvish,
}

// ============================================================================
// Tests
// ============================================================================
