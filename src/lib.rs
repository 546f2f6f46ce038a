//! `mcp-surface` — MCP attack-surface discovery and probing.
//!
//! Connects to a remote Model Context Protocol server over SSE, WebSocket,
//! or plain HTTP POST, performs the `initialize` handshake, enumerates the
//! advertised tools, resources, and prompts in parallel, and optionally
//! runs a small set of targeted vulnerability probes against what it found.
//! A stateless detector guesses plausible endpoints on unknown hosts.

pub mod cli;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod observability;
pub mod scanner;
pub mod session;
pub mod surface;
pub mod transport;

pub use error::{McpSurfaceError, Result};
