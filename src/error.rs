//! Error types for `mcp-surface`.
//!
//! A small hierarchy of domain errors aggregated under [`McpSurfaceError`],
//! with Unix-convention exit codes for the CLI.

use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `mcp-surface` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid headers, bad option JSON)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (connection failed, protocol error)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Engine error (handshake failure, enumeration timeout)
    pub const ENGINE_ERROR: i32 = 5;

    /// Usage error (invalid arguments)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `mcp-surface` operations.
#[derive(Debug, Error)]
pub enum McpSurfaceError {
    /// Connection configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport layer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Enumeration engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpSurfaceError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) => ExitCode::CONFIG_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Engine(_) => ExitCode::ENGINE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Connection configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A `--header` argument was not `name: value`.
    #[error("invalid header '{0}': expected 'Name: value'")]
    InvalidHeader(String),

    /// The target host is empty or unparsable.
    #[error("invalid target host: {0}")]
    InvalidHost(String),

    /// Client certificate could not be loaded.
    #[error("client certificate error for {path}: {message}")]
    ClientCert {
        /// Path to the PKCS#12 bundle.
        path: String,
        /// Underlying failure description.
        message: String,
    },
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Transport layer errors shared by the SSE, WebSocket, and POST transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during transport operations
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to establish connection (DNS, refused, TLS handshake)
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-success HTTP status on a request
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Protocol-level error (malformed frame, unexpected content type)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection was closed unexpectedly
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Read or write timeout
    #[error("timeout: {0}")]
    Timeout(String),
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Enumeration engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The server answered `initialize` with an error payload.
    #[error("handshake rejected: {0}")]
    HandshakeFailed(String),

    /// No handshake response arrived within the ceiling.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// The attempt (and its single retry, when applicable) failed.
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// The attempt was cancelled by the caller.
    #[error("attempt cancelled")]
    Cancelled,

    /// `send_request` was called with no live transport.
    #[error("not connected")]
    NotConnected,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `mcp-surface` operations.
pub type Result<T> = std::result::Result<T, McpSurfaceError>;
