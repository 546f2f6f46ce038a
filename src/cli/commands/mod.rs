//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod completions;
pub mod detect;
pub mod scan;

use crate::cli::args::{Cli, Commands};
use crate::error::McpSurfaceError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli) -> Result<(), McpSurfaceError> {
    match cli.command {
        Commands::Scan(args) => scan::run(&args).await,
        Commands::Detect(args) => detect::run(&args).await,
        Commands::Completions(args) => {
            completions::run(&args);
            Ok(())
        }
    }
}
