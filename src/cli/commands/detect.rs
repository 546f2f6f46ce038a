//! `detect` command: probe a host for likely MCP endpoints.

use crate::cli::args::{DetectArgs, OutputFormat};
use crate::detect::{DetectTarget, detect};
use crate::error::McpSurfaceError;

/// Runs endpoint detection and prints the guesses.
pub async fn run(args: &DetectArgs) -> Result<(), McpSurfaceError> {
    let target = DetectTarget {
        host: args.host.clone(),
        port: args.port,
        tls: args.tls,
    };
    let guesses = detect(&target).await?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&guesses)?);
        }
        OutputFormat::Human => {
            if guesses.is_empty() {
                println!("no MCP-looking endpoints on {}:{}", args.host, args.port);
                return Ok(());
            }
            println!("{} guess(es) on {}:{}", guesses.len(), args.host, args.port);
            for guess in &guesses {
                let auth = if guess.auth_required { " (auth)" } else { "" };
                println!(
                    "  {:<10} {:<10} {}{auth}",
                    guess.path, guess.transport, guess.reason
                );
            }
        }
    }
    Ok(())
}
