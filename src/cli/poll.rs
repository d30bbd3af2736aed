//! `poll` command: one scrape cycle.

use crate::cli::OutputOptions;
use crate::error::{ExitCode, Result};
use crate::render;
use crate::storage::config::ResolvedConfig;
use crate::storage::paths::AppPaths;

/// Run one cycle and print the payload, or the surfaced error on stderr.
///
/// # Errors
/// Setup and rendering failures. Scrape failures map to an exit code.
pub async fn execute(config: &ResolvedConfig, paths: &AppPaths, output: OutputOptions) -> Result<ExitCode> {
    let monitor = crate::cli::build_monitor(config, paths)?;
    let outcome = monitor.poll_usage().await;
    monitor.shutdown().await;

    match outcome {
        Ok(payload) => {
            let rendered = render::render_payload(
                "poll",
                &payload,
                None,
                output.format,
                output.pretty,
                output.no_color,
            )?;
            println!("{rendered}");
            Ok(if payload.is_error() {
                ExitCode::ParseError
            } else {
                ExitCode::Success
            })
        }
        Err(error) => {
            tracing::debug!(kind = %error.kind, attempts = error.attempt, "Poll failed");
            let rendered = render::render_attempt_error(
                "poll",
                &error,
                output.format,
                output.pretty,
                output.no_color,
            )?;
            eprintln!("{rendered}");
            Ok(ExitCode::for_kind(error.kind))
        }
    }
}
