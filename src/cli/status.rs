//! `status` command: last known good usage, read from the cache only.

use chrono::Utc;

use crate::cli::OutputOptions;
use crate::cli::args::OutputFormat;
use crate::error::{ExitCode, Result};
use crate::render::{self, RobotOutput};
use crate::storage::cache::LastGoodCache;
use crate::storage::paths::AppPaths;

/// Print the cached payload with its staleness. Never starts a browser.
///
/// # Errors
/// Rendering failures.
pub fn execute(paths: &AppPaths, output: OutputOptions) -> Result<ExitCode> {
    let cache = LastGoodCache::new(paths.last_good_file());
    let (payload, staleness) = cache.load_with_staleness(Utc::now());

    match payload {
        Some(payload) => {
            let rendered = render::render_payload(
                "status",
                &payload,
                Some(staleness),
                output.format,
                output.pretty,
                output.no_color,
            )?;
            println!("{rendered}");
        }
        None => {
            match output.format {
                OutputFormat::Json => {
                    let doc = RobotOutput::new("status", Option::<()>::None, Utc::now())
                        .with_errors(vec!["no usage recorded yet".to_string()]);
                    println!("{}", render::render_json(&doc, output.pretty)?);
                }
                OutputFormat::Human => {
                    println!("No usage recorded yet. Run `usagewatch poll` or `usagewatch watch`.");
                }
            }
        }
    }
    Ok(ExitCode::Success)
}
