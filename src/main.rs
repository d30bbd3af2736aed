//! usagewatch - usage-quota page watcher.
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::process::ExitCode;

use clap::Parser;

use usagewatch::cli::{self, Cli, OutputOptions};
use usagewatch::core::logging::LogSettings;
use usagewatch::render::error::render_error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    LogSettings::resolve(cli.log_level.as_deref(), cli.json_output, cli.verbose).init();

    match cli::execute(&cli).await {
        Ok(code) => code.into(),
        Err(e) => {
            tracing::error!(code = e.error_code(), "{e}");
            let output = OutputOptions::from_cli(&cli);
            eprintln!("{}", render_error(&e, output.format, output.no_color, output.pretty));
            e.exit_code().into()
        }
    }
}
