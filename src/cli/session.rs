//! `login` and `check-session` commands.

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

use crate::cli::OutputOptions;
use crate::cli::args::LoginArgs;
use crate::core::session::{SessionController, SessionState};
use crate::error::{ExitCode, Result};
use crate::render::{human, render_document};
use crate::storage::config::ResolvedConfig;
use crate::storage::paths::AppPaths;
use crate::storage::session_store::SessionStore;

/// Open the login page and wait for Enter on stdin before saving the session.
///
/// # Errors
/// `LoginFailed`, `LoginTimeout`, or driver errors.
pub async fn execute_login(
    args: &LoginArgs,
    mut config: ResolvedConfig,
    paths: &AppPaths,
    output: OutputOptions,
) -> Result<ExitCode> {
    if let Some(seconds) = args.login_timeout {
        config.file.session.login_timeout_seconds = seconds;
    }
    let monitor = crate::cli::build_monitor(&config, paths)?;

    eprintln!(
        "Opening {} in the browser.\nSign in there, then press Enter here (within {}s).",
        config.file.session.login_url, config.file.session.login_timeout_seconds
    );
    let done = confirm_on_enter();
    let result = monitor.manual_login(done).await;
    monitor.shutdown().await;
    result?;

    let status = monitor.session_status();
    let now = Utc::now();
    let rendered = render_document("login", &status, output.format, output.pretty, now, || {
        format!(
            "Logged in.\n{}",
            human::render_session(&status, now, output.no_color)
        )
    })?;
    println!("{rendered}");
    Ok(ExitCode::Success)
}

/// Oneshot that fires when a line is read from stdin.
///
/// The sender is dropped on EOF or a read error, which fails the login.
fn confirm_on_enter() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(_)) => {
                let _ = tx.send(());
            }
            Ok(None) => tracing::debug!("stdin closed before login was confirmed"),
            Err(e) => tracing::warn!(error = %e, "Failed to read login confirmation"),
        }
    });
    rx
}

/// Report session validity from the stored credential only.
///
/// # Errors
/// Rendering failures. An unusable session is reported through the exit code.
pub fn execute_check(config: &ResolvedConfig, paths: &AppPaths, output: OutputOptions) -> Result<ExitCode> {
    let store = SessionStore::new(paths.session_file())
        .with_validity(chrono::Duration::days(config.file.session.validity_days));
    let now = Utc::now();
    let status = SessionController::status_from_store(&store, now);

    let rendered = render_document("check-session", &status, output.format, output.pretty, now, || {
        human::render_session(&status, now, output.no_color)
    })?;
    println!("{rendered}");

    Ok(if status.state == SessionState::Authenticated {
        ExitCode::Success
    } else {
        ExitCode::SessionRequired
    })
}

/// Delete the saved credential. The browser profile is left alone.
///
/// # Errors
/// File removal or rendering failures.
pub fn execute_logout(paths: &AppPaths, output: OutputOptions) -> Result<ExitCode> {
    let store = SessionStore::new(paths.session_file());
    let existed = store.path().exists();
    store.clear()?;
    tracing::info!(existed, "Saved session cleared");

    let now = Utc::now();
    let status = SessionController::status_from_store(&store, now);
    let rendered = render_document("logout", &status, output.format, output.pretty, now, || {
        if existed {
            "Saved session removed. Run `usagewatch login` to sign in again.".to_string()
        } else {
            "No saved session.".to_string()
        }
    })?;
    println!("{rendered}");
    Ok(ExitCode::Success)
}
