//! `watch` command: run the scheduler and print every update.
//!
//! While running, single-word commands are read from stdin:
//! `refresh`, `stop`, `start [secs]`, `login`, `done`, `status`, `quit`.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cli::OutputOptions;
use crate::cli::args::OutputFormat;
use crate::core::events::UsageEvent;
use crate::core::monitor::UsageMonitor;
use crate::error::{ExitCode, Result};
use crate::render::{self, human};
use crate::storage::cache::Staleness;
use crate::storage::config::ResolvedConfig;
use crate::storage::paths::AppPaths;

const HELP: &str = "commands: refresh | stop | start [secs] | login | done | status | quit";

/// A line typed while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    Refresh,
    Stop,
    Start(Option<u64>),
    Login,
    Done,
    Status,
    Quit,
    Help,
}

impl WatchCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    ///
    /// # Errors
    /// A message describing the unrecognised input.
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };
        let command = match word.to_lowercase().as_str() {
            "refresh" | "r" => Self::Refresh,
            "stop" => Self::Stop,
            "start" => match words.next() {
                None => Self::Start(None),
                Some(secs) => Self::Start(Some(
                    secs.parse()
                        .map_err(|_| format!("invalid interval '{secs}'"))?,
                )),
            },
            "login" => Self::Login,
            "done" => Self::Done,
            "status" | "s" => Self::Status,
            "quit" | "q" | "exit" => Self::Quit,
            "help" | "?" => Self::Help,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(Some(command))
    }
}

/// Counters across the watch session.
#[derive(Debug, Default)]
pub struct WatchState {
    pub updates: u64,
    pub errors: u64,
    pub interval_seconds: u64,
    login_done: Option<oneshot::Sender<()>>,
    login_task: Option<JoinHandle<Result<()>>>,
}

impl WatchState {
    #[must_use]
    pub fn new(interval_seconds: u64) -> Self {
        Self {
            interval_seconds,
            ..Self::default()
        }
    }

    pub fn record(&mut self, event: &UsageEvent) {
        match event {
            UsageEvent::Update(_) => self.updates += 1,
            UsageEvent::Error(_) => self.errors += 1,
        }
    }

    #[must_use]
    pub const fn login_in_progress(&self) -> bool {
        self.login_task.is_some()
    }
}

enum Step {
    Continue,
    Quit,
}

/// Run the scheduler until `quit` or Ctrl+C.
///
/// # Errors
/// Setup and rendering failures.
pub async fn run_watch(config: &ResolvedConfig, paths: &AppPaths, output: OutputOptions) -> Result<ExitCode> {
    let monitor = Arc::new(crate::cli::build_monitor(config, paths)?);
    let mut events = monitor.subscribe();
    let mut state = WatchState::new(config.poll_interval.as_secs());

    if let Some(payload) = monitor.last_payload().await {
        let staleness = Staleness::since(payload.scraped_at, Utc::now());
        println!(
            "{}",
            render::render_payload(
                "watch",
                &payload,
                Some(staleness),
                output.format,
                output.pretty,
                output.no_color
            )?
        );
    }
    if !monitor.check_session() {
        eprintln!("No usable session. Type `login`, sign in, then `done`.");
    }

    monitor.start_polling(state.interval_seconds).await?;
    eprintln!("Polling every {}s. {HELP}", state.interval_seconds);

    let mut lines = spawn_stdin_reader();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let step = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    state.record(&event);
                    print_event(&event, output)?;
                    Step::Continue
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Watch output fell behind; skipped events");
                    Step::Continue
                }
                Err(RecvError::Closed) => Step::Quit,
            },
            line = recv_line(&mut lines) => match line {
                Some(line) => handle_line(&line, &monitor, &mut state, output).await?,
                None => {
                    tracing::debug!("stdin closed; commands disabled");
                    lines = None;
                    Step::Continue
                }
            },
            joined = join_login(&mut state.login_task) => {
                state.login_task = None;
                state.login_done = None;
                match joined {
                    Ok(Ok(())) => eprintln!("Login saved."),
                    Ok(Err(e)) => eprintln!("{}", render::error::render_error(&e, output.format, output.no_color, output.pretty)),
                    Err(e) => tracing::error!(error = %e, "Login task failed"),
                }
                Step::Continue
            },
            _ = &mut ctrl_c => {
                eprintln!("Interrupted; shutting down.");
                Step::Quit
            }
        };
        if matches!(step, Step::Quit) {
            break;
        }
    }

    monitor.shutdown().await;
    if let Some(task) = state.login_task.take() {
        task.abort();
    }
    tracing::info!(updates = state.updates, errors = state.errors, "Watch finished");
    Ok(ExitCode::Success)
}

fn spawn_stdin_reader() -> Option<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    Some(rx)
}

async fn recv_line(lines: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match lines {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn join_login(
    task: &mut Option<JoinHandle<Result<()>>>,
) -> std::result::Result<Result<()>, tokio::task::JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn print_event(event: &UsageEvent, output: OutputOptions) -> Result<()> {
    match output.format {
        OutputFormat::Json => println!("{}", render::render_json(event, output.pretty)?),
        OutputFormat::Human => {
            let text = human::render_event(event, Utc::now(), output.no_color);
            match event {
                UsageEvent::Update(_) => println!("{text}\n"),
                UsageEvent::Error(_) => eprintln!("{text}\n"),
            }
        }
    }
    Ok(())
}

async fn handle_line(
    line: &str,
    monitor: &Arc<UsageMonitor>,
    state: &mut WatchState,
    output: OutputOptions,
) -> Result<Step> {
    let command = match WatchCommand::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(Step::Continue),
        Err(message) => {
            eprintln!("{message}. {HELP}");
            return Ok(Step::Continue);
        }
    };
    tracing::debug!(?command, "Watch command");

    match command {
        WatchCommand::Refresh => monitor.refresh().await?,
        WatchCommand::Stop => {
            monitor.stop_polling().await?;
            eprintln!("Polling stopped.");
        }
        WatchCommand::Start(secs) => {
            let secs = secs.unwrap_or(state.interval_seconds);
            match monitor.start_polling(secs).await {
                Ok(()) => {
                    state.interval_seconds = secs;
                    eprintln!("Polling every {secs}s.");
                }
                Err(e) => eprintln!("{e}"),
            }
        }
        WatchCommand::Login => {
            if state.login_in_progress() {
                eprintln!("Login already in progress; type `done` once signed in.");
            } else {
                let (tx, rx) = oneshot::channel();
                let monitor = Arc::clone(monitor);
                state.login_done = Some(tx);
                state.login_task = Some(tokio::spawn(async move { monitor.manual_login(rx).await }));
                eprintln!("Sign in in the browser window, then type `done`.");
            }
        }
        WatchCommand::Done => match state.login_done.take() {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => eprintln!("No login in progress."),
        },
        WatchCommand::Status => {
            let scheduler = monitor.state().await?;
            let now = Utc::now();
            let session = monitor.session_status();
            match output.format {
                OutputFormat::Json => {
                    let doc = serde_json::json!({ "scheduler": scheduler, "session": session });
                    println!("{}", render::render_json(&doc, output.pretty)?);
                }
                OutputFormat::Human => {
                    println!(
                        "{}\n{}",
                        human::render_scheduler_state(&scheduler, output.no_color),
                        human::render_session(&session, now, output.no_color)
                    );
                }
            }
        }
        WatchCommand::Quit => return Ok(Step::Quit),
        WatchCommand::Help => eprintln!("{HELP}"),
    }
    Ok(Step::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ScrapeAttemptError};
    use crate::test_utils::make_test_payload;

    #[test]
    fn parses_commands() {
        assert_eq!(WatchCommand::parse("refresh"), Ok(Some(WatchCommand::Refresh)));
        assert_eq!(WatchCommand::parse("  START 90 "), Ok(Some(WatchCommand::Start(Some(90)))));
        assert_eq!(WatchCommand::parse("start"), Ok(Some(WatchCommand::Start(None))));
        assert_eq!(WatchCommand::parse("q"), Ok(Some(WatchCommand::Quit)));
        assert_eq!(WatchCommand::parse(""), Ok(None));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(WatchCommand::parse("start soon").is_err());
        assert!(WatchCommand::parse("launch").unwrap_err().contains("launch"));
    }

    #[test]
    fn state_counts_events() {
        let mut state = WatchState::new(300);
        state.record(&UsageEvent::Update(make_test_payload()));
        state.record(&UsageEvent::Error(ScrapeAttemptError::new(
            ErrorKind::Timeout,
            "slow",
            3,
        )));
        state.record(&UsageEvent::Update(make_test_payload()));
        assert_eq!(state.updates, 2);
        assert_eq!(state.errors, 1);
        assert!(!state.login_in_progress());
    }
}
