//! `history` command: recent cycles from the `SQLite` history.

use chrono::Utc;
use serde::Serialize;

use crate::cli::OutputOptions;
use crate::cli::args::HistoryArgs;
use crate::error::{ExitCode, Result};
use crate::render::{human, render_document};
use crate::storage::config::ResolvedConfig;
use crate::storage::history::{HistoryStore, StoredCycle};
use crate::storage::paths::AppPaths;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryView {
    total: usize,
    pruned: usize,
    cycles: Vec<StoredCycle>,
}

/// List recent cycles, optionally pruning first.
///
/// # Errors
/// Database or rendering failures.
pub fn execute(
    args: &HistoryArgs,
    config: &ResolvedConfig,
    paths: &AppPaths,
    output: OutputOptions,
) -> Result<ExitCode> {
    let db_path = paths.history_db_file();
    let now = Utc::now();
    let view = if db_path.exists() {
        let store = HistoryStore::open(&db_path)?;
        let pruned = if args.prune {
            let retention = &config.file.history;
            store.prune(retention.retention_days, retention.max_rows, now)?
        } else {
            0
        };
        HistoryView {
            total: store.count()?,
            pruned,
            cycles: store.recent(args.limit)?,
        }
    } else {
        HistoryView {
            total: 0,
            pruned: 0,
            cycles: Vec::new(),
        }
    };
    let pruned = view.pruned;
    tracing::debug!(total = view.total, pruned, shown = view.cycles.len(), "Loaded history");

    let rendered = render_document("history", &view, output.format, output.pretty, now, || {
        let mut text = human::render_history(&view.cycles, now, output.no_color);
        if args.prune {
            text.push_str(&format!("\nPruned {pruned} cycle(s); {} kept.", view.total));
        }
        text
    })?;
    println!("{rendered}");
    Ok(ExitCode::Success)
}
