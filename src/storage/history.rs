//! Cycle history storage.
//!
//! Every completed cycle (success or classified error) is appended to a small
//! `SQLite` database so trends can be inspected later. Recording is
//! best-effort: callers log failures and carry on.
//!
//! ## Retention
//!
//! `prune` removes cycles older than a retention window and then trims the
//! table to a maximum row count, oldest first.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::core::models::{CapId, CyclePayload};
use crate::error::{Result, ScrapeAttemptError, WatchError};

const HISTORY_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("../../migrations/001_cycle_history.sql"),
}];

/// Default retention window for cycle history.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Default row cap (one week of 5-minute cycles, twice over).
pub const DEFAULT_MAX_ROWS: usize = 4032;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: i32,
    sql: &'static str,
}

/// A cycle as stored in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCycle {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub status: String,
    pub found_count: usize,
    pub attempts: u32,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub payload: Option<CyclePayload>,
}

/// One point of a per-cap usage series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapPoint {
    pub recorded_at: DateTime<Utc>,
    pub usage_percent: f64,
}

/// History database access layer.
#[derive(Debug)]
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Create or open a history database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| WatchError::Other(anyhow::anyhow!("open history db: {e}")))?;
        Self::with_connection(conn)
    }

    /// Open an in-memory history database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WatchError::Other(anyhow::anyhow!("open in-memory db: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    /// Record a successful (ok or partial) cycle.
    pub fn record_payload(&self, payload: &CyclePayload, attempts: u32) -> Result<i64> {
        let json = serde_json::to_string(payload)?;
        self.conn.execute(
            "INSERT INTO cycles (recorded_at, status, found_count, attempts, payload_json) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                payload.scraped_at.to_rfc3339(),
                payload.status.as_str(),
                to_i64(payload.found_count),
                attempts,
                json,
            ],
        )?;
        let cycle_id = self.conn.last_insert_rowid();

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO cycle_readings \
             (cycle_id, cap, usage_percent, confidence, tokens_used, tokens_limit, reset_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for reading in &payload.readings {
            stmt.execute(params![
                cycle_id,
                reading.id.as_str(),
                reading.usage_percent,
                reading.confidence.as_str(),
                reading.tokens_used.and_then(|v| i64::try_from(v).ok()),
                reading.tokens_limit.and_then(|v| i64::try_from(v).ok()),
                reading.reset_at.map(|t| t.to_rfc3339()),
            ])?;
        }
        Ok(cycle_id)
    }

    /// Record a cycle that ended in a classified error.
    pub fn record_error(&self, error: &ScrapeAttemptError, at: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO cycles (recorded_at, status, found_count, attempts, error_kind, error_message) \
             VALUES (?1, 'error', 0, ?2, ?3, ?4)",
            params![
                at.to_rfc3339(),
                error.attempt,
                error.kind.as_str(),
                error.message,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent cycles, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredCycle>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, recorded_at, status, found_count, attempts, error_kind, error_message, payload_json \
             FROM cycles ORDER BY recorded_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([to_i64(limit)], row_to_cycle)?;
        let mut cycles = Vec::new();
        for row in rows {
            cycles.push(row?);
        }
        Ok(cycles)
    }

    /// Usage series for one cap since `since`, oldest first.
    pub fn cap_series(&self, cap: CapId, since: DateTime<Utc>) -> Result<Vec<CapPoint>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT c.recorded_at, r.usage_percent FROM cycle_readings r \
             JOIN cycles c ON c.id = r.cycle_id \
             WHERE r.cap = ?1 AND c.recorded_at >= ?2 ORDER BY c.recorded_at ASC",
        )?;
        let rows = stmt.query_map(params![cap.as_str(), since.to_rfc3339()], |row| {
            let recorded_at: String = row.get(0)?;
            Ok(CapPoint {
                recorded_at: parse_timestamp(&recorded_at),
                usage_percent: row.get(1)?,
            })
        })?;
        let mut points = Vec::new();
        for row in rows {
            points.push(row?);
        }
        Ok(points)
    }

    /// Timestamp of the latest cycle, if any.
    pub fn last_recorded_at(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .query_row("SELECT MAX(recorded_at) FROM cycles", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(value.map(|v| parse_timestamp(&v)))
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cycles", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Delete cycles older than `retention_days`, then trim to `max_rows`.
    ///
    /// Returns the number of cycles deleted.
    pub fn prune(&self, retention_days: i64, max_rows: usize, now: DateTime<Utc>) -> Result<usize> {
        if retention_days <= 0 {
            return Err(WatchError::ConfigInvalid {
                key: "history.retention_days".to_string(),
                value: retention_days.to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        let cutoff = (now - Duration::days(retention_days)).to_rfc3339();
        let mut deleted = self
            .conn
            .execute("DELETE FROM cycles WHERE recorded_at < ?1", [cutoff])?;

        deleted += self.conn.execute(
            "DELETE FROM cycles WHERE id NOT IN \
             (SELECT id FROM cycles ORDER BY recorded_at DESC, id DESC LIMIT ?1)",
            [to_i64(max_rows)],
        )?;

        if deleted > 0 {
            tracing::debug!(deleted, "Pruned cycle history");
        }
        Ok(deleted)
    }
}

fn row_to_cycle(row: &Row<'_>) -> rusqlite::Result<StoredCycle> {
    let recorded_at: String = row.get(1)?;
    let found_count: i64 = row.get(3)?;
    let payload_json: Option<String> = row.get(7)?;
    Ok(StoredCycle {
        id: row.get(0)?,
        recorded_at: parse_timestamp(&recorded_at),
        status: row.get(2)?,
        found_count: usize::try_from(found_count).unwrap_or(0),
        attempts: row.get(4)?,
        error_kind: row.get(5)?,
        error_message: row.get(6)?,
        payload: payload_json.and_then(|json| serde_json::from_str(&json).ok()),
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or(DateTime::<Utc>::UNIX_EPOCH, |t| {
        t.with_timezone(&Utc)
    })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Run schema migrations. Returns the latest schema version applied.
pub fn run_migrations(conn: &mut Connection) -> Result<i32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY,\
            applied_at TEXT DEFAULT (datetime('now'))\
        );",
    )?;

    let mut current_version: i32 = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i32>>(0)
        })?
        .unwrap_or(0);

    for migration in HISTORY_MIGRATIONS {
        if migration.version > current_version {
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql).map_err(|e| {
                WatchError::Other(anyhow::anyhow!(
                    "apply migration {}: {e}",
                    migration.version
                ))
            })?;
            tx.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1)",
                [migration.version],
            )?;
            tx.commit()?;
            current_version = migration.version;
        }
    }

    Ok(current_version)
}
