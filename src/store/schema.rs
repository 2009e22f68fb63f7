use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

pub const EMBEDDINGS_TABLE: &str = "patient_embeddings";
pub const FEATURES_TABLE: &str = "patient_features";
pub const ALERTS_TABLE: &str = "icu_alerts";
pub const PREDICTIONS_TABLE: &str = "icu_predictions";
pub const EVALUATION_TABLE: &str = "icu_evaluation";

pub fn open_read_write(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database: {}", db_path.display()))?;

    configure_connection(&connection)?;
    ensure_output_schema(&connection)?;
    Ok(connection)
}

pub fn open_read_only(db_path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database read-only: {}", db_path.display()))
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

/// Creates the tables this tool owns. Input tables are produced upstream.
pub fn ensure_output_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS icu_alerts (
              run_id TEXT NOT NULL,
              patient_id TEXT NOT NULL,
              icu_flag INTEGER NOT NULL,
              icu_risk_score REAL NOT NULL,
              heuristic_risk_score REAL NOT NULL,
              summary TEXT NOT NULL,
              generated_at TEXT NOT NULL,
              PRIMARY KEY(run_id, patient_id)
            );

            CREATE INDEX IF NOT EXISTS idx_icu_alerts_score
              ON icu_alerts(icu_risk_score DESC);

            CREATE TABLE IF NOT EXISTS icu_predictions (
              run_id TEXT NOT NULL,
              patient_id TEXT NOT NULL,
              predicted_probability REAL NOT NULL,
              PRIMARY KEY(run_id, patient_id)
            );

            CREATE TABLE IF NOT EXISTS icu_evaluation (
              run_id TEXT PRIMARY KEY,
              total_eval INTEGER NOT NULL,
              true_positives INTEGER NOT NULL,
              false_negatives INTEGER NOT NULL,
              false_positives INTEGER NOT NULL,
              true_negatives INTEGER NOT NULL,
              threshold REAL NOT NULL,
              evaluated_at TEXT NOT NULL
            );
            ",
        )
        .context("failed to create output schema")
}

pub fn table_exists(connection: &Connection, table: &str) -> Result<bool> {
    let found = connection
        .query_row(
            "
            SELECT name
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
            LIMIT 1
            ",
            [table],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .is_some();
    Ok(found)
}

pub fn count_rows(connection: &Connection, table: &str) -> Result<Option<i64>> {
    if !table_exists(connection, table)? {
        return Ok(None);
    }

    let count = connection
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
            row.get(0)
        })
        .with_context(|| format!("failed to count rows in {table}"))?;
    Ok(Some(count))
}
