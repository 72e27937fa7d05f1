//! Conversion job query operations.
//!
//! Only non-terminal jobs live in this table. Rows are keyed by source path
//! and returned in insertion order (SQLite `rowid`), which is enqueue order:
//! an upsert of an existing key updates the row in place and keeps its
//! position.

use chrono::{DateTime, Utc};
use mediashelf_common::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use crate::models::{ConversionJob, ConversionStatus};

const JOB_COLUMNS: &str = "id, source_path, destination_path, status, percent, error_message, \
                           created_at, started_at";

fn conversion_err(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ConversionJob> {
    let id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let started_at: Option<String> = row.get(7)?;

    Ok(ConversionJob {
        id: id.parse().map_err(|e| conversion_err(0, e))?,
        source_path: PathBuf::from(row.get::<_, String>(1)?),
        destination_path: PathBuf::from(row.get::<_, String>(2)?),
        status: status.parse::<ConversionStatus>().map_err(|e| conversion_err(3, e))?,
        percent: row.get(4)?,
        error_message: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
        started_at: started_at
            .as_deref()
            .map(|s| parse_timestamp(7, s))
            .transpose()?,
        completed_at: None,
    })
}

/// Paths are stored as text. A lossy conversion could map two different
/// paths onto one key, so non-UTF-8 paths are refused.
fn path_text(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::invalid_input(format!("path is not valid UTF-8: {}", path.display()))
    })
}

/// Insert or update the row for `job.source_path`.
pub fn upsert_job(conn: &Connection, job: &ConversionJob) -> Result<()> {
    if job.is_terminal() {
        return Err(Error::invalid_input(format!(
            "terminal job {} cannot be persisted",
            job.id
        )));
    }

    conn.execute(
        "INSERT INTO conversion_jobs
             (id, source_path, destination_path, status, percent, error_message, created_at, started_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(source_path) DO UPDATE SET
             id = excluded.id,
             destination_path = excluded.destination_path,
             status = excluded.status,
             percent = excluded.percent,
             error_message = excluded.error_message,
             started_at = excluded.started_at",
        params![
            job.id.to_string(),
            path_text(&job.source_path)?,
            path_text(&job.destination_path)?,
            job.status.to_string(),
            job.percent,
            job.error_message,
            job.created_at.to_rfc3339(),
            job.started_at.map(|t| t.to_rfc3339()),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Delete the row for `source_path`. Returns whether a row existed.
pub fn delete_job(conn: &Connection, source_path: &Path) -> Result<bool> {
    let affected = conn
        .execute(
            "DELETE FROM conversion_jobs WHERE source_path = ?",
            [path_text(source_path)?],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// Delete the rows for every path in `source_paths` in one transaction.
///
/// Either all rows are deleted or none are. Returns the number deleted.
pub fn delete_jobs(conn: &Connection, source_paths: &[PathBuf]) -> Result<usize> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut deleted = 0;
    for path in source_paths {
        if delete_job(&tx, path)? {
            deleted += 1;
        }
    }

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(deleted)
}

/// Get the job for a source path, if one is stored.
pub fn get_job(conn: &Connection, source_path: &Path) -> Result<Option<ConversionJob>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM conversion_jobs WHERE source_path = ?"),
        [path_text(source_path)?],
        job_from_row,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// List all stored jobs in enqueue order.
pub fn list_jobs(conn: &Connection) -> Result<Vec<ConversionJob>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM conversion_jobs ORDER BY rowid ASC"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let jobs = stmt
        .query_map([], job_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(jobs)
}

/// Demote every `running` row to `queued` with its progress cleared.
///
/// Returns the number of rows reset.
pub fn reset_orphaned_jobs(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE conversion_jobs SET status = 'queued', percent = 0, started_at = NULL
         WHERE status = 'running'",
        [],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Startup load: reset orphaned rows and read the queue back in one
/// transaction.
pub fn load_pending_jobs(conn: &Connection) -> Result<(usize, Vec<ConversionJob>)> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let reset = reset_orphaned_jobs(&tx)?;
    let jobs = list_jobs(&tx)?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok((reset, jobs))
}
