//! Durable record of queued and running conversion jobs.

use mediashelf_common::Result;
use mediashelf_db::models::ConversionJob;
use mediashelf_db::pool::{get_conn, DbPool};
use mediashelf_db::queries::conversion_jobs;
use std::path::{Path, PathBuf};

/// Keyed by source path; holds non-terminal jobs only.
///
/// Every operation runs on a single pooled connection in one statement (or one
/// transaction for [`load`](Self::load) and [`remove_all`](Self::remove_all)),
/// so no caller ever sees a partial write.
#[derive(Clone)]
pub struct ConversionJobStore {
    pool: DbPool,
}

impl ConversionJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or update a job.
    pub fn put(&self, job: &ConversionJob) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::upsert_job(&conn, job)
    }

    /// Forget the job for `source_path`. Returns whether one was stored.
    pub fn remove(&self, source_path: &Path) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::delete_job(&conn, source_path)
    }

    /// Forget every job in `source_paths` in one transaction. On error no
    /// row has been removed.
    pub fn remove_all(&self, source_paths: &[PathBuf]) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::delete_jobs(&conn, source_paths)
    }

    /// All stored jobs, in enqueue order.
    pub fn get_all(&self) -> Result<Vec<ConversionJob>> {
        let conn = get_conn(&self.pool)?;
        conversion_jobs::list_jobs(&conn)
    }

    /// Startup load.
    ///
    /// Jobs persisted as running are demoted to queued, since nothing is
    /// executing them any more. Returns the jobs in enqueue order.
    pub fn load(&self) -> Result<Vec<ConversionJob>> {
        let conn = get_conn(&self.pool)?;
        let (demoted, jobs) = conversion_jobs::load_pending_jobs(&conn)?;

        if demoted > 0 {
            tracing::info!("Demoted {} interrupted conversion(s) to queued", demoted);
        }
        tracing::debug!("Loaded {} persisted conversion job(s)", jobs.len());

        Ok(jobs)
    }
}
