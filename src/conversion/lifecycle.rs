//! Keeps the queue consistent with files deleted out from under it.
//!
//! Every deletion of library media goes through [`FileLifecycleCoordinator`]:
//! once the file (or directory) is gone, the jobs for it are cancelled before
//! the caller hears that the delete succeeded. A job for a deleted file can
//! therefore never report progress to anyone who has been told it is gone.

use std::path::Path;
use tracing::info;

use super::error::{ConversionError, Result};
use super::queue::{require_path, ConversionQueue};

#[derive(Clone)]
pub struct FileLifecycleCoordinator {
    queue: ConversionQueue,
}

impl FileLifecycleCoordinator {
    pub fn new(queue: ConversionQueue) -> Self {
        Self { queue }
    }

    /// Delete `path` from disk, then cancel every job it covered.
    ///
    /// A directory is removed recursively and cancels all jobs beneath it.
    /// Returns the number of jobs cancelled.
    pub async fn delete_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        require_path(path)?;

        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::PathDoesNotExist(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConversionError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        removed.map_err(|source| ConversionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Deleted {}", path.display());
        self.file_removed(path)
    }

    /// Record that `path` was deleted by someone else.
    ///
    /// Cancels the job for `path` itself and any job beneath it.
    pub fn file_removed(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let cancelled = self.queue.cancel_under(path)?;
        if cancelled > 0 {
            info!(
                "Cancelled {} conversion(s) for deleted {}",
                cancelled,
                path.display()
            );
        }
        Ok(cancelled)
    }
}
