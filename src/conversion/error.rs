//! Conversion subsystem errors.

use mediashelf_common::ConversionJobId;
use std::path::PathBuf;

/// Errors produced by the conversion queue and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// An empty path was passed to `enqueue`, `cancel` or a delete.
    #[error("a source path is required")]
    PathRequired,

    /// The path is not valid UTF-8 and cannot be stored as a job key.
    #[error("path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),

    /// The source file was missing when its job came up for dispatch, or a
    /// file to delete does not exist.
    #[error("path does not exist: {}", .0.display())]
    PathDoesNotExist(PathBuf),

    /// The source already has the converted extension, so the derived
    /// destination would overwrite it.
    #[error("{} is already an mp4 file", .0.display())]
    DestinationIsSource(PathBuf),

    /// The external transcode reported failure.
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// A worker callback for a job the queue no longer tracks.
    #[error("stale event for conversion job {0}")]
    StaleJobEvent(ConversionJobId),

    /// Persisting queue state failed.
    #[error(transparent)]
    Store(#[from] mediashelf_common::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConversionError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathRequired => "path_required",
            Self::InvalidPath(_) => "invalid_path",
            Self::PathDoesNotExist(_) => "path_does_not_exist",
            Self::DestinationIsSource(_) => "destination_is_source",
            Self::ConversionFailed(_) => "conversion_failed",
            Self::StaleJobEvent(_) => "stale_job_event",
            Self::Store(_) => "store_error",
            Self::Io { .. } => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
