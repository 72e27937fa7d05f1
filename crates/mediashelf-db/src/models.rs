//! Database models.
//!
//! [`ConversionJob`] is both the persisted row and the in-memory record the
//! queue owns. Its transition methods enforce the job state machine:
//!
//! ```text
//! Queued -> Running -> Completed | Failed | Cancelled
//! Queued -> Cancelled
//! ```
//!
//! Nothing leaves a terminal state.

use chrono::{DateTime, Utc};
use mediashelf_common::paths::destination_path_for;
use mediashelf_common::ConversionJobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Conversion job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ConversionStatus {
    /// Whether the job has finished and can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ConversionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid conversion status: {}", s)),
        }
    }
}

/// A request to transcode one source file to an MP4 destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionJob {
    pub id: ConversionJobId,
    /// Unique key: at most one non-terminal job per source path.
    pub source_path: PathBuf,
    /// Fixed at creation, derived from `source_path`.
    pub destination_path: PathBuf,
    pub status: ConversionStatus,
    /// 0.0..=100.0, never decreases while running.
    pub percent: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when `status` is `Failed`.
    pub error_message: Option<String>,
}

impl ConversionJob {
    /// Create a queued job for `source_path`.
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let destination_path = destination_path_for(&source_path);

        Self {
            id: ConversionJobId::new(),
            source_path,
            destination_path,
            status: ConversionStatus::Queued,
            percent: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Queued -> Running`. Returns false if the job was not queued.
    pub fn start(&mut self) -> bool {
        if self.status != ConversionStatus::Queued {
            return false;
        }
        self.status = ConversionStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Record a progress sample.
    ///
    /// Only applies while running, and only if it moves the job forward;
    /// returns whether `percent` changed.
    pub fn record_progress(&mut self, percent: f64) -> bool {
        if self.status != ConversionStatus::Running || !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent <= self.percent {
            return false;
        }
        self.percent = percent;
        true
    }

    /// `Running -> Completed`.
    pub fn complete(&mut self) -> bool {
        if self.status != ConversionStatus::Running {
            return false;
        }
        self.status = ConversionStatus::Completed;
        self.percent = 100.0;
        self.completed_at = Some(Utc::now());
        true
    }

    /// `Running -> Failed` (also valid from `Queued`, for jobs whose source
    /// vanished before they could start).
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = ConversionStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
        true
    }

    /// `Queued | Running -> Cancelled`.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = ConversionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Put a job found `Running` at startup back in the queue.
    ///
    /// No worker survives a restart, so the run starts over from zero.
    pub fn demote_to_queued(&mut self) -> bool {
        if self.status != ConversionStatus::Running {
            return false;
        }
        self.status = ConversionStatus::Queued;
        self.percent = 0.0;
        self.started_at = None;
        true
    }
}
