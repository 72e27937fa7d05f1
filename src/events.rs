//! Conversion event channel.
//!
//! Every state change the queue makes is published as an [`EventEnvelope`]
//! on an [`EventBus`]: a bounded `tokio::sync::broadcast` channel plus a
//! ring buffer of recent envelopes for late joiners. Envelopes carry a schema
//! version and a per-bus sequence number; observers use the sequence number to
//! line events up against a queue snapshot.

use chrono::{DateTime, Utc};
use mediashelf_common::ConversionJobId;
use mediashelf_db::models::ConversionJob;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Version of the [`ConversionEvent`] wire format.
pub const EVENT_SCHEMA_VERSION: u16 = 1;

/// Maximum number of envelopes retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// What happened to a conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionEvent {
    ConversionQueued {
        job: ConversionJob,
    },
    ConversionStarted {
        job_id: ConversionJobId,
        source_path: PathBuf,
        destination_path: PathBuf,
    },
    ProgressUpdate {
        job_id: ConversionJobId,
        source_path: PathBuf,
        destination_path: PathBuf,
        percent: f64,
    },
    ConversionCompleted {
        job_id: ConversionJobId,
        source_path: PathBuf,
        destination_path: PathBuf,
        percent: f64,
    },
    ConversionFailed {
        job_id: ConversionJobId,
        source_path: PathBuf,
        destination_path: PathBuf,
        error: String,
    },
    ConversionCancelled {
        job_id: ConversionJobId,
        source_path: PathBuf,
    },
}

impl ConversionEvent {
    pub fn job_id(&self) -> ConversionJobId {
        match self {
            Self::ConversionQueued { job } => job.id,
            Self::ConversionStarted { job_id, .. }
            | Self::ProgressUpdate { job_id, .. }
            | Self::ConversionCompleted { job_id, .. }
            | Self::ConversionFailed { job_id, .. }
            | Self::ConversionCancelled { job_id, .. } => *job_id,
        }
    }

    pub fn source_path(&self) -> &Path {
        match self {
            Self::ConversionQueued { job } => &job.source_path,
            Self::ConversionStarted { source_path, .. }
            | Self::ProgressUpdate { source_path, .. }
            | Self::ConversionCompleted { source_path, .. }
            | Self::ConversionFailed { source_path, .. }
            | Self::ConversionCancelled { source_path, .. } => source_path,
        }
    }

    /// Whether this is the last event a job will ever produce.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConversionCompleted { .. }
                | Self::ConversionFailed { .. }
                | Self::ConversionCancelled { .. }
        )
    }

    pub(crate) fn started(job: &ConversionJob) -> Self {
        Self::ConversionStarted {
            job_id: job.id,
            source_path: job.source_path.clone(),
            destination_path: job.destination_path.clone(),
        }
    }

    pub(crate) fn progress(job: &ConversionJob, percent: f64) -> Self {
        Self::ProgressUpdate {
            job_id: job.id,
            source_path: job.source_path.clone(),
            destination_path: job.destination_path.clone(),
            percent,
        }
    }

    pub(crate) fn completed(job: &ConversionJob) -> Self {
        Self::ConversionCompleted {
            job_id: job.id,
            source_path: job.source_path.clone(),
            destination_path: job.destination_path.clone(),
            percent: 100.0,
        }
    }

    pub(crate) fn failed(job: &ConversionJob, error: impl Into<String>) -> Self {
        Self::ConversionFailed {
            job_id: job.id,
            source_path: job.source_path.clone(),
            destination_path: job.destination_path.clone(),
            error: error.into(),
        }
    }

    pub(crate) fn cancelled(job: &ConversionJob) -> Self {
        Self::ConversionCancelled {
            job_id: job.id,
            source_path: job.source_path.clone(),
        }
    }
}

/// A sequenced, versioned event ready for broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub version: u16,
    /// Strictly increasing per bus, starting at 1.
    pub seq: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: ConversionEvent,
}

struct BusInner {
    seq: u64,
    recent: VecDeque<EventEnvelope>,
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` bounds the broadcast channel; a subscriber that falls more
    /// than `capacity` envelopes behind observes `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            inner: Mutex::new(BusInner {
                seq: 0,
                recent: VecDeque::with_capacity(MAX_RECENT_EVENTS),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Sequence number of the last published envelope (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().seq
    }

    /// Stamp `event` with the next sequence number and broadcast it.
    pub fn publish(&self, event: ConversionEvent) -> EventEnvelope {
        let mut inner = self.inner.lock();
        inner.seq += 1;

        let envelope = EventEnvelope {
            version: EVENT_SCHEMA_VERSION,
            seq: inner.seq,
            emitted_at: Utc::now(),
            event,
        };

        if inner.recent.len() >= MAX_RECENT_EVENTS {
            inner.recent.pop_back();
        }
        inner.recent.push_front(envelope.clone());

        // Sent under the lock so receivers see seq order.
        if self.tx.send(envelope.clone()).is_err() {
            tracing::trace!("No subscribers for conversion event");
        }

        envelope
    }

    /// Return the `n` most recent envelopes (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<EventEnvelope> {
        self.inner.lock().recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
