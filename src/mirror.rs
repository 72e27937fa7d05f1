//! Observer-side view of the conversion queue.
//!
//! A [`ClientMirror`] is bootstrapped from a [`QueueSnapshot`] and kept current
//! by applying broadcast [`EventEnvelope`]s. The expected sequence is:
//!
//! 1. subscribe to the event bus;
//! 2. take a snapshot;
//! 3. apply every received envelope.
//!
//! Envelopes already reflected in the snapshot (`seq <= snapshot.seq`) are
//! skipped. A gap in sequence numbers, or a lagged receiver, means events were
//! lost and the mirror asks for a fresh snapshot.

use mediashelf_db::models::{ConversionJob, ConversionStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;

use crate::conversion::QueueSnapshot;
use crate::events::{ConversionEvent, EventEnvelope, EVENT_SCHEMA_VERSION};

/// Result of feeding an envelope to a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorUpdate {
    /// The mirror changed (or confirmed) state.
    Applied,
    /// Already seen, or from an unknown schema version.
    Ignored,
    /// Events were missed; call [`ClientMirror::resync`] with a new snapshot.
    Resync,
}

/// Non-authoritative copy of the queue held by one observer.
#[derive(Debug, Clone, Default)]
pub struct ClientMirror {
    seq: u64,
    jobs: Vec<ConversionJob>,
    outcomes: HashMap<PathBuf, ConversionStatus>,
}

impl ClientMirror {
    pub fn from_snapshot(snapshot: QueueSnapshot) -> Self {
        Self {
            seq: snapshot.seq,
            jobs: snapshot.jobs,
            outcomes: HashMap::new(),
        }
    }

    /// Replace the working set with a fresh snapshot.
    ///
    /// Terminal outcomes already observed are kept.
    pub fn resync(&mut self, snapshot: QueueSnapshot) {
        self.seq = snapshot.seq;
        self.jobs = snapshot.jobs;
    }

    /// Sequence number of the last applied envelope.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Live jobs, in execution order.
    pub fn jobs(&self) -> &[ConversionJob] {
        &self.jobs
    }

    pub fn get(&self, source_path: impl AsRef<Path>) -> Option<&ConversionJob> {
        let source_path = source_path.as_ref();
        self.jobs.iter().find(|j| j.source_path == source_path)
    }

    /// Terminal status most recently observed for `source_path`.
    pub fn last_outcome(&self, source_path: impl AsRef<Path>) -> Option<ConversionStatus> {
        self.outcomes.get(source_path.as_ref()).copied()
    }

    /// Feed the result of a broadcast `recv()`.
    pub fn handle(&mut self, received: Result<EventEnvelope, RecvError>) -> MirrorUpdate {
        match received {
            Ok(envelope) => self.apply(&envelope),
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!("Mirror lagged by {} events", missed);
                MirrorUpdate::Resync
            }
            Err(RecvError::Closed) => MirrorUpdate::Ignored,
        }
    }

    pub fn apply(&mut self, envelope: &EventEnvelope) -> MirrorUpdate {
        if envelope.version != EVENT_SCHEMA_VERSION || envelope.seq <= self.seq {
            return MirrorUpdate::Ignored;
        }
        if envelope.seq != self.seq + 1 {
            return MirrorUpdate::Resync;
        }
        self.seq = envelope.seq;

        match &envelope.event {
            ConversionEvent::ConversionQueued { job } => {
                if self.get(&job.source_path).is_none() {
                    self.jobs.push(job.clone());
                }
            }
            ConversionEvent::ConversionStarted { job_id, .. } => {
                if let Some(job) = self.jobs.iter_mut().find(|j| j.id == *job_id) {
                    job.status = ConversionStatus::Running;
                    job.percent = 0.0;
                }
            }
            ConversionEvent::ProgressUpdate {
                job_id, percent, ..
            } => {
                if let Some(job) = self.jobs.iter_mut().find(|j| j.id == *job_id) {
                    if *percent > job.percent {
                        job.percent = *percent;
                    }
                }
            }
            ConversionEvent::ConversionCompleted {
                job_id,
                source_path,
                ..
            } => self.finish(*job_id, source_path, ConversionStatus::Completed),
            ConversionEvent::ConversionFailed {
                job_id,
                source_path,
                ..
            } => self.finish(*job_id, source_path, ConversionStatus::Failed),
            ConversionEvent::ConversionCancelled {
                job_id,
                source_path,
            } => self.finish(*job_id, source_path, ConversionStatus::Cancelled),
        }

        MirrorUpdate::Applied
    }

    fn finish(
        &mut self,
        job_id: mediashelf_common::ConversionJobId,
        source_path: &Path,
        status: ConversionStatus,
    ) {
        self.jobs.retain(|j| j.id != job_id);
        self.outcomes.insert(source_path.to_path_buf(), status);
    }
}
