//! Conversion queue.
//!
//! The queue owns every live [`ConversionJob`]: a FIFO of pending jobs and a
//! single active slot. All state changes happen under one lock, and each
//! change is published on the [`EventBus`] before the lock is released, so
//! the event sequence matches the order in which the queue actually changed.
//!
//! Worker callbacks identify jobs by id. A callback for a job that is no
//! longer active (cancelled, or the queue was shut down) is a stale event and
//! is dropped.

use mediashelf_common::paths::{is_within, CONVERTED_EXTENSION};
use mediashelf_common::ConversionJobId;
use mediashelf_db::models::ConversionJob;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{ConversionError, Result};
use super::store::ConversionJobStore;
use super::throttle::{Admission, ProgressSample, ProgressThrottle, DEFAULT_WINDOW};
use super::worker::ConversionWorker;
use crate::events::{ConversionEvent, EventBus, EventEnvelope};

/// Recently finished jobs kept for observers by default.
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// How long [`ConversionQueue::shutdown`] waits for the active transcode.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Minimum spacing between delivered progress updates for a job.
    pub throttle_window: Duration,
    /// Number of finished jobs retained for [`ConversionQueue::recent_history`].
    pub history_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            throttle_window: DEFAULT_WINDOW,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

/// Point-in-time view of the queue, in execution order.
///
/// `seq` is the sequence number of the last event published before the
/// snapshot was taken; any envelope with a higher `seq` happened after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub seq: u64,
    pub jobs: Vec<ConversionJob>,
}

struct ActiveJob {
    job: ConversionJob,
    cancel: CancellationToken,
    throttle: ProgressThrottle,
    timer: Option<AbortHandle>,
    task: Option<JoinHandle<()>>,
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct QueueState {
    pending: VecDeque<ConversionJob>,
    active: Option<ActiveJob>,
    /// Finished jobs, newest first.
    history: VecDeque<ConversionJob>,
    shutting_down: bool,
}

impl QueueState {
    fn jobs(&self) -> impl Iterator<Item = &ConversionJob> {
        self.active
            .as_ref()
            .map(|a| &a.job)
            .into_iter()
            .chain(self.pending.iter())
    }

    fn take_active(&mut self, job_id: ConversionJobId) -> Result<ActiveJob> {
        match self.active.take() {
            Some(active) if active.job.id == job_id => Ok(active),
            other => {
                self.active = other;
                Err(ConversionError::StaleJobEvent(job_id))
            }
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,
    store: ConversionJobStore,
    events: Arc<EventBus>,
    worker: ConversionWorker,
    settings: QueueSettings,
}

/// Serialized FIFO of conversion jobs with a single active slot.
///
/// Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct ConversionQueue {
    shared: Arc<Shared>,
}

impl ConversionQueue {
    /// Restore persisted jobs and start dispatching.
    ///
    /// Jobs left running by a previous process come back as queued, in their
    /// original position.
    pub fn start(
        store: ConversionJobStore,
        worker: ConversionWorker,
        events: Arc<EventBus>,
        settings: QueueSettings,
    ) -> Result<Self> {
        let pending: VecDeque<ConversionJob> = store.load()?.into();
        if !pending.is_empty() {
            info!("Restored {} conversion job(s) from the store", pending.len());
        }

        let queue = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending,
                    active: None,
                    history: VecDeque::with_capacity(settings.history_size),
                    shutting_down: false,
                }),
                store,
                events,
                worker,
                settings,
            }),
        };

        {
            let mut state = queue.shared.state.lock();
            queue.dispatch(&mut state);
        }

        Ok(queue)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EventEnvelope> {
        self.shared.events.subscribe()
    }

    /// Queue `source` for conversion.
    ///
    /// Returns the existing job unchanged if `source` already has a live one.
    pub fn enqueue(&self, source: impl AsRef<Path>) -> Result<ConversionJob> {
        let source = source.as_ref();
        validate_source(source)?;

        let mut state = self.shared.state.lock();
        if let Some(existing) = state.jobs().find(|j| j.source_path == source) {
            debug!("{} is already queued as {}", source.display(), existing.id);
            return Ok(existing.clone());
        }

        let job = ConversionJob::new(source);
        self.shared.store.put(&job)?;

        info!(
            "Queued conversion {} -> {}",
            job.source_path.display(),
            job.destination_path.display()
        );
        state.pending.push_back(job.clone());
        self.shared
            .events
            .publish(ConversionEvent::ConversionQueued { job: job.clone() });

        self.dispatch(&mut state);
        Ok(job)
    }

    /// Remove the job for `source` wherever it is in the queue.
    ///
    /// If it is running, its transcode is asked to stop. Returns whether a job
    /// was removed; cancelling a path with no job is not an error.
    pub fn cancel(&self, source: impl AsRef<Path>) -> Result<bool> {
        let source = source.as_ref();
        require_path(source)?;

        let mut state = self.shared.state.lock();
        let cancelled = self.cancel_locked(&mut state, source)?;
        if cancelled {
            self.dispatch(&mut state);
        }
        Ok(cancelled)
    }

    /// Cancel every job whose source lies at or beneath `dir`.
    ///
    /// The matching rows leave the store in one transaction. If that fails
    /// the queue is left exactly as it was. Returns the number of jobs removed.
    pub fn cancel_under(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        require_path(dir)?;

        let mut state = self.shared.state.lock();
        let matching: Vec<PathBuf> = state
            .jobs()
            .filter(|j| is_within(&j.source_path, dir))
            .map(|j| j.source_path.clone())
            .collect();
        if matching.is_empty() {
            return Ok(0);
        }

        self.shared.store.remove_all(&matching)?;

        let mut cancelled = 0;
        for source in &matching {
            if self.evict_locked(&mut state, source) {
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            self.dispatch(&mut state);
        }
        Ok(cancelled)
    }

    /// Worker callback: the active job reported `percent`.
    pub fn on_progress(&self, job_id: ConversionJobId, percent: f64) -> Result<()> {
        let mut state = self.shared.state.lock();
        let active = match state.active.as_mut() {
            Some(active) if active.job.id == job_id => active,
            _ => return Err(ConversionError::StaleJobEvent(job_id)),
        };

        if !active.job.record_progress(percent) {
            debug!("Ignoring non-advancing progress {} for job {}", percent, job_id);
            return Ok(());
        }

        let sample = ProgressSample {
            job_id,
            percent: active.job.percent,
            at: tokio::time::Instant::now().into_std(),
        };

        match active.throttle.offer(sample) {
            Admission::Deliver(sample) => {
                if let Some(timer) = active.timer.take() {
                    timer.abort();
                }
                self.shared
                    .events
                    .publish(ConversionEvent::progress(&active.job, sample.percent));
            }
            Admission::Arm { delay, generation } => {
                let queue = self.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.flush_progress(job_id, generation);
                });
                if let Some(stale) = active.timer.replace(timer.abort_handle()) {
                    stale.abort();
                }
            }
            Admission::Coalesced => {
                debug!("Coalesced progress {:.1}% for job {}", sample.percent, job_id);
            }
        }

        Ok(())
    }

    /// Worker callback: the active job's transcode succeeded.
    pub fn on_completed(&self, job_id: ConversionJobId, destination: &Path) -> Result<()> {
        let mut state = self.shared.state.lock();
        let active = state.take_active(job_id)?;
        let mut job = active.job.clone();
        drop(active);

        if destination != job.destination_path {
            warn!(
                "Job {} reported output {} but expected {}",
                job_id,
                destination.display(),
                job.destination_path.display()
            );
        }

        job.complete();
        info!("Conversion completed: {}", job.destination_path.display());

        self.forget(&job);
        let event = ConversionEvent::completed(&job);
        self.retire(&mut state, job, event);
        self.dispatch(&mut state);
        Ok(())
    }

    /// Worker callback: the active job's transcode failed.
    pub fn on_failed(&self, job_id: ConversionJobId, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let mut state = self.shared.state.lock();
        let active = state.take_active(job_id)?;
        let mut job = active.job.clone();
        drop(active);

        let message = ConversionError::ConversionFailed(error).to_string();
        warn!("Conversion of {} failed: {}", job.source_path.display(), message);
        job.fail(message.clone());

        self.forget(&job);
        let event = ConversionEvent::failed(&job, message);
        self.retire(&mut state, job, event);
        self.dispatch(&mut state);
        Ok(())
    }

    /// Current queue contents, active job first.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.shared.state.lock();
        QueueSnapshot {
            seq: self.shared.events.last_seq(),
            jobs: state.jobs().cloned().collect(),
        }
    }

    /// The live job for `source`, if any.
    pub fn get(&self, source: impl AsRef<Path>) -> Option<ConversionJob> {
        let source = source.as_ref();
        let state = self.shared.state.lock();
        let job = state.jobs().find(|j| j.source_path == source).cloned();
        job
    }

    /// Up to `limit` recently finished jobs, newest first.
    pub fn recent_history(&self, limit: usize) -> Vec<ConversionJob> {
        let state = self.shared.state.lock();
        state.history.iter().take(limit).cloned().collect()
    }

    /// Stop dispatching and cancel the active transcode.
    ///
    /// Persisted jobs, including the interrupted one, are left in the store
    /// for the next [`start`](Self::start).
    pub async fn shutdown(&self) {
        let task = {
            let mut state = self.shared.state.lock();
            state.shutting_down = true;
            state.active.take().and_then(|mut active| {
                info!(
                    "Interrupting conversion of {}",
                    active.job.source_path.display()
                );
                active.cancel.cancel();
                active.task.take()
            })
        };

        if let Some(task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Transcode did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }
        info!("Conversion queue stopped");
    }

    fn flush_progress(&self, job_id: ConversionJobId, generation: u64) {
        let mut state = self.shared.state.lock();
        let Some(active) = state.active.as_mut().filter(|a| a.job.id == job_id) else {
            return;
        };

        let now = tokio::time::Instant::now().into_std();
        if let Some(sample) = active.throttle.fire(generation, now) {
            active.timer = None;
            self.shared
                .events
                .publish(ConversionEvent::progress(&active.job, sample.percent));
        }
    }

    /// Start the head job if nothing is running.
    fn dispatch(&self, state: &mut QueueState) {
        if state.shutting_down || state.active.is_some() {
            return;
        }

        while let Some(mut job) = state.pending.pop_front() {
            if !job.source_path.exists() {
                let message =
                    ConversionError::PathDoesNotExist(job.source_path.clone()).to_string();
                warn!("Skipping job {}: {}", job.id, message);
                job.fail(message.clone());

                self.forget(&job);
                let event = ConversionEvent::failed(&job, message);
                self.retire(state, job, event);
                continue;
            }

            job.start();
            if let Err(e) = self.shared.store.put(&job) {
                error!("Failed to persist start of job {}: {}", job.id, e);
            }

            info!("Starting conversion of {}", job.source_path.display());
            self.shared.events.publish(ConversionEvent::started(&job));

            let cancel = CancellationToken::new();
            let task = self.shared.worker.spawn(&job, self.clone(), cancel.clone());
            state.active = Some(ActiveJob {
                job,
                cancel,
                throttle: ProgressThrottle::new(self.shared.settings.throttle_window),
                timer: None,
                task: Some(task),
            });
            return;
        }
    }

    /// Drop the job for `source` from the store, then from memory.
    fn cancel_locked(&self, state: &mut QueueState, source: &Path) -> Result<bool> {
        if !state.jobs().any(|j| j.source_path == source) {
            return Ok(false);
        }
        self.shared.store.remove(source)?;
        Ok(self.evict_locked(state, source))
    }

    /// Take the job for `source` out of memory and publish its cancellation.
    /// The caller has already removed it from the store.
    fn evict_locked(&self, state: &mut QueueState, source: &Path) -> bool {
        let is_active = state
            .active
            .as_ref()
            .is_some_and(|a| a.job.source_path == source);

        let mut job = if is_active {
            match state.active.take() {
                Some(active) => {
                    active.cancel.cancel();
                    active.job.clone()
                }
                None => return false,
            }
        } else if let Some(pos) = state.pending.iter().position(|j| j.source_path == source) {
            match state.pending.remove(pos) {
                Some(job) => job,
                None => return false,
            }
        } else {
            return false;
        };

        job.cancel();
        info!("Cancelled conversion of {}", source.display());

        let event = ConversionEvent::cancelled(&job);
        self.retire(state, job, event);
        true
    }

    fn forget(&self, job: &ConversionJob) {
        if let Err(e) = self.shared.store.remove(&job.source_path) {
            error!("Failed to remove finished job {} from store: {}", job.id, e);
        }
    }

    fn retire(&self, state: &mut QueueState, job: ConversionJob, event: ConversionEvent) {
        self.shared.events.publish(event);

        state.history.push_front(job);
        state.history.truncate(self.shared.settings.history_size);
    }
}

/// Reject paths that are blank or cannot be used as a job key.
pub(super) fn require_path(path: &Path) -> Result<()> {
    match path.to_str() {
        None => Err(ConversionError::InvalidPath(path.to_path_buf())),
        Some(s) if s.trim().is_empty() => Err(ConversionError::PathRequired),
        Some(_) => Ok(()),
    }
}

fn validate_source(source: &Path) -> Result<()> {
    require_path(source)?;

    let already_converted = source
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(CONVERTED_EXTENSION));
    if already_converted {
        return Err(ConversionError::DestinationIsSource(source.to_path_buf()));
    }

    Ok(())
}
