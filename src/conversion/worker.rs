//! Conversion worker.
//!
//! Runs the external transcode for the queue's active job on its own task and
//! turns what it reports into queue callbacks. The transcode itself sits
//! behind the [`Transcoder`] trait so the queue can be driven by ffmpeg in
//! production and by a scripted fake in tests.

use async_trait::async_trait;
use mediashelf_common::ConversionJobId;
use mediashelf_db::models::ConversionJob;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ConversionError;
use super::queue::ConversionQueue;

/// One transcode to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub job_id: ConversionJobId,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl From<&ConversionJob> for TranscodeRequest {
    fn from(job: &ConversionJob) -> Self {
        Self {
            job_id: job.id,
            source: job.source_path.clone(),
            destination: job.destination_path.clone(),
        }
    }
}

/// Sender for percent-complete reports (0.0..=100.0).
pub type ProgressSender = mpsc::UnboundedSender<f64>;

/// The external transcode operation.
///
/// Called once per job. Implementations report zero or more percentages on
/// `progress` and return the terminal outcome. `cancel` is a request, not a
/// guarantee: an implementation that cannot stop early may run on, and the
/// queue discards whatever it reports for a job it has already evicted.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Executes one transcode at a time on behalf of the queue.
#[derive(Clone)]
pub struct ConversionWorker {
    transcoder: Arc<dyn Transcoder>,
}

impl ConversionWorker {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }

    /// Spawn the transcode for `job`, reporting back into `queue`.
    ///
    /// Progress is forwarded in the order it was reported, and always before
    /// the terminal outcome.
    pub(crate) fn spawn(
        &self,
        job: &ConversionJob,
        queue: ConversionQueue,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let transcoder = Arc::clone(&self.transcoder);
        let request = TranscodeRequest::from(job);

        tokio::spawn(async move {
            let job_id = request.job_id;
            let destination = request.destination.clone();
            let (tx, mut rx) = mpsc::unbounded_channel();

            let transcode = transcoder.transcode(request, tx, cancel);
            tokio::pin!(transcode);

            let outcome = loop {
                tokio::select! {
                    biased;
                    Some(percent) = rx.recv() => {
                        report(job_id, queue.on_progress(job_id, percent));
                    }
                    result = &mut transcode => break result,
                }
            };

            while let Ok(percent) = rx.try_recv() {
                report(job_id, queue.on_progress(job_id, percent));
            }

            let result = match outcome {
                Ok(()) => queue.on_completed(job_id, &destination),
                Err(e) => queue.on_failed(job_id, format!("{:#}", e)),
            };
            report(job_id, result);
        })
    }
}

fn report(job_id: ConversionJobId, result: super::Result<()>) {
    match result {
        Ok(()) => {}
        Err(ConversionError::StaleJobEvent(_)) => {
            debug!("Dropped stale worker event for job {}", job_id);
        }
        Err(e) => warn!("Worker callback for job {} failed: {}", job_id, e),
    }
}
