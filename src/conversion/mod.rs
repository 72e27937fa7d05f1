//! Background conversion of library media to MP4.
//!
//! - [`ConversionQueue`] serializes jobs and owns their lifecycle
//! - [`ConversionWorker`] runs the active job through a [`Transcoder`]
//! - [`ProgressThrottle`] bounds how often progress is broadcast
//! - [`ConversionJobStore`] persists live jobs across restarts
//! - [`FileLifecycleCoordinator`] cancels jobs for deleted files
//! - [`FfmpegTranscoder`] is the production transcoder

mod error;
pub mod ffmpeg;
mod lifecycle;
mod queue;
mod store;
pub mod throttle;
mod worker;

pub use error::{ConversionError, Result};
pub use ffmpeg::FfmpegTranscoder;
pub use lifecycle::FileLifecycleCoordinator;
pub use queue::{ConversionQueue, QueueSettings, QueueSnapshot, DEFAULT_HISTORY_SIZE};
pub use store::ConversionJobStore;
pub use throttle::{Admission, ProgressSample, ProgressThrottle};
pub use worker::{ConversionWorker, ProgressSender, TranscodeRequest, Transcoder};
