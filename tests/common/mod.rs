//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires a [`ConversionQueue`] to an in-memory
//! DB, a scripted transcoder and an [`AppContext`]. The [`TestHarness::with_server`]
//! constructor starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use mediashelf::conversion::{
    ConversionJobStore, ConversionQueue, ConversionWorker, ProgressSender, QueueSettings,
    TranscodeRequest, Transcoder,
};
use mediashelf::events::{ConversionEvent, EventBus, EventEnvelope};
use mediashelf::server::{create_router, AppContext};
use mediashelf_db::pool::{init_memory_pool, DbPool};

/// What the scripted transcoder does with every job.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Report 50% then write the destination and succeed.
    Succeed,
    /// Report 25% then fail.
    Fail,
    /// Run until cancelled.
    Stall,
}

pub struct ScriptedTranscoder {
    script: Script,
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        match self.script {
            Script::Succeed => {
                let _ = progress.send(50.0);
                tokio::fs::write(&request.destination, b"mp4").await?;
                Ok(())
            }
            Script::Fail => {
                let _ = progress.send(25.0);
                anyhow::bail!("encoder exited with status 1")
            }
            Script::Stall => {
                cancel.cancelled().await;
                anyhow::bail!("cancelled")
            }
        }
    }
}

/// Test harness wrapping a running [`ConversionQueue`] and its
/// [`AppContext`]. Source files live in a temporary media directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub queue: ConversionQueue,
    pub store: ConversionJobStore,
    pub db: DbPool,
    pub media: TempDir,
}

impl TestHarness {
    /// Create a harness whose transcodes succeed immediately.
    pub fn new() -> Self {
        Self::with_script(Script::Succeed)
    }

    pub fn with_script(script: Script) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let media = TempDir::new().expect("failed to create media dir");
        Self::build(db, media, script)
    }

    /// Start a queue over an existing pool, as a restarted process would.
    pub fn build(db: DbPool, media: TempDir, script: Script) -> Self {
        let store = ConversionJobStore::new(db.clone());
        let worker = ConversionWorker::new(Arc::new(ScriptedTranscoder { script }));
        let settings = QueueSettings {
            throttle_window: Duration::from_millis(50),
            history_size: 10,
        };

        let queue = ConversionQueue::start(
            store.clone(),
            worker,
            Arc::new(EventBus::default()),
            settings,
        )
        .expect("failed to start queue");
        let ctx = AppContext::new(queue.clone());

        Self {
            ctx,
            queue,
            store,
            db,
            media,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(script: Script) -> (Self, SocketAddr) {
        let harness = Self::with_script(script);
        let app = create_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Create a source file in the media directory.
    pub fn source(&self, relative: &str) -> PathBuf {
        let path = self.media.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, b"video").expect("failed to write source");
        path
    }

    pub fn media_path(&self) -> &Path {
        self.media.path()
    }
}

/// Receive envelopes until one is terminal for `source`.
pub async fn wait_for_terminal(
    rx: &mut broadcast::Receiver<EventEnvelope>,
    source: &Path,
) -> Vec<EventEnvelope> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = rx.recv().await.expect("event channel closed");
            let done = envelope.event.is_terminal() && envelope.event.source_path() == source;
            seen.push(envelope);
            if done {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for a terminal event");
    seen
}

/// Whether `events` contains a completion for `source`.
pub fn completed(events: &[EventEnvelope], source: &Path) -> bool {
    events.iter().any(|e| {
        matches!(&e.event, ConversionEvent::ConversionCompleted { source_path, .. } if source_path == source)
    })
}
