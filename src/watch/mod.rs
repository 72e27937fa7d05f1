//! Filesystem watcher for deletions made outside the application.
//!
//! Removes (and renames away) under the configured library paths are routed to
//! [`FileLifecycleCoordinator::file_removed`], so jobs for files that vanished
//! are cancelled instead of failing later at dispatch.

use crate::config::WatchConfig;
use crate::conversion::FileLifecycleCoordinator;
use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Watches library directories for removed files
pub struct FileWatcher {
    config: WatchConfig,
    coordinator: FileLifecycleCoordinator,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatcher {
    pub fn new(config: WatchConfig, coordinator: FileLifecycleCoordinator) -> Self {
        Self {
            config,
            coordinator,
            watcher: None,
        }
    }

    /// Start watching configured directories
    pub fn start(&mut self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("File watcher is disabled");
            return Ok(());
        }

        if self.config.paths.is_empty() {
            tracing::warn!("No watch paths configured");
            return Ok(());
        }

        let (removed_tx, mut removed_rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for path in removed_paths(&event) {
                        let _ = removed_tx.send(path);
                    }
                }
                Err(e) => tracing::warn!("Watch error: {}", e),
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;

        for path in &self.config.paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .with_context(|| format!("Failed to watch path: {:?}", path))?;
                tracing::info!("Watching directory: {:?}", path);
            } else {
                tracing::warn!("Watch path does not exist: {:?}", path);
            }
        }

        self.watcher = Some(watcher);

        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            while let Some(path) = removed_rx.recv().await {
                tracing::debug!("Removed: {:?}", path);
                if let Err(e) = coordinator.file_removed(&path) {
                    tracing::warn!("Failed to reconcile removal of {:?}: {}", path, e);
                }
            }
        });

        Ok(())
    }

    /// Stop watching
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            tracing::info!("File watcher stopped");
        }
    }
}

/// Paths that no longer exist where they were after `event`.
pub fn removed_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Remove(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event.paths.clone(),
        // Both ends of a rename: the first path is the old location.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.first().cloned().into_iter().collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn removals_are_reported() {
        let e = event(EventKind::Remove(RemoveKind::File), &["/m/a.mkv"]);
        assert_eq!(removed_paths(&e), vec![PathBuf::from("/m/a.mkv")]);

        let e = event(EventKind::Remove(RemoveKind::Folder), &["/m/show"]);
        assert_eq!(removed_paths(&e), vec![PathBuf::from("/m/show")]);
    }

    #[test]
    fn renames_report_old_location() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/m/a.mkv", "/m/b.mkv"],
        );
        assert_eq!(removed_paths(&e), vec![PathBuf::from("/m/a.mkv")]);

        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/m/a.mkv"],
        );
        assert_eq!(removed_paths(&e), vec![PathBuf::from("/m/a.mkv")]);
    }

    #[test]
    fn other_events_are_ignored() {
        let e = event(EventKind::Create(CreateKind::File), &["/m/a.mkv"]);
        assert!(removed_paths(&e).is_empty());
    }

    #[tokio::test]
    async fn disabled_watcher_does_not_watch() {
        use crate::conversion::{
            ConversionJobStore, ConversionQueue, ConversionWorker, FfmpegTranscoder,
            QueueSettings,
        };
        use crate::events::EventBus;
        use std::sync::Arc;

        let queue = ConversionQueue::start(
            ConversionJobStore::new(mediashelf_db::pool::init_memory_pool().unwrap()),
            ConversionWorker::new(Arc::new(FfmpegTranscoder::new(
                "ffmpeg".into(),
                "ffprobe".into(),
                Default::default(),
            ))),
            Arc::new(EventBus::default()),
            QueueSettings::default(),
        )
        .unwrap();

        let mut watcher = FileWatcher::new(
            WatchConfig::default(),
            FileLifecycleCoordinator::new(queue),
        );
        watcher.start().unwrap();
        assert!(watcher.watcher.is_none());
        watcher.stop();
    }
}
