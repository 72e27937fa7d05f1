mod cli;

use mediashelf::{
    config::{self, Config},
    conversion::{
        ffmpeg, ConversionJobStore, ConversionQueue, ConversionWorker, FfmpegTranscoder,
    },
    events::{ConversionEvent, EventBus},
    mirror::{ClientMirror, MirrorUpdate},
    server::{self, AppContext},
    watch,
};
use mediashelf_common::paths::is_video_file;
use mediashelf_db::models::ConversionStatus;
use mediashelf_db::pool::init_pool;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Open the queue database and start the conversion queue.
fn start_queue(config: &Config) -> Result<ConversionQueue> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let db_path = config.database_path();
    let db_path_str = db_path.to_string_lossy();
    tracing::info!("Initializing database at {}", db_path_str);
    let pool = init_pool(&db_path_str)?;
    let store = ConversionJobStore::new(pool);

    let transcoder = FfmpegTranscoder::locate(&config.tools, config.conversion.clone())?;
    let worker = ConversionWorker::new(Arc::new(transcoder));
    let events = Arc::new(EventBus::default());

    Ok(ConversionQueue::start(
        store,
        worker,
        events,
        config.conversion.queue_settings(),
    )?)
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting mediashelf server");

    let queue = start_queue(&config)?;
    let ctx = AppContext::new(queue.clone());

    let mut watcher = watch::FileWatcher::new(config.watch.clone(), ctx.coordinator.clone());
    watcher.start()?;

    let server_result = server::start_server(&config.server, ctx).await;

    tracing::info!("Shutting down...");
    watcher.stop();
    queue.shutdown().await;

    server_result
}

async fn convert_files(files: Vec<PathBuf>, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let queue = start_queue(&config)?;

    // Subscribe before the snapshot so nothing falls between them.
    let mut rx = queue.subscribe();
    let mut mirror = ClientMirror::from_snapshot(queue.snapshot());

    let mut waiting = HashSet::new();
    for file in files {
        let file = std::path::absolute(&file).unwrap_or(file);
        if !is_video_file(&file) {
            eprintln!("Skipping {}: not a video file", file.display());
            continue;
        }
        match queue.enqueue(&file) {
            Ok(job) => {
                println!("Queued {}", job.source_path.display());
                waiting.insert(job.source_path);
            }
            Err(e) => eprintln!("Skipping {}: {}", file.display(), e),
        }
    }

    let mut failed = 0usize;
    let shutdown = server::shutdown_signal();
    tokio::pin!(shutdown);

    while !waiting.is_empty() {
        let received = tokio::select! {
            received = rx.recv() => received,
            _ = &mut shutdown => {
                queue.shutdown().await;
                anyhow::bail!("Interrupted; unfinished conversions stay queued");
            }
        };

        let envelope = match &received {
            Ok(envelope) => envelope.clone(),
            Err(RecvError::Lagged(_)) => {
                resync(&queue, &mut mirror, &mut waiting, &mut failed);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match mirror.handle(received) {
            MirrorUpdate::Applied => {}
            MirrorUpdate::Ignored => continue,
            MirrorUpdate::Resync => {
                resync(&queue, &mut mirror, &mut waiting, &mut failed);
                continue;
            }
        }

        match &envelope.event {
            ConversionEvent::ConversionStarted { source_path, .. }
                if waiting.contains(source_path) =>
            {
                println!("Converting {}", source_path.display());
            }
            ConversionEvent::ProgressUpdate {
                source_path,
                percent,
                ..
            } if waiting.contains(source_path) => {
                println!("[{:>5.1}%] {}", percent, source_path.display());
            }
            event if event.is_terminal() && waiting.remove(event.source_path()) => {
                if let ConversionEvent::ConversionFailed { error, .. } = event {
                    eprintln!("  {}", error);
                }
                report_outcome(
                    event.source_path(),
                    mirror.last_outcome(event.source_path()),
                    &mut failed,
                );
            }
            _ => {}
        }
    }

    queue.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{} conversion(s) failed", failed);
    }
    Ok(())
}

/// Rebuild the mirror from a fresh snapshot and settle any files that
/// finished while the receiver was behind.
fn resync(
    queue: &ConversionQueue,
    mirror: &mut ClientMirror,
    waiting: &mut HashSet<PathBuf>,
    failed: &mut usize,
) {
    mirror.resync(queue.snapshot());
    let history = queue.recent_history(usize::MAX);
    waiting.retain(|path| {
        if mirror.get(path).is_some() {
            return true;
        }
        let status = history
            .iter()
            .find(|j| &j.source_path == path)
            .map(|j| j.status);
        report_outcome(path, status, failed);
        false
    });
}

fn report_outcome(path: &Path, status: Option<ConversionStatus>, failed: &mut usize) {
    match status {
        Some(ConversionStatus::Completed) => println!("Done: {}", path.display()),
        Some(status) => {
            *failed += 1;
            println!("{}: {}", status, path.display());
        }
        None => println!("Finished: {}", path.display()),
    }
}

fn show_queue(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let db_path = config.database_path();

    if !db_path.exists() {
        println!("Queue is empty (no database at {})", db_path.display());
        return Ok(());
    }

    let store = ConversionJobStore::new(init_pool(&db_path.to_string_lossy())?);
    let jobs = store.get_all()?;

    if jobs.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    for (i, job) in jobs.iter().enumerate() {
        println!(
            "{:>3}. [{}] {} -> {}",
            i + 1,
            job.status,
            job.source_path.display(),
            job.destination_path.display()
        );
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let tools = ffmpeg::check_tools(&config.tools);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Conversions will not run without them.");
    }

    Ok(())
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    config::validate_config(&config)?;

    println!("Configuration is valid.");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", config.database_path().display());
    println!(
        "  Throttle window: {}s, history: {}",
        config.conversion.throttle_window_secs, config.conversion.history_size
    );
    println!(
        "  Encoder: {}",
        config.conversion.hw_accel.as_deref().unwrap_or("libx264")
    );
    if config.watch.enabled {
        println!("  Watching: {:?}", config.watch.paths);
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediashelf=trace,mediashelf_db=debug,tower_http=debug".to_string()
        } else {
            "mediashelf=info,mediashelf_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Convert { files } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_files(files, cli.config.as_deref()))
        }
        Commands::Queue => show_queue(cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}
