//! ffmpeg-backed [`Transcoder`].
//!
//! Encodes to H.264 High / AAC-LC stereo MP4 with `+faststart`. The source is
//! probed with ffprobe for its duration (to turn ffmpeg's `-progress` output
//! into a percentage) and its height (for adaptive CRF). Output is written to
//! a `.partial.mp4` sibling and renamed into place only on success.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::worker::{ProgressSender, TranscodeRequest, Transcoder};
use crate::config::{ConversionConfig, ToolsConfig};

/// stderr lines kept for the failure message.
const STDERR_TAIL: usize = 5;

/// Compute adaptive CRF based on source resolution height.
///
/// - SD (≤480p): CRF 12
/// - 720p (≤720p): CRF 14
/// - 1080p (≤1080p): CRF 15
/// - 4K+: CRF 18
pub fn adaptive_crf(height: u32) -> u32 {
    match height {
        0..=480 => 12,
        481..=720 => 14,
        721..=1080 => 15,
        _ => 18,
    }
}

/// `-hwaccel` flags (placed before `-i`), encoder name, and whether the
/// encoder takes CRF rather than a bitrate target.
fn resolve_hw_accel(hw_accel: Option<&str>) -> (Vec<&'static str>, &'static str, bool) {
    match hw_accel {
        Some("videotoolbox") => (vec!["-hwaccel", "videotoolbox"], "h264_videotoolbox", false),
        Some("nvenc") => (vec!["-hwaccel", "cuda"], "h264_nvenc", false),
        Some("vaapi") => (
            vec!["-hwaccel", "vaapi", "-hwaccel_output_format", "vaapi"],
            "h264_vaapi",
            false,
        ),
        Some("qsv") => (vec!["-hwaccel", "qsv"], "h264_qsv", false),
        _ => (vec![], "libx264", true),
    }
}

/// What ffprobe told us about a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    pub duration_secs: Option<f64>,
    pub height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json -show_entries format=duration:stream=height`.
pub fn parse_probe_output(json: &str) -> Result<SourceInfo> {
    let probe: ProbeOutput = serde_json::from_str(json).context("Invalid ffprobe output")?;

    Ok(SourceInfo {
        duration_secs: probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0),
        height: probe.streams.iter().find_map(|s| s.height),
    })
}

/// Incremental parser for ffmpeg `-progress` key=value blocks.
///
/// Each block ends with a `progress=continue` or `progress=end` line; that is
/// when a percentage is produced.
#[derive(Debug)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    out_time_us: Option<i64>,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs,
            out_time_us: None,
        }
    }

    /// Feed one line. Returns a percentage at the end of each block.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("out_time_us=") {
            self.out_time_us = val.parse::<i64>().ok();
            return None;
        }

        let state = line.strip_prefix("progress=")?;
        if state == "end" {
            return Some(100.0);
        }

        let duration = self.duration_secs.filter(|d| *d > 0.0)?;
        let elapsed = self.out_time_us? as f64 / 1_000_000.0;
        Some((elapsed / duration * 100.0).clamp(0.0, 100.0))
    }
}

/// Whether a stderr line belongs to the `-progress` stream.
fn is_progress_line(line: &str) -> bool {
    line.split_once('=')
        .is_some_and(|(key, _)| !key.is_empty() && !key.contains(' '))
}

/// Availability of an external tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    pub path: Option<PathBuf>,
}

/// Resolve a tool, preferring a configured path over a PATH lookup.
pub fn resolve_tool(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!("Configured {} path {:?} does not exist", name, path);
    }

    which::which(name).with_context(|| format!("{} not found on PATH", name))
}

/// Check ffmpeg and ffprobe.
pub fn check_tools(tools: &ToolsConfig) -> Vec<ToolInfo> {
    [
        ("ffmpeg", tools.ffmpeg_path.as_deref()),
        ("ffprobe", tools.ffprobe_path.as_deref()),
    ]
    .into_iter()
    .map(|(name, configured)| {
        let path = resolve_tool(name, configured).ok();
        ToolInfo {
            name: name.to_string(),
            available: path.is_some(),
            path,
        }
    })
    .collect()
}

/// Transcodes with the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    settings: ConversionConfig,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, settings: ConversionConfig) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            settings,
        }
    }

    /// Locate both tools from config or PATH.
    pub fn locate(tools: &ToolsConfig, settings: ConversionConfig) -> Result<Self> {
        let ffmpeg = resolve_tool("ffmpeg", tools.ffmpeg_path.as_deref())?;
        let ffprobe = resolve_tool("ffprobe", tools.ffprobe_path.as_deref())?;
        Ok(Self::new(ffmpeg, ffprobe, settings))
    }

    async fn probe(&self, source: &Path) -> Result<SourceInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "format=duration:stream=height",
                "-of",
                "json",
            ])
            .arg(source)
            .output()
            .await
            .context("Failed to execute ffprobe")?;

        if !output.status.success() {
            anyhow::bail!(
                "ffprobe exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Full ffmpeg argument list for one encode.
    pub fn build_args(&self, input: &Path, output: &Path, source: &SourceInfo) -> Vec<String> {
        let crf = match (self.settings.adaptive_crf, source.height) {
            (true, Some(height)) => adaptive_crf(height),
            _ => self.settings.video_crf,
        };
        let (hwaccel_args, encoder, use_crf) =
            resolve_hw_accel(self.settings.hw_accel.as_deref());

        let mut args: Vec<String> = ["-y", "-progress", "pipe:2", "-nostats"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(hwaccel_args.iter().map(|s| s.to_string()));
        args.push("-i".into());
        args.push(input.to_string_lossy().into_owned());

        args.extend(["-c:v", encoder, "-profile:v", "high"].map(String::from));
        if use_crf {
            args.extend([
                "-crf".to_string(),
                crf.to_string(),
                "-preset".to_string(),
                self.settings.video_preset.clone(),
            ]);
        } else {
            args.extend(["-b:v", "5M", "-maxrate", "8M", "-bufsize", "16M"].map(String::from));
        }

        args.extend(
            [
                "-vf",
                "scale='min(1920,iw)':'min(1080,ih)':force_original_aspect_ratio=decrease:force_divisible_by=2",
                "-force_key_frames",
                "expr:gte(t,n_forced*2)",
                "-c:a",
                "aac",
                "-b:a",
            ]
            .map(String::from),
        );
        args.push(self.settings.audio_bitrate.clone());
        args.extend(
            [
                "-ac",
                "2",
                "-movflags",
                "+faststart",
                "-map",
                "0:v:0",
                "-map",
                "0:a:0?",
            ]
            .map(String::from),
        );
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    destination.with_extension("partial.mp4")
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let info = match self.probe(&request.source).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Probe of {:?} failed, progress unavailable: {:#}", request.source, e);
                SourceInfo::default()
            }
        };

        let partial = partial_path(&request.destination);
        let args = self.build_args(&request.source, &partial, &info);
        tracing::debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn ffmpeg")?;

        let stderr = child
            .stderr
            .take()
            .context("ffmpeg stderr was not captured")?;
        let mut lines = BufReader::new(stderr).lines();
        let mut parser = ProgressParser::new(info.duration_secs);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    let _ = tokio::fs::remove_file(&partial).await;
                    anyhow::bail!("cancelled");
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read ffmpeg output")? else {
                        break;
                    };
                    if let Some(percent) = parser.feed(&line) {
                        let _ = progress.send(percent);
                    } else if !is_progress_line(&line) {
                        if tail.len() == STDERR_TAIL {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for ffmpeg")?;
        if !status.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            let detail = tail.into_iter().collect::<Vec<_>>().join("\n");
            anyhow::bail!("ffmpeg exited with status {}: {}", status, detail.trim());
        }

        tokio::fs::rename(&partial, &request.destination)
            .await
            .with_context(|| format!("Failed to move output to {:?}", request.destination))?;

        Ok(())
    }
}
