use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::conversion::QueueSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    /// Directory holding the queue database. Tilde-expanded.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.local/share/mediashelf")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            conversion: ConversionConfig::default(),
            tools: ToolsConfig::default(),
            watch: WatchConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Data directory with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        let raw = self.data_dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("mediashelf.db")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Hardware encoders ffmpeg can be pointed at.
pub const HW_ACCEL_METHODS: &[&str] = &["nvenc", "qsv", "vaapi", "videotoolbox"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionConfig {
    /// Minimum seconds between progress updates for one job.
    #[serde(default = "default_throttle_window")]
    pub throttle_window_secs: u64,

    /// Finished jobs kept for observers.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Hardware acceleration method (nvenc, qsv, vaapi, videotoolbox).
    #[serde(default)]
    pub hw_accel: Option<String>,

    #[serde(default = "default_video_preset")]
    pub video_preset: String,

    /// Base CRF, used when `adaptive_crf` is off.
    #[serde(default = "default_video_crf")]
    pub video_crf: u32,

    /// Pick CRF from the source resolution.
    #[serde(default = "default_true")]
    pub adaptive_crf: bool,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_throttle_window() -> u64 {
    10
}
fn default_history_size() -> usize {
    50
}
fn default_video_preset() -> String {
    "medium".to_string()
}
fn default_video_crf() -> u32 {
    20
}
fn default_true() -> bool {
    true
}
fn default_audio_bitrate() -> String {
    "192k".to_string()
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            throttle_window_secs: default_throttle_window(),
            history_size: default_history_size(),
            hw_accel: None,
            video_preset: default_video_preset(),
            video_crf: default_video_crf(),
            adaptive_crf: true,
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl ConversionConfig {
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            throttle_window: Duration::from_secs(self.throttle_window_secs),
            history_size: self.history_size,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub paths: Vec<PathBuf>,
}
