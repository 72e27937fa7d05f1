mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {:?}", path))
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./mediashelf.toml",
        "~/.config/mediashelf/config.toml",
        "/etc/mediashelf/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.conversion.throttle_window_secs == 0 {
        anyhow::bail!("conversion.throttle_window_secs must be greater than 0");
    }

    if let Some(ref method) = config.conversion.hw_accel {
        if !HW_ACCEL_METHODS.contains(&method.as_str()) {
            anyhow::bail!(
                "Unknown hw_accel '{}' (expected one of: {})",
                method,
                HW_ACCEL_METHODS.join(", ")
            );
        }
    }

    for path in &config.watch.paths {
        if !path.exists() {
            tracing::warn!("Watch path does not exist: {:?}", path);
        }
    }

    if config.watch.enabled && config.watch.paths.is_empty() {
        tracing::warn!("Watching is enabled but no paths are configured");
    }

    Ok(())
}
