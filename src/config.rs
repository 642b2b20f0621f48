//! Configuration persistence module
//!
//! Provides TOML-based engine configuration. The default file lives in the
//! platform configuration directory:
//! - Linux: ~/.config/fxrack/config.toml
//! - Windows: %APPDATA%\fxrack\config.toml
//! - macOS: ~/Library/Application Support/fxrack/config.toml

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{DeviceId, StreamRequest};

/// Application name used for configuration directory
const APP_NAME: &str = "fxrack";

const DEFAULT_SAMPLE_RATE: u32 = 48000;
/// Wait between pausing and releasing the output stream
const DEFAULT_TEARDOWN_GRACE_MS: u64 = 500;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 50;
const DEFAULT_OFFLINE_BLOCK_FRAMES: usize = 4096;

/// Errors loading or saving the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Stream sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Selected input device ID (None = system default)
    #[serde(default)]
    pub input_device_id: Option<String>,

    /// Selected output device ID (None = system default)
    #[serde(default)]
    pub output_device_id: Option<String>,

    /// Frames per callback. 0 derives it from the output device
    #[serde(default)]
    pub buffer_frames: u32,

    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,

    /// How often the recorder flushes to disk
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    #[serde(default = "default_offline_block_frames")]
    pub offline_block_frames: usize,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_teardown_grace_ms() -> u64 {
    DEFAULT_TEARDOWN_GRACE_MS
}

fn default_drain_interval_ms() -> u64 {
    DEFAULT_DRAIN_INTERVAL_MS
}

fn default_offline_block_frames() -> usize {
    DEFAULT_OFFLINE_BLOCK_FRAMES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            input_device_id: None,
            output_device_id: None,
            buffer_frames: 0,
            teardown_grace_ms: DEFAULT_TEARDOWN_GRACE_MS,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
            offline_block_frames: DEFAULT_OFFLINE_BLOCK_FRAMES,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if self.buffer_frames != 0 && !(16..=8192).contains(&self.buffer_frames) {
            return Err(ConfigError::Invalid(format!(
                "buffer_frames {} must be 0 or within 16..=8192",
                self.buffer_frames
            )));
        }
        if self.drain_interval_ms == 0 {
            return Err(ConfigError::Invalid("drain_interval_ms must be positive".to_string()));
        }
        if self.offline_block_frames == 0 {
            return Err(ConfigError::Invalid(
                "offline_block_frames must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// Stream parameters for `AudioEngine::start`
    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            sample_rate: self.sample_rate,
            input_device: self.input_device_id.as_deref().map(DeviceId::from),
            output_device: self.output_device_id.as_deref().map(DeviceId::from),
            buffer_frames: self.buffer_frames,
        }
    }
}

/// Default configuration file path
///
/// Returns None if the configuration directory cannot be determined.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load and validate configuration from `path`, or the default location
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or(ConfigError::NoConfigDir)?,
    };

    if !path.exists() {
        return Err(ConfigError::NotFound(path));
    }

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config: EngineConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to `path`, or the default location
///
/// Creates the parent directory if it doesn't exist.
pub fn save_config(config: &EngineConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or(ConfigError::NoConfigDir)?,
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })?;
    Ok(())
}
