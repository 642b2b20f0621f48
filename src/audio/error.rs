//! Audio error types

use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Engine is not running")]
    NotRunning,

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("WAV file has no sample data")]
    EmptyFile,

    #[error("WAV file too large: {0} samples")]
    FileTooLarge(usize),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recording error: {0}")]
    RecordingError(String),

    #[error("Plugin error: {0}")]
    PluginError(String),
}

/// Errors produced while encoding or decoding a chain state snapshot
#[derive(Error, Debug)]
pub enum StateError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported state version: {0}")]
    UnsupportedVersion(u32),

    #[error("Unsupported property encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Invalid base64 payload for {key}: {source}")]
    Base64 {
        key: String,
        #[source]
        source: base64::DecodeError,
    },
}
