//! fxrack - real-time audio effect rack host
//!
//! This library drives an ordered chain of effect plugins inside a hardware
//! audio callback, renders files through the same chain offline, and records
//! the raw input alongside the processed output while monitoring.

pub mod audio;
pub mod config;

pub use audio::plugin::{PluginChain, PluginRegistry};
pub use audio::{AudioEngine, AudioRecorder, OfflineProcessor};
pub use config::EngineConfig;
