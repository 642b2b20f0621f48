//! Audio engine module
//!
//! Handles the duplex hardware stream, the plugin chain, WAV playback,
//! recording, and offline rendering.

mod device;
mod engine;
mod error;
mod offline;
pub mod plugin;
mod recording;
mod render;
mod ring_buffer;
pub mod wav;

pub use device::{list_input_devices, list_output_devices, AudioDevice, DeviceId};
pub use engine::{
    plan_block_size, AudioEngine, AudioEvent, EngineState, StreamInfo, StreamRequest,
    DEFAULT_BLOCK_FRAMES,
};
pub use error::{AudioError, StateError};
pub use offline::{OfflineProcessor, OFFLINE_BLOCK_FRAMES};
pub use recording::{AudioRecorder, RecordingInfo, DEFAULT_DRAIN_INTERVAL};
pub use ring_buffer::{ring_buffer, RingReader, RingWriter};
