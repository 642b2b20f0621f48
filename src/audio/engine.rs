//! Duplex audio engine
//!
//! Opens an input and an output stream, runs the plugin chain inside the
//! output callback, and exposes metering, WAV playback, recording and chain
//! state controls to the host thread.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Stream, StreamConfig};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::device::{find_input_device, find_output_device, DeviceId};
use super::error::{AudioError, StateError};
use super::plugin::{
    deserialize_chain_state, serialize_chain_state, ChainState, PluginChain, PluginRegistry,
};
use super::recording::{AudioRecorder, RecordingInfo};
use super::render::{EngineShared, RenderContext, SharedCapture};
use super::ring_buffer::{ring_buffer, RingWriter};
use super::wav::{read_wav, resample_linear};
use crate::config::EngineConfig;

/// Block size used when neither the caller nor the device suggests one
pub const DEFAULT_BLOCK_FRAMES: u32 = 256;

/// Device minimums below this are treated as unrealistic
const MIN_NATIVE_BURST: u32 = 64;

/// Capture ring size in blocks
const CAPTURE_RING_BLOCKS: usize = 4;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Events that can occur during audio streaming
#[derive(Debug, Clone)]
pub enum AudioEvent {
    /// Input device was disconnected
    InputDeviceDisconnected,
    /// Output device was disconnected
    OutputDeviceDisconnected,
    /// Stream error occurred
    StreamError(String),
}

/// What to open on `start`
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// 0 uses the output device's default rate
    pub sample_rate: u32,
    /// `None` uses the host default
    pub input_device: Option<DeviceId>,
    pub output_device: Option<DeviceId>,
    /// 0 derives the block from the device
    pub buffer_frames: u32,
}

/// What was actually opened
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub host: String,
    pub input_device: Option<String>,
    pub output_device: String,
    pub sample_rate: u32,
    /// Smallest callback the output device advertised, 0 if unknown
    pub native_burst_frames: u32,
    pub block_frames: u32,
    pub input_channels: u16,
    pub output_channels: u16,
    /// False when the device refused the fixed block and we fell back to its default
    pub input_fixed_buffer: bool,
    pub output_fixed_buffer: bool,
}

/// Choose the processing block size.
///
/// An explicit request wins. Otherwise the device's native burst is rounded up
/// to a power of two, e.g. 144 becomes 256.
pub fn plan_block_size(requested: u32, native_burst: u32) -> u32 {
    if requested > 0 {
        requested
    } else if native_burst == 0 {
        DEFAULT_BLOCK_FRAMES
    } else {
        native_burst.next_power_of_two()
    }
}

fn native_burst(buffer_size: &cpal::SupportedBufferSize) -> u32 {
    match *buffer_size {
        cpal::SupportedBufferSize::Range { min, max } => min.max(MIN_NATIVE_BURST).min(max),
        cpal::SupportedBufferSize::Unknown => 0,
    }
}

fn stream_error(e: impl std::fmt::Display) -> AudioError {
    AudioError::StreamError(e.to_string())
}

/// Real-time effect host driving a duplex stream
pub struct AudioEngine {
    config: EngineConfig,
    shared: Arc<EngineShared>,
    state: EngineState,
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,
    chain_active: bool,
    sample_rate: u32,
    block_frames: u32,
    stream_info: Option<StreamInfo>,
    // Event sender for device change notifications
    event_tx: Option<Sender<AudioEvent>>,
}

impl AudioEngine {
    /// Create an engine with an empty chain
    pub fn new(config: EngineConfig) -> Self {
        Self::with_chain(config, Arc::new(PluginChain::new()))
    }

    /// Create an engine around an existing chain
    pub fn with_chain(config: EngineConfig, chain: Arc<PluginChain>) -> Self {
        let recorder = Arc::new(AudioRecorder::new(config.drain_interval()));
        Self {
            shared: Arc::new(EngineShared::new(chain, recorder)),
            config,
            state: EngineState::Stopped,
            input_stream: None,
            output_stream: None,
            chain_active: false,
            sample_rate: 0,
            block_frames: 0,
            stream_info: None,
            event_tx: None,
        }
    }

    /// Set event sender for device change notifications
    pub fn set_event_sender(&mut self, tx: Sender<AudioEvent>) {
        self.event_tx = Some(tx);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<PluginChain> {
        &self.shared.chain
    }

    pub fn recorder(&self) -> &Arc<AudioRecorder> {
        &self.shared.recorder
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// False once stopped or after the device went away
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream_info.as_ref()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn callback_frames(&self) -> u32 {
        self.block_frames
    }

    /// Open the streams described by the engine configuration
    pub fn start_default(&mut self) -> Result<(), AudioError> {
        let request = self.config.stream_request();
        self.start(&request)
    }

    /// Open both streams and begin processing. No-op if already running.
    pub fn start(&mut self, request: &StreamRequest) -> Result<(), AudioError> {
        if self.is_running() {
            debug!("Audio engine already running");
            return Ok(());
        }
        // A device error clears the flag but leaves the streams open
        if self.input_stream.is_some() || self.output_stream.is_some() {
            self.stop();
        }

        self.state = EngineState::Starting;
        if let Err(e) = self.open(request) {
            error!("Failed to start audio engine: {}", e);
            self.shared.running.store(false, Ordering::Release);
            if self.chain_active {
                self.shared.chain.deactivate();
                self.chain_active = false;
            }
            self.close_streams();
            self.state = EngineState::Stopped;
            return Err(e);
        }
        self.state = EngineState::Running;
        Ok(())
    }

    fn open(&mut self, request: &StreamRequest) -> Result<(), AudioError> {
        let host = cpal::default_host();

        let output_device = find_output_device(&host, request.output_device.as_ref())?;
        let output_default = output_device
            .default_output_config()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;
        let sample_rate = match request.sample_rate {
            0 => output_default.sample_rate().0,
            rate => rate,
        };
        let burst = native_burst(output_default.buffer_size());
        let block_frames = plan_block_size(request.buffer_frames, burst);
        if request.buffer_frames == 0 && block_frames != burst {
            debug!("Native burst {} rounded to block {}", burst, block_frames);
        }

        let input_device = match find_input_device(&host, request.input_device.as_ref()) {
            Ok(device) => Some(device),
            Err(e) if request.input_device.is_none() => {
                warn!("No input device, only WAV playback will be heard: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        let mut info = StreamInfo {
            host: host.id().name().to_string(),
            output_device: output_device.name().unwrap_or_default(),
            sample_rate,
            native_burst_frames: burst,
            block_frames,
            output_channels: output_default.channels(),
            ..Default::default()
        };
        info!(
            "Starting audio engine on {} at {} Hz, block {}",
            info.output_device, sample_rate, block_frames
        );

        let mut capture = None;
        if let Some(device) = &input_device {
            let (writer, reader) = ring_buffer(block_frames as usize * CAPTURE_RING_BLOCKS);
            let (stream, channels, fixed) =
                self.open_input(device, sample_rate, block_frames, Arc::new(Mutex::new(writer)))?;
            info.input_device = device.name().ok();
            info.input_channels = channels;
            info.input_fixed_buffer = fixed;
            self.input_stream = Some(stream);
            capture = Some(Arc::new(Mutex::new(reader)));
        }

        let (stream, fixed) = self.open_output(
            &output_device,
            sample_rate,
            block_frames,
            info.output_channels,
            capture,
        )?;
        info.output_fixed_buffer = fixed;
        self.output_stream = Some(stream);

        // Plugins see the final rate and block before the first callback
        self.shared.chain.set_sample_rate(sample_rate as f32, block_frames);
        self.chain_active = true;

        self.sample_rate = sample_rate;
        self.block_frames = block_frames;
        self.shared.running.store(true, Ordering::Release);

        if let Some(stream) = &self.input_stream {
            stream.play().map_err(stream_error)?;
        }
        if let Some(stream) = &self.output_stream {
            stream.play().map_err(stream_error)?;
        }

        debug!("Streams opened: {:?}", info);
        self.stream_info = Some(info);
        Ok(())
    }

    fn open_input(
        &self,
        device: &cpal::Device,
        sample_rate: u32,
        block_frames: u32,
        writer: Arc<Mutex<RingWriter>>,
    ) -> Result<(Stream, u16, bool), AudioError> {
        let channels = device
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?
            .channels();

        let build = |buffer_size: BufferSize| {
            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size,
            };
            let writer = Arc::clone(&writer);
            let stride = channels.max(1) as usize;
            let mut mono = vec![0.0f32; block_frames.max(1) as usize];
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let Some(mut writer) = writer.try_lock() else {
                        return;
                    };
                    if stride == 1 {
                        writer.write(data);
                        return;
                    }
                    // The instrument is on the first channel
                    for chunk in data.chunks(mono.len() * stride) {
                        let frames = chunk.len() / stride;
                        for (m, frame) in mono.iter_mut().zip(chunk.chunks_exact(stride)) {
                            *m = frame[0];
                        }
                        writer.write(&mono[..frames]);
                    }
                },
                self.error_callback("Input", AudioEvent::InputDeviceDisconnected),
                None,
            )
        };

        let (stream, fixed) = match build(BufferSize::Fixed(block_frames)) {
            Ok(stream) => (stream, true),
            Err(e) => {
                warn!("Input refused {} frame buffer ({}), using device default", block_frames, e);
                (build(BufferSize::Default).map_err(stream_error)?, false)
            }
        };
        Ok((stream, channels, fixed))
    }

    fn open_output(
        &self,
        device: &cpal::Device,
        sample_rate: u32,
        block_frames: u32,
        channels: u16,
        capture: Option<SharedCapture>,
    ) -> Result<(Stream, bool), AudioError> {
        let build = |buffer_size: BufferSize| {
            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size,
            };
            let mut context = RenderContext::new(
                Arc::clone(&self.shared),
                capture.clone(),
                sample_rate as f32,
                block_frames as usize,
            );
            let shared = Arc::clone(&self.shared);
            let stride = channels as usize;
            device.build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    let timestamp = info.timestamp();
                    if let Some(delay) = timestamp.playback.duration_since(&timestamp.callback) {
                        shared.output_delay_ms.store(delay.as_secs_f32() * 1000.0);
                    }
                    context.render(data, stride);
                },
                self.error_callback("Output", AudioEvent::OutputDeviceDisconnected),
                None,
            )
        };

        match build(BufferSize::Fixed(block_frames)) {
            Ok(stream) => Ok((stream, true)),
            Err(e) => {
                warn!("Output refused {} frame buffer ({}), using device default", block_frames, e);
                Ok((build(BufferSize::Default).map_err(stream_error)?, false))
            }
        }
    }

    // Error callback with device disconnection detection
    fn error_callback(
        &self,
        label: &'static str,
        disconnected: AudioEvent,
    ) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let shared = Arc::clone(&self.shared);
        let event_tx = self.event_tx.clone();
        move |err: cpal::StreamError| {
            error!("{} stream error: {:?}", label, err);
            let event = match err {
                cpal::StreamError::DeviceNotAvailable => {
                    warn!("{} device disconnected", label);
                    shared.running.store(false, Ordering::Release);
                    disconnected.clone()
                }
                other => {
                    shared.xruns.fetch_add(1, Ordering::Relaxed);
                    AudioEvent::StreamError(other.to_string())
                }
            };
            if let Some(tx) = &event_tx {
                let _ = tx.send(event);
            }
        }
    }

    /// Stop processing and release both streams. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        if self.state == EngineState::Stopped
            && self.input_stream.is_none()
            && self.output_stream.is_none()
        {
            debug!("Audio engine already stopped");
            return;
        }
        self.state = EngineState::Stopping;
        info!("Stopping audio engine (was running: {})", was_running);

        if self.shared.recorder.is_recording() {
            if let Err(e) = self.shared.recorder.stop_recording() {
                warn!("Failed to stop recording: {}", e);
            }
        }
        self.shared.wav.playing.store(false, Ordering::Release);

        if self.chain_active {
            self.shared.chain.deactivate();
            self.chain_active = false;
        }
        self.close_streams();

        self.state = EngineState::Stopped;
        info!("Audio engine stopped");
    }

    fn close_streams(&mut self) {
        if let Some(stream) = self.input_stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Input pause failed: {}", e);
            }
            drop(stream);
        }
        if let Some(stream) = self.output_stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Output pause failed: {}", e);
            }
            // Some backends still deliver a callback after pause returns
            std::thread::sleep(self.config.teardown_grace());
            drop(stream);
        }
    }

    // Metering

    /// Decaying input peak, 0..1
    pub fn input_level(&self) -> f32 {
        self.shared.meters.input_peak.load()
    }

    /// Decaying output peak, 0..1
    pub fn output_level(&self) -> f32 {
        self.shared.meters.output_peak.load()
    }

    /// Chain processing time over the block's real-time budget, capped at 1
    pub fn cpu_load(&self) -> f32 {
        self.shared.meters.cpu_load.load()
    }

    pub fn is_input_clipping(&self) -> bool {
        self.shared.meters.input_clipped.load(Ordering::Relaxed)
    }

    pub fn is_output_clipping(&self) -> bool {
        self.shared.meters.output_clipped.load(Ordering::Relaxed)
    }

    pub fn reset_clipping(&self) {
        self.shared.meters.input_clipped.store(false, Ordering::Relaxed);
        self.shared.meters.output_clipped.store(false, Ordering::Relaxed);
    }

    /// Capture underruns plus backend stream errors
    pub fn xrun_count(&self) -> u64 {
        self.shared.xruns.load(Ordering::Relaxed)
    }

    /// Estimated round trip: one input block, one output block, and the
    /// playback delay the device reports. 0 when stopped.
    pub fn latency_ms(&self) -> f64 {
        if !self.is_running() || self.sample_rate == 0 {
            return 0.0;
        }
        let blocks = 2.0 * self.block_frames as f64 / self.sample_rate as f64 * 1000.0;
        blocks + self.shared.output_delay_ms.load() as f64
    }

    // Bypass

    pub fn set_chain_bypass(&self, bypass: bool) {
        self.shared.chain_bypass.store(bypass, Ordering::Release);
    }

    pub fn is_chain_bypassed(&self) -> bool {
        self.shared.chain_bypass.load(Ordering::Acquire)
    }

    /// Whether WAV playback skips the chain (default true)
    pub fn set_wav_bypass_chain(&self, bypass: bool) {
        self.shared.wav_bypass.store(bypass, Ordering::Release);
    }

    pub fn is_wav_bypass_chain(&self) -> bool {
        self.shared.wav_bypass.load(Ordering::Acquire)
    }

    // WAV playback

    /// Decode a file, downmix to mono, and resample to the stream rate.
    ///
    /// The engine must be running so the target rate is known. Playback is
    /// paused and rewound. Returns the duration in seconds.
    pub fn load_wav<P: AsRef<Path>>(&self, path: P) -> Result<f64, AudioError> {
        if !self.is_running() {
            return Err(AudioError::NotRunning);
        }
        let data = read_wav(path.as_ref())?;
        let source_rate = data.sample_rate;
        let samples = resample_linear(&data.into_mono(), source_rate, self.sample_rate);
        let duration = samples.len() as f64 / self.sample_rate as f64;

        let wav = &self.shared.wav;
        wav.playing.store(false, Ordering::Release);
        *wav.buffer.write() = Some(samples);
        wav.position.store(0, Ordering::Release);

        info!(
            "Loaded {} ({} Hz -> {} Hz, {:.2}s)",
            path.as_ref().display(),
            source_rate,
            self.sample_rate,
            duration
        );
        Ok(duration)
    }

    pub fn unload_wav(&self) {
        self.shared.wav.playing.store(false, Ordering::Release);
        *self.shared.wav.buffer.write() = None;
        self.shared.wav.position.store(0, Ordering::Release);
    }

    pub fn is_wav_loaded(&self) -> bool {
        self.shared.wav.buffer.read().is_some()
    }

    /// Start playback, rewinding first if the end was reached
    pub fn wav_play(&self) -> bool {
        let len = self.wav_len();
        if len == 0 {
            return false;
        }
        let wav = &self.shared.wav;
        if wav.position.load(Ordering::Acquire) >= len {
            wav.position.store(0, Ordering::Release);
        }
        wav.playing.store(true, Ordering::Release);
        true
    }

    pub fn wav_pause(&self) {
        self.shared.wav.playing.store(false, Ordering::Release);
    }

    pub fn is_wav_playing(&self) -> bool {
        self.shared.wav.playing.load(Ordering::Acquire)
    }

    /// Move the playhead, clamped to the loaded buffer
    pub fn wav_seek(&self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.sample_rate as f64) as usize;
        self.shared
            .wav
            .position
            .store(frame.min(self.wav_len()), Ordering::Release);
    }

    pub fn wav_position_secs(&self) -> f64 {
        self.frames_to_secs(self.shared.wav.position.load(Ordering::Acquire))
    }

    pub fn wav_duration_secs(&self) -> f64 {
        self.frames_to_secs(self.wav_len())
    }

    fn wav_len(&self) -> usize {
        self.shared.wav.buffer.read().as_ref().map_or(0, Vec::len)
    }

    fn frames_to_secs(&self, frames: usize) -> f64 {
        match self.sample_rate {
            0 => 0.0,
            rate => frames as f64 / rate as f64,
        }
    }

    // Recording

    /// Record raw input and processed output at the stream rate
    pub fn start_recording<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        raw_path: P,
        processed_path: Q,
    ) -> Result<(), AudioError> {
        if !self.is_running() {
            return Err(AudioError::NotRunning);
        }
        self.shared
            .recorder
            .start_recording(raw_path, processed_path, self.sample_rate)
    }

    pub fn stop_recording(&self) -> Result<RecordingInfo, AudioError> {
        self.shared.recorder.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recorder.is_recording()
    }

    /// Seconds of audio fed to the current or last recording
    pub fn recording_duration_secs(&self) -> f64 {
        self.shared.recorder.duration_secs()
    }

    // Chain state

    pub fn save_chain_state_json(&self) -> Result<String, StateError> {
        serialize_chain_state(&self.shared.chain.save_chain_state())
    }

    /// Rebuild the chain from a snapshot.
    ///
    /// Audio bypasses the chain while it is rebuilt. Plugins the registry
    /// cannot create are skipped. Returns how many plugins were restored.
    pub fn load_chain_state(&self, registry: &PluginRegistry, state: &ChainState) -> usize {
        let was_bypassed = self.shared.chain_bypass.swap(true, Ordering::AcqRel);
        let restored = self.shared.chain.rebuild_from_state(registry, state);
        self.shared.chain_bypass.store(was_bypassed, Ordering::Release);
        restored
    }

    pub fn load_chain_state_json(
        &self,
        registry: &PluginRegistry,
        json: &str,
    ) -> Result<usize, StateError> {
        let state = deserialize_chain_state(json)?;
        Ok(self.load_chain_state(registry, &state))
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
