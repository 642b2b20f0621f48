//! Per-callback rendering
//!
//! Everything the output callback does lives here so it can be driven without
//! hardware: pick the input source, meter it, run the chain, tap the recorder,
//! and interleave into the device buffer.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use super::plugin::PluginChain;
use super::recording::AudioRecorder;
use super::ring_buffer::RingReader;

/// Peak at or above this latches the clip indicator
pub(crate) const CLIP_THRESHOLD: f32 = 0.99;
/// Per-callback decay applied to the displayed peak
pub(crate) const PEAK_DECAY: f32 = 0.95;

/// Capture ring reader shared with the output callback
pub(crate) type SharedCapture = Arc<Mutex<RingReader>>;

/// `f32` stored as bits
#[derive(Debug, Default)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub(crate) struct Meters {
    pub input_peak: AtomicF32,
    pub output_peak: AtomicF32,
    pub cpu_load: AtomicF32,
    pub input_clipped: AtomicBool,
    pub output_clipped: AtomicBool,
}

/// Mono WAV source replacing the live input
#[derive(Debug, Default)]
pub(crate) struct WavTransport {
    pub buffer: RwLock<Option<Vec<f32>>>,
    pub position: AtomicUsize,
    pub playing: AtomicBool,
}

/// State shared by the engine, its callbacks, and the host thread
pub(crate) struct EngineShared {
    pub running: AtomicBool,
    pub chain: Arc<PluginChain>,
    pub recorder: Arc<AudioRecorder>,
    pub chain_bypass: AtomicBool,
    /// WAV playback skips the chain
    pub wav_bypass: AtomicBool,
    pub wav: WavTransport,
    pub meters: Meters,
    pub xruns: AtomicU64,
    /// Device playback delay reported by the output callback, in ms
    pub output_delay_ms: AtomicF32,
}

impl EngineShared {
    pub fn new(chain: Arc<PluginChain>, recorder: Arc<AudioRecorder>) -> Self {
        Self {
            running: AtomicBool::new(false),
            chain,
            recorder,
            chain_bypass: AtomicBool::new(false),
            wav_bypass: AtomicBool::new(true),
            wav: WavTransport::default(),
            meters: Meters::default(),
            xruns: AtomicU64::new(0),
            output_delay_ms: AtomicF32::default(),
        }
    }
}

/// Buffers and peak holds owned by the output callback
pub(crate) struct RenderContext {
    shared: Arc<EngineShared>,
    capture: Option<SharedCapture>,
    sample_rate: f32,
    block_frames: usize,
    input: Vec<f32>,
    left: Vec<f32>,
    right: Vec<f32>,
    input_hold: f32,
    output_hold: f32,
}

impl RenderContext {
    pub fn new(
        shared: Arc<EngineShared>,
        capture: Option<SharedCapture>,
        sample_rate: f32,
        block_frames: usize,
    ) -> Self {
        let block_frames = block_frames.max(1);
        Self {
            shared,
            capture,
            sample_rate,
            block_frames,
            input: vec![0.0; block_frames],
            left: vec![0.0; block_frames],
            right: vec![0.0; block_frames],
            input_hold: 0.0,
            output_hold: 0.0,
        }
    }

    /// Fill one device buffer of `channels`-interleaved frames
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if !self.shared.running.load(Ordering::Acquire) {
            output.fill(0.0);
            return;
        }
        // Devices may hand us more than one block at a time
        for chunk in output.chunks_mut(self.block_frames * channels) {
            self.render_block(chunk, channels);
        }
    }

    fn render_block(&mut self, output: &mut [f32], channels: usize) {
        let frames = output.len() / channels;
        if frames == 0 {
            output.fill(0.0);
            return;
        }
        let shared = Arc::clone(&self.shared);
        let used_wav = self.pull_input(frames);

        let input = &self.input[..frames];
        let left = &mut self.left[..frames];
        let right = &mut self.right[..frames];

        let in_peak = peak(input);
        self.input_hold = in_peak.max(self.input_hold * PEAK_DECAY);
        shared.meters.input_peak.store(self.input_hold);
        if in_peak >= CLIP_THRESHOLD {
            shared.meters.input_clipped.store(true, Ordering::Relaxed);
        }

        let bypass = shared.chain_bypass.load(Ordering::Relaxed)
            || (used_wav && shared.wav_bypass.load(Ordering::Relaxed));
        if bypass {
            left.copy_from_slice(input);
            right.copy_from_slice(input);
        } else {
            let started = Instant::now();
            shared.chain.process([input, input], [&mut *left, &mut *right], frames);
            let budget = frames as f64 / self.sample_rate.max(1.0) as f64;
            let load = (started.elapsed().as_secs_f64() / budget).min(1.0);
            shared.meters.cpu_load.store(load as f32);
        }

        let out_peak = peak(left).max(peak(right));
        self.output_hold = out_peak.max(self.output_hold * PEAK_DECAY);
        shared.meters.output_peak.store(self.output_hold);
        if out_peak >= CLIP_THRESHOLD {
            shared.meters.output_clipped.store(true, Ordering::Relaxed);
        }

        shared.recorder.feed_audio(input, left, right);

        if channels == 1 {
            for (o, (l, r)) in output.iter_mut().zip(left.iter().zip(right.iter())) {
                *o = (l + r) * 0.5;
            }
        } else {
            for (frame, (&l, &r)) in output
                .chunks_exact_mut(channels)
                .zip(left.iter().zip(right.iter()))
            {
                frame[0] = l;
                frame[1] = r;
                frame[2..].fill(0.0);
            }
        }
    }

    /// Fill `self.input` from WAV playback or the capture ring.
    ///
    /// Returns true when the WAV source was used.
    fn pull_input(&mut self, frames: usize) -> bool {
        let input = &mut self.input[..frames];
        let wav = &self.shared.wav;

        if wav.playing.load(Ordering::Acquire) {
            if let Some(guard) = wav.buffer.try_read() {
                if let Some(buffer) = guard.as_ref() {
                    let loaded = wav.position.load(Ordering::Acquire);
                    let pos = loaded.min(buffer.len());
                    let n = frames.min(buffer.len() - pos);
                    input[..n].copy_from_slice(&buffer[pos..pos + n]);
                    input[n..].fill(0.0);
                    if advance_playhead(&wav.position, loaded, pos + n) && n < frames {
                        wav.playing.store(false, Ordering::Release);
                    }
                    return true;
                }
            }
        }

        let read = match &self.capture {
            Some(capture) => match capture.try_lock() {
                Some(mut reader) => reader.read(input),
                None => 0,
            },
            None => 0,
        };
        if read < frames {
            input[read..].fill(0.0);
            if self.capture.is_some() {
                self.shared.xruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        false
    }
}

/// Move the playhead from `loaded` to `next` unless a seek replaced it
/// in the meantime. Returns true when this callback's advance was kept.
fn advance_playhead(position: &AtomicUsize, loaded: usize, next: usize) -> bool {
    position
        .compare_exchange(loaded, next, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}
