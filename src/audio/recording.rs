//! Dual-file recording
//!
//! Captures the raw mono input and the processed stereo output of the engine
//! to two WAV files. The audio thread only copies samples into two rings; a
//! writer thread drains them to disk.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use hound::WavWriter;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::error::AudioError;
use super::ring_buffer::{ring_buffer, RingReader, RingWriter};
use super::wav::{pcm16_spec, to_pcm16};

/// How often the writer thread drains the rings
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Seconds of raw mono input the ring can hold
const RAW_RING_SECONDS: u32 = 2;
/// Interleaved stereo, so the same time span as the raw ring
const PROCESSED_RING_SECONDS: u32 = 4;

/// Frames interleaved per stack chunk in `feed_audio`
const FEED_CHUNK_FRAMES: usize = 512;
const DRAIN_CHUNK_SAMPLES: usize = 4096;

type FileWriter = WavWriter<BufWriter<File>>;

/// Summary returned when a recording stops
#[derive(Debug, Clone)]
pub struct RecordingInfo {
    pub raw_path: PathBuf,
    pub processed_path: PathBuf,
    /// Frames persisted to each file
    pub frames: u64,
    pub duration_secs: f64,
    /// Samples lost because a ring was full
    pub dropped_samples: u64,
}

/// Producer side, touched by the audio thread
struct Taps {
    raw: RingWriter,
    processed: RingWriter,
}

struct Session {
    stop_tx: Sender<()>,
    handle: JoinHandle<Result<u64, AudioError>>,
    raw_path: PathBuf,
    processed_path: PathBuf,
    sample_rate: u32,
}

/// Records raw input and processed output while the engine runs
pub struct AudioRecorder {
    recording: AtomicBool,
    total_frames: AtomicU64,
    sample_rate: AtomicU32,
    drain_interval: Duration,
    taps: Mutex<Option<Taps>>,
    session: Mutex<Option<Session>>,
}

impl Default for AudioRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_INTERVAL)
    }
}

impl AudioRecorder {
    pub fn new(drain_interval: Duration) -> Self {
        Self {
            recording: AtomicBool::new(false),
            total_frames: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            drain_interval,
            taps: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Open both files and start the writer thread
    pub fn start_recording<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        raw_path: P,
        processed_path: Q,
        sample_rate: u32,
    ) -> Result<(), AudioError> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(AudioError::RecordingError("Already recording".to_string()));
        }
        if sample_rate == 0 {
            return Err(AudioError::RecordingError("Sample rate not set".to_string()));
        }

        let raw_path = raw_path.as_ref().to_path_buf();
        let processed_path = processed_path.as_ref().to_path_buf();

        let raw_writer = create_writer(&raw_path, sample_rate, 1)?;
        let processed_writer = create_writer(&processed_path, sample_rate, 2)?;

        let (raw_tx, raw_rx) = ring_buffer((sample_rate * RAW_RING_SECONDS) as usize);
        let (processed_tx, processed_rx) =
            ring_buffer((sample_rate * PROCESSED_RING_SECONDS) as usize);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = self.drain_interval;
        let handle = std::thread::Builder::new()
            .name("fxrack-recorder".to_string())
            .spawn(move || {
                let mut writer = DiskWriter {
                    raw: (raw_rx, raw_writer),
                    processed: (processed_rx, processed_writer),
                    scratch: vec![0.0; DRAIN_CHUNK_SAMPLES],
                };
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => writer.drain()?,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                writer.finish()
            })?;

        *self.taps.lock() = Some(Taps {
            raw: raw_tx,
            processed: processed_tx,
        });
        *session = Some(Session {
            stop_tx,
            handle,
            raw_path: raw_path.clone(),
            processed_path: processed_path.clone(),
            sample_rate,
        });
        self.total_frames.store(0, Ordering::Relaxed);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.recording.store(true, Ordering::Release);

        info!(
            "Recording started: {} / {}",
            raw_path.display(),
            processed_path.display()
        );
        Ok(())
    }

    /// Queue one block of audio. Called from the audio thread.
    ///
    /// `raw` is the mono input, `left`/`right` the processed output. Never
    /// blocks; if the taps are being swapped the block is skipped.
    pub fn feed_audio(&self, raw: &[f32], left: &[f32], right: &[f32]) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }
        let Some(mut guard) = self.taps.try_lock() else {
            return;
        };
        let Some(taps) = guard.as_mut() else {
            return;
        };

        let frames = raw.len().min(left.len()).min(right.len());
        taps.raw.write(&raw[..frames]);

        let mut interleaved = [0.0f32; FEED_CHUNK_FRAMES * 2];
        for (left, right) in left[..frames]
            .chunks(FEED_CHUNK_FRAMES)
            .zip(right[..frames].chunks(FEED_CHUNK_FRAMES))
        {
            for (frame, (&l, &r)) in interleaved.chunks_exact_mut(2).zip(left.iter().zip(right)) {
                frame[0] = l;
                frame[1] = r;
            }
            taps.processed.write(&interleaved[..left.len() * 2]);
        }

        self.total_frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Stop feeding, flush what is queued, and finalize both headers
    pub fn stop_recording(&self) -> Result<RecordingInfo, AudioError> {
        let Some(session) = self.session.lock().take() else {
            return Err(AudioError::RecordingError("Not recording".to_string()));
        };

        self.recording.store(false, Ordering::Release);
        // Dropping the producers guarantees no write lands after this point
        let dropped_samples = self
            .taps
            .lock()
            .take()
            .map(|taps| taps.raw.overflowed() + taps.processed.overflowed())
            .unwrap_or(0);

        let _ = session.stop_tx.send(());
        let frames = session
            .handle
            .join()
            .map_err(|_| AudioError::RecordingError("Writer thread panicked".to_string()))??;

        if dropped_samples > 0 {
            warn!("Recording dropped {} samples", dropped_samples);
        }

        let duration_secs = frames as f64 / session.sample_rate as f64;
        info!(
            "Recording stopped: {} frames fed, {} written ({:.2}s)",
            self.total_frames.load(Ordering::Relaxed),
            frames,
            duration_secs
        );

        Ok(RecordingInfo {
            raw_path: session.raw_path,
            processed_path: session.processed_path,
            frames,
            duration_secs,
            dropped_samples,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Frames handed to `feed_audio` since recording started
    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Relaxed)
    }

    pub fn duration_secs(&self) -> f64 {
        match self.sample_rate.load(Ordering::Relaxed) {
            0 => 0.0,
            rate => self.total_frames() as f64 / rate as f64,
        }
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            if let Err(e) = self.stop_recording() {
                warn!("Failed to stop recording on drop: {}", e);
            }
        }
    }
}

fn create_writer(path: &Path, sample_rate: u32, channels: u16) -> Result<FileWriter, AudioError> {
    WavWriter::create(path, pcm16_spec(sample_rate, channels)).map_err(|e| {
        AudioError::RecordingError(format!("Failed to create {}: {}", path.display(), e))
    })
}

/// Consumer side, owned by the writer thread
struct DiskWriter {
    raw: (RingReader, FileWriter),
    processed: (RingReader, FileWriter),
    scratch: Vec<f32>,
}

impl DiskWriter {
    fn drain(&mut self) -> Result<(), AudioError> {
        drain_into(&mut self.raw.0, &mut self.raw.1, &mut self.scratch)?;
        drain_into(&mut self.processed.0, &mut self.processed.1, &mut self.scratch)?;
        Ok(())
    }

    /// Final drain, then patch both headers. Returns frames persisted.
    fn finish(mut self) -> Result<u64, AudioError> {
        if let Err(e) = self.drain() {
            error!("Final recording drain failed: {}", e);
            return Err(e);
        }
        let frames = self.raw.1.duration() as u64;
        let processed_frames = self.processed.1.duration() as u64;
        if frames != processed_frames {
            debug!(
                "Raw and processed recordings differ: {} vs {} frames",
                frames, processed_frames
            );
        }
        self.raw.1.finalize()?;
        self.processed.1.finalize()?;
        Ok(frames)
    }
}

fn drain_into(
    reader: &mut RingReader,
    writer: &mut FileWriter,
    scratch: &mut [f32],
) -> Result<(), AudioError> {
    loop {
        let n = reader.read(scratch);
        if n == 0 {
            return Ok(());
        }
        for &sample in &scratch[..n] {
            writer.write_sample(to_pcm16(sample))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_creation() {
        let recorder = AudioRecorder::default();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.total_frames(), 0);
        assert_eq!(recorder.duration_secs(), 0.0);
    }

    #[test]
    fn test_stop_without_start_fails() {
        let recorder = AudioRecorder::default();
        assert!(matches!(
            recorder.stop_recording(),
            Err(AudioError::RecordingError(_))
        ));
    }

    #[test]
    fn test_feed_while_idle_is_ignored() {
        let recorder = AudioRecorder::default();
        recorder.feed_audio(&[0.5; 64], &[0.5; 64], &[0.5; 64]);
        assert_eq!(recorder.total_frames(), 0);
    }

    #[test]
    fn test_record_and_stop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = dir.path().join("raw.wav");
        let processed = dir.path().join("processed.wav");

        let recorder = AudioRecorder::new(Duration::from_millis(5));
        recorder.start_recording(&raw, &processed, 8000).expect("start");
        assert!(recorder.is_recording());
        assert!(matches!(
            recorder.start_recording(&raw, &processed, 8000),
            Err(AudioError::RecordingError(_))
        ));

        // Larger than one interleave chunk
        let input = vec![0.25f32; 1500];
        let left = vec![0.5f32; 1500];
        let right = vec![-0.5f32; 1500];
        recorder.feed_audio(&input, &left, &right);

        let info = recorder.stop_recording().expect("stop");
        assert!(!recorder.is_recording());
        assert_eq!(info.frames, 1500);
        assert_eq!(info.dropped_samples, 0);

        let reader = hound::WavReader::open(&processed).expect("open");
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.expect("sample")).collect();
        assert_eq!(samples.len(), 3000);
        assert_eq!(samples[0], to_pcm16(0.5));
        assert_eq!(samples[1], to_pcm16(-0.5));
        assert_eq!(samples[2999], to_pcm16(-0.5));
    }

    #[test]
    fn test_full_ring_counts_drops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let recorder = AudioRecorder::new(Duration::from_secs(60));
        // 100 Hz gives a 256-sample raw ring
        recorder
            .start_recording(dir.path().join("r.wav"), dir.path().join("p.wav"), 100)
            .expect("start");

        let block = vec![0.1f32; 200];
        recorder.feed_audio(&block, &block, &block);
        recorder.feed_audio(&block, &block, &block);

        let info = recorder.stop_recording().expect("stop");
        assert_eq!(info.frames, 256);
        assert_eq!(info.dropped_samples, 144 + 288);
    }
}
