//! WAV file input/output
//!
//! Reads 16- and 32-bit integer PCM in mono or stereo and writes 16-bit PCM.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use super::error::AudioError;

/// Largest file accepted, in samples across all channels
pub const MAX_WAV_SAMPLES: usize = 100_000_000;

/// Decoded WAV contents, samples interleaved
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl WavData {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Downmix to one channel by averaging left and right
    pub fn into_mono(self) -> Vec<f32> {
        match self.channels {
            2 => self
                .samples
                .chunks_exact(2)
                .map(|frame| (frame[0] + frame[1]) * 0.5)
                .collect(),
            _ => self.samples,
        }
    }

    /// Interleaved stereo, duplicating a mono source
    pub fn into_stereo(self) -> Vec<f32> {
        match self.channels {
            1 => self.samples.iter().flat_map(|&s| [s, s]).collect(),
            _ => self.samples,
        }
    }
}

/// Read a WAV file into normalized `f32` samples
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<WavData, AudioError> {
    let path = path.as_ref();
    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int {
        return Err(AudioError::UnsupportedFormat("floating point samples".to_string()));
    }
    if !(1..=2).contains(&spec.channels) {
        return Err(AudioError::UnsupportedFormat(format!("{} channels", spec.channels)));
    }

    let total = reader.len() as usize;
    if total == 0 {
        return Err(AudioError::EmptyFile);
    }
    if total > MAX_WAV_SAMPLES {
        return Err(AudioError::FileTooLarge(total));
    }

    let samples = match spec.bits_per_sample {
        16 => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<Vec<_>, _>>()?,
        32 => reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2_147_483_648.0))
            .collect::<Result<Vec<_>, _>>()?,
        bits => {
            return Err(AudioError::UnsupportedFormat(format!("{}-bit samples", bits)));
        }
    };

    debug!(
        "Read {} ({} Hz, {} ch, {} samples)",
        path.display(),
        spec.sample_rate,
        spec.channels,
        samples.len()
    );

    Ok(WavData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Header description for 16-bit PCM
pub fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Clamp to [-1, 1] and scale to a signed 16-bit sample
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Write interleaved samples as 16-bit PCM
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<(), AudioError> {
    let mut writer = WavWriter::create(path.as_ref(), pcm16_spec(sample_rate, channels))?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Linear-interpolation resampler
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio) as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(last)];
            let b = input[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_clamps() {
        assert_eq!(to_pcm16(2.0), 32767);
        assert_eq!(to_pcm16(-2.0), -32767);
        assert_eq!(to_pcm16(0.0), 0);
    }

    #[test]
    fn test_downmix_and_upmix() {
        let stereo = WavData {
            samples: vec![1.0, 0.0, 0.5, 0.5],
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(stereo.frames(), 2);
        assert_eq!(stereo.into_mono(), vec![0.5, 0.5]);

        let mono = WavData {
            samples: vec![0.25, -0.25],
            sample_rate: 48000,
            channels: 1,
        };
        assert_eq!(mono.into_stereo(), vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn test_resample_linear() {
        let input = [0.0, 1.0, 0.0, -1.0];
        assert_eq!(resample_linear(&input, 48000, 48000), input.to_vec());

        let up = resample_linear(&input, 24000, 48000);
        assert_eq!(up.len(), 8);
        assert!((up[1] - 0.5).abs() < 1e-6);

        let down = resample_linear(&input, 48000, 24000);
        assert_eq!(down, vec![0.0, 0.0]);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();

        write_wav(&path, &samples, 48000, 1).expect("write");
        let data = read_wav(&path).expect("read");

        assert_eq!(data.sample_rate, 48000);
        assert_eq!(data.channels, 1);
        assert_eq!(data.samples.len(), 480);
        for (a, b) in samples.iter().zip(&data.samples) {
            assert!((a - b).abs() < 1.0 / 16384.0);
        }
    }

    #[test]
    fn test_read_32_bit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wide.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).expect("create");
        for v in [i32::MAX, i32::MIN, 0, 1 << 30] {
            writer.write_sample(v).expect("sample");
        }
        writer.finalize().expect("finalize");

        let data = read_wav(&path).expect("read");
        assert_eq!(data.channels, 2);
        assert_eq!(data.frames(), 2);
        assert!((data.samples[0] - 1.0).abs() < 1e-6);
        assert_eq!(data.samples[1], -1.0);
        assert_eq!(data.samples[3], 0.5);
    }

    #[test]
    fn test_read_rejects_float_and_empty() {
        let dir = tempfile::tempdir().expect("tempdir");

        let float_path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&float_path, spec).expect("create");
        writer.write_sample(0.5f32).expect("sample");
        writer.finalize().expect("finalize");
        assert!(matches!(read_wav(&float_path), Err(AudioError::UnsupportedFormat(_))));

        let empty_path = dir.path().join("empty.wav");
        write_wav(&empty_path, &[], 48000, 1).expect("write");
        assert!(matches!(read_wav(&empty_path), Err(AudioError::EmptyFile)));
    }

    #[test]
    fn test_data_chunk_after_other_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("list.wav");

        let samples: [i16; 4] = [0, 16384, -16384, 32767];
        let mut data = Vec::new();
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(4 + 24 + 12 + 8 + data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&8000u32.to_le_bytes());
        bytes.extend_from_slice(&16000u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(b"INFO");
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        std::fs::write(&path, bytes).expect("write file");

        let wav = read_wav(&path).expect("read");
        assert_eq!(wav.sample_rate, 8000);
        assert_eq!(wav.samples, vec![0.0, 0.5, -0.5, 32767.0 / 32768.0]);
    }
}
