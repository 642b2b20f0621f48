//! Recording tests
//!
//! Drives the recorder directly, the way the audio callback would, and
//! checks the files it leaves behind.

use std::time::Duration;

use fxrack::AudioRecorder;

/// Byte length stored in the `data` chunk header
fn data_chunk_len(bytes: &[u8]) -> u32 {
    let pos = bytes
        .windows(4)
        .position(|w| w == b"data")
        .expect("data chunk");
    u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap())
}

/// Test: Headers match the persisted audio
/// Given a recorder fed one second of audio at 48 kHz in 480-frame blocks
/// When recording stops
/// Then the raw data chunk holds 96000 bytes and the processed one 192000
#[test]
fn test_wav_headers_sized_from_frames() {
    let dir = tempfile::tempdir().unwrap();
    let raw_path = dir.path().join("raw.wav");
    let processed_path = dir.path().join("processed.wav");

    let recorder = AudioRecorder::new(Duration::from_millis(5));
    recorder
        .start_recording(&raw_path, &processed_path, 48000)
        .unwrap();

    let raw: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0) - 0.5).collect();
    let left = vec![0.25f32; 480];
    let right = vec![-0.25f32; 480];
    for block in 0..100 {
        recorder.feed_audio(&raw, &left, &right);
        if block % 10 == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    let info = recorder.stop_recording().unwrap();
    assert_eq!(info.frames, 48000);
    assert_eq!(info.dropped_samples, 0);
    assert!((info.duration_secs - 1.0).abs() < 1e-9);

    let raw_bytes = std::fs::read(&raw_path).unwrap();
    let processed_bytes = std::fs::read(&processed_path).unwrap();
    assert_eq!(data_chunk_len(&raw_bytes), 96000);
    assert_eq!(data_chunk_len(&processed_bytes), 192000);

    let mut reader = hound::WavReader::open(&processed_path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().bits_per_sample, 16);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert!(samples[0] > 0 && samples[1] < 0);
}

/// Test: Recorder can be restarted
/// Given a finished recording
/// When a second recording is started and stopped
/// Then the frame counter starts again from zero
#[test]
fn test_restart_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = AudioRecorder::default();
    let block = vec![0.1f32; 128];

    recorder
        .start_recording(dir.path().join("a.wav"), dir.path().join("b.wav"), 44100)
        .unwrap();
    recorder.feed_audio(&block, &block, &block);
    assert_eq!(recorder.stop_recording().unwrap().frames, 128);

    recorder
        .start_recording(dir.path().join("c.wav"), dir.path().join("d.wav"), 44100)
        .unwrap();
    assert_eq!(recorder.total_frames(), 0);
    recorder.feed_audio(&block[..64], &block[..64], &block[..64]);
    let info = recorder.stop_recording().unwrap();
    assert_eq!(info.frames, 64);
    assert!(!recorder.is_recording());
}

/// Test: Starting twice is rejected
/// Given an active recording
/// When another start is requested
/// Then it fails and the first recording continues
#[test]
fn test_double_start_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = AudioRecorder::default();
    recorder
        .start_recording(dir.path().join("a.wav"), dir.path().join("b.wav"), 48000)
        .unwrap();

    assert!(recorder
        .start_recording(dir.path().join("c.wav"), dir.path().join("d.wav"), 48000)
        .is_err());
    assert!(recorder.is_recording());
    recorder.stop_recording().unwrap();
}
