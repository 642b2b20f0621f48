//! Sample ring tests
//!
//! FIFO behaviour under arbitrary write/read interleavings, single-threaded
//! against a model and across two threads.

use std::collections::VecDeque;

use fxrack::audio::ring_buffer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Test: Ring matches a FIFO model
/// Given a ring of random capacity
/// When random-sized writes and reads are interleaved
/// Then each write stores min(requested, free) samples
/// And reads return exactly the written sequence, in order
#[test]
fn test_random_interleavings_match_model() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..50 {
        let (mut writer, mut reader) = ring_buffer(rng.gen_range(1..=300));
        let capacity = writer.capacity();
        let mut model = VecDeque::new();
        let mut next = 0u32;

        for _ in 0..500 {
            if rng.gen_bool(0.5) {
                let len = rng.gen_range(0..=capacity + 8);
                let data: Vec<f32> = (0..len).map(|i| (next + i as u32) as f32).collect();
                let expected = len.min(capacity - model.len());

                assert_eq!(writer.free(), capacity - model.len());
                let written = writer.write(&data);
                assert_eq!(written, expected);

                model.extend(&data[..written]);
                next += written as u32;
            } else {
                let mut out = vec![0.0; rng.gen_range(0..=capacity + 8)];
                let read = reader.read(&mut out);
                assert_eq!(read, out.len().min(model.len()));
                for sample in &out[..read] {
                    assert_eq!(Some(*sample), model.pop_front());
                }
            }
            assert_eq!(reader.available(), model.len());
        }
    }
}

/// Test: Concurrent producer and consumer
/// Given a writer thread and a reader thread
/// When the writer pushes a counting sequence as space allows
/// Then the reader sees every value once, in order
#[test]
fn test_two_threads_preserve_order() {
    const TOTAL: u32 = 200_000;
    let (mut writer, mut reader) = ring_buffer(1024);

    let producer = std::thread::spawn(move || {
        let mut next = 0u32;
        let mut chunk = [0.0f32; 100];
        while next < TOTAL {
            let len = chunk.len().min((TOTAL - next) as usize);
            for (i, slot) in chunk[..len].iter_mut().enumerate() {
                *slot = (next + i as u32) as f32;
            }
            next += writer.write(&chunk[..len]) as u32;
            std::thread::yield_now();
        }
    });

    let mut expected = 0u32;
    let mut out = [0.0f32; 77];
    while expected < TOTAL {
        let read = reader.read(&mut out);
        for &sample in &out[..read] {
            assert_eq!(sample, expected as f32);
            expected += 1;
        }
        if read == 0 {
            std::thread::yield_now();
        }
    }

    producer.join().unwrap();
    assert_eq!(reader.available(), 0);
}
