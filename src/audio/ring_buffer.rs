//! Single-producer single-consumer sample ring
//!
//! One thread owns the [`RingWriter`], another owns the [`RingReader`]. Neither
//! side blocks or allocates after construction, so both halves are safe to use
//! from an audio callback.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a ring holding at least `min_capacity` samples.
///
/// The capacity is rounded up to the next power of two.
pub fn ring_buffer(min_capacity: usize) -> (RingWriter, RingReader) {
    let capacity = min_capacity.max(1).next_power_of_two();
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
    (
        RingWriter {
            producer,
            overflowed: 0,
        },
        RingReader { consumer },
    )
}

/// Producer half of a sample ring
pub struct RingWriter {
    producer: HeapProd<f32>,
    overflowed: u64,
}

impl RingWriter {
    /// Copy as many samples as fit and return how many were written.
    ///
    /// Samples that do not fit are dropped and counted in [`overflowed`](Self::overflowed).
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        self.overflowed += (samples.len() - written) as u64;
        written
    }

    /// Samples currently queued
    pub fn available(&self) -> usize {
        self.producer.occupied_len()
    }

    /// Samples that can be written without dropping
    pub fn free(&self) -> usize {
        self.producer.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    /// Total samples dropped because the ring was full
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }
}

/// Consumer half of a sample ring
pub struct RingReader {
    consumer: HeapCons<f32>,
}

impl RingReader {
    /// Copy up to `out.len()` samples in FIFO order and return how many were read.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }

    /// Samples ready to be read
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    /// Discard everything queued.
    ///
    /// Only the consumer side may reset, so this never races with the writer.
    pub fn reset(&mut self) {
        self.consumer.clear();
    }
}
