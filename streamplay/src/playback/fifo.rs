//! Bounded sample FIFO between the decode stage and the device callback
//!
//! Lock-free single-producer single-consumer ring buffer of interleaved
//! canonical f32 samples, built on `ringbuf`.
//!
//! - Producer ([`FifoWriter`], decode stage): appends whole frames only.
//!   A write that does not fit is cut at a frame boundary and the short
//!   count is returned; the caller owns the backpressure policy.
//! - Consumer ([`FifoReader`], device callback): always fills the whole
//!   destination slot. Frames that are not available are written as
//!   silence and counted as an underrun. No locks, no allocation, no
//!   logging on this side.
//! - Observer ([`FifoMonitor`], driver): samples counters for telemetry.
//!
//! Capacity is fixed at construction and never changes.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from FIFO construction and misuse
#[derive(Debug, Error)]
pub enum FifoError {
    /// Sample count is not a multiple of the channel count
    #[error("Write of {len} samples is not a whole number of {channels}-channel frames")]
    MisalignedWrite { len: usize, channels: usize },

    /// Zero capacity or zero channels
    #[error("Invalid buffer geometry: {capacity_frames} frames x {channels} channels")]
    InvalidCapacity { capacity_frames: usize, channels: u16 },
}

/// Counters shared by both halves and the monitor
#[derive(Debug)]
struct FifoShared {
    capacity_frames: usize,
    channels: usize,

    /// Frames accepted by the writer
    frames_written: AtomicU64,

    /// Frames delivered to the reader (excluding silence)
    frames_read: AtomicU64,

    /// Frames the reader had to fill with silence
    frames_silenced: AtomicU64,

    /// Reads that came up short
    underrun_events: AtomicU64,

    /// Total reads (one per device pull)
    reads: AtomicU64,

    /// Writes cut short because the buffer was full
    full_events: AtomicU64,

    /// Times the producer backed off waiting for space
    backpressure_waits: AtomicU64,
}

/// Snapshot of FIFO counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoStats {
    pub capacity_frames: usize,
    pub occupied_frames: usize,
    pub frames_written: u64,
    pub frames_read: u64,
    pub frames_silenced: u64,
    pub underrun_events: u64,
    pub reads: u64,
    pub full_events: u64,
    pub backpressure_waits: u64,
}

impl FifoStats {
    /// Buffer fill percentage (0.0 to 1.0)
    pub fn fill_percent(&self) -> f32 {
        if self.capacity_frames == 0 {
            return 0.0;
        }
        self.occupied_frames as f32 / self.capacity_frames as f32
    }
}

/// Result of a single read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Frames copied from the buffer
    pub frames_read: usize,

    /// Frames written as silence because the buffer ran dry
    pub frames_silenced: usize,
}

impl ReadOutcome {
    pub fn is_underrun(&self) -> bool {
        self.frames_silenced > 0
    }
}

/// Bounded FIFO of interleaved canonical frames.
///
/// Create it, then [`split`](Self::split) it into the writer handed to the
/// decode stage and the reader handed to the device session.
pub struct SampleFifo {
    buffer: HeapRb<f32>,
    shared: Arc<FifoShared>,
}

impl SampleFifo {
    /// Create a FIFO holding `capacity_frames` frames of `channels` samples.
    pub fn new(capacity_frames: usize, channels: u16) -> Result<Self, FifoError> {
        if capacity_frames == 0 || channels == 0 {
            return Err(FifoError::InvalidCapacity {
                capacity_frames,
                channels,
            });
        }

        debug!(
            "Creating sample FIFO with capacity: {} frames x {} channels",
            capacity_frames, channels
        );

        Ok(Self {
            buffer: HeapRb::new(capacity_frames * channels as usize),
            shared: Arc::new(FifoShared {
                capacity_frames,
                channels: channels as usize,
                frames_written: AtomicU64::new(0),
                frames_read: AtomicU64::new(0),
                frames_silenced: AtomicU64::new(0),
                underrun_events: AtomicU64::new(0),
                reads: AtomicU64::new(0),
                full_events: AtomicU64::new(0),
                backpressure_waits: AtomicU64::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn channels(&self) -> u16 {
        self.shared.channels as u16
    }

    /// Split into producer and consumer halves
    ///
    /// Each half can be moved to a different thread.
    pub fn split(self) -> (FifoWriter, FifoReader) {
        let (producer, consumer) = self.buffer.split();

        let writer = FifoWriter {
            producer,
            shared: Arc::clone(&self.shared),
        };
        let reader = FifoReader {
            consumer,
            shared: self.shared,
        };
        (writer, reader)
    }
}

/// Producer half (decode stage)
pub struct FifoWriter {
    producer: HeapProd<f32>,
    shared: Arc<FifoShared>,
}

impl FifoWriter {
    /// Append as many whole frames from `samples` as fit.
    ///
    /// Returns the number of frames written, which is less than
    /// `samples.len() / channels` when the buffer is full. Never writes a
    /// partial frame.
    pub fn write(&mut self, samples: &[f32]) -> Result<usize, FifoError> {
        let channels = self.shared.channels;
        if samples.len() % channels != 0 {
            return Err(FifoError::MisalignedWrite {
                len: samples.len(),
                channels,
            });
        }

        let frames = samples.len() / channels;
        let writable = (self.producer.vacant_len() / channels).min(frames);
        let pushed = if writable > 0 {
            self.producer.push_slice(&samples[..writable * channels]) / channels
        } else {
            0
        };

        if pushed < frames {
            self.shared.full_events.fetch_add(1, Ordering::Relaxed);
        }
        self.shared
            .frames_written
            .fetch_add(pushed as u64, Ordering::Relaxed);

        Ok(pushed)
    }

    /// Frames currently buffered
    pub fn size(&self) -> usize {
        self.producer.occupied_len() / self.shared.channels
    }

    /// Frames that can be written right now
    pub fn vacant(&self) -> usize {
        self.producer.vacant_len() / self.shared.channels
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn channels(&self) -> u16 {
        self.shared.channels as u16
    }

    /// Record that the producer backed off waiting for space
    pub fn record_backpressure_wait(&self) {
        self.shared.backpressure_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn monitor(&self) -> FifoMonitor {
        FifoMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Consumer half (device callback)
pub struct FifoReader {
    consumer: HeapCons<f32>,
    shared: Arc<FifoShared>,
}

impl FifoReader {
    /// Fill `dest` completely.
    ///
    /// Copies `dest.len() / channels` frames if available; the unread tail
    /// (and any trailing partial frame slot) is zero-filled. Real-time safe:
    /// no locks, no allocation, no logging.
    pub fn read(&mut self, dest: &mut [f32]) -> ReadOutcome {
        let channels = self.shared.channels;
        let requested = dest.len() / channels;
        let available = self.consumer.occupied_len() / channels;
        let frames = requested.min(available);

        let popped = self.consumer.pop_slice(&mut dest[..frames * channels]);
        dest[popped..].fill(0.0);

        let frames_read = popped / channels;
        let frames_silenced = requested - frames_read;

        // `reads` is visible to anyone who observes the new `frames_read`
        self.shared.reads.fetch_add(1, Ordering::Relaxed);
        self.shared
            .frames_read
            .fetch_add(frames_read as u64, Ordering::Release);
        if frames_silenced > 0 {
            self.shared.underrun_events.fetch_add(1, Ordering::Relaxed);
            self.shared
                .frames_silenced
                .fetch_add(frames_silenced as u64, Ordering::Relaxed);
        }

        ReadOutcome {
            frames_read,
            frames_silenced,
        }
    }

    /// Frames currently buffered
    pub fn size(&self) -> usize {
        self.consumer.occupied_len() / self.shared.channels
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn channels(&self) -> u16 {
        self.shared.channels as u16
    }

    pub fn monitor(&self) -> FifoMonitor {
        FifoMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read-only view of FIFO counters, safe to poll from any thread
#[derive(Debug, Clone)]
pub struct FifoMonitor {
    shared: Arc<FifoShared>,
}

impl FifoMonitor {
    /// Frames currently buffered, derived from the write/read totals and
    /// clamped to `[0, capacity]`.
    pub fn size(&self) -> usize {
        let read = self.shared.frames_read.load(Ordering::Acquire);
        let written = self.shared.frames_written.load(Ordering::Acquire);
        (written.saturating_sub(read) as usize).min(self.shared.capacity_frames)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity_frames
    }

    pub fn stats(&self) -> FifoStats {
        let s = &self.shared;
        FifoStats {
            capacity_frames: s.capacity_frames,
            occupied_frames: self.size(),
            frames_written: s.frames_written.load(Ordering::Relaxed),
            frames_read: s.frames_read.load(Ordering::Relaxed),
            frames_silenced: s.frames_silenced.load(Ordering::Relaxed),
            underrun_events: s.underrun_events.load(Ordering::Relaxed),
            reads: s.reads.load(Ordering::Relaxed),
            full_events: s.full_events.load(Ordering::Relaxed),
            backpressure_waits: s.backpressure_waits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_basic() {
        let (mut writer, mut reader) = SampleFifo::new(128, 2).unwrap().split();

        assert_eq!(writer.write(&[0.1, 0.2, 0.3, 0.4]).unwrap(), 2);
        assert_eq!(writer.size(), 2);
        assert_eq!(reader.size(), 2);

        let mut dest = [9.0f32; 4];
        let outcome = reader.read(&mut dest);
        assert_eq!(outcome.frames_read, 2);
        assert!(!outcome.is_underrun());
        assert_eq!(dest, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(reader.size(), 0);
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(matches!(SampleFifo::new(0, 2), Err(FifoError::InvalidCapacity { .. })));
        assert!(matches!(SampleFifo::new(16, 0), Err(FifoError::InvalidCapacity { .. })));
    }

    #[test]
    fn test_misaligned_write_rejected() {
        let (mut writer, _reader) = SampleFifo::new(16, 2).unwrap().split();
        let err = writer.write(&[0.1, 0.2, 0.3]).unwrap_err();
        assert!(matches!(err, FifoError::MisalignedWrite { len: 3, channels: 2 }));
        assert_eq!(writer.size(), 0);
    }

    #[test]
    fn test_write_stops_at_capacity() {
        let (mut writer, _reader) = SampleFifo::new(4, 2).unwrap().split();
        let samples = vec![0.5f32; 12]; // 6 frames

        assert_eq!(writer.write(&samples).unwrap(), 4);
        assert_eq!(writer.vacant(), 0);
        assert_eq!(writer.write(&samples).unwrap(), 0);

        let stats = writer.monitor().stats();
        assert_eq!(stats.frames_written, 4);
        assert_eq!(stats.full_events, 2);
        assert_eq!(stats.occupied_frames, 4);
        assert_eq!(stats.fill_percent(), 1.0);
    }

    #[test]
    fn test_underrun_zero_fills_tail() {
        let (mut writer, mut reader) = SampleFifo::new(16, 2).unwrap().split();
        writer.write(&[0.7, 0.8]).unwrap();

        let mut dest = [9.0f32; 7]; // 3 frames + stray sample slot
        let outcome = reader.read(&mut dest);
        assert_eq!(outcome, ReadOutcome { frames_read: 1, frames_silenced: 2 });
        assert_eq!(dest, [0.7, 0.8, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let stats = reader.monitor().stats();
        assert_eq!(stats.underrun_events, 1);
        assert_eq!(stats.frames_silenced, 2);
        assert_eq!(stats.reads, 1);
    }
}
