//! Real-time playback callback
//!
//! Runs on the device's audio thread. Every pull is answered with exactly
//! the requested number of frames: buffered audio first, silence for the
//! rest. Nothing here blocks, allocates, logs or returns an error; the
//! driver learns about underruns by sampling the FIFO counters.

use crate::playback::fifo::{FifoMonitor, FifoReader};

/// Consumer side of the pipeline, owned by the device session.
pub struct PlaybackCallback {
    reader: FifoReader,
}

impl PlaybackCallback {
    pub fn new(reader: FifoReader) -> Self {
        Self { reader }
    }

    /// Fill `dest` (interleaved canonical frames) completely.
    #[inline]
    pub fn on_device_pull(&mut self, dest: &mut [f32]) {
        self.reader.read(dest);
    }

    pub fn channels(&self) -> u16 {
        self.reader.channels()
    }

    pub fn monitor(&self) -> FifoMonitor {
        self.reader.monitor()
    }
}
