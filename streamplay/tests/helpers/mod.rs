//! Test helpers for streamplay integration tests
//!
//! - mpeg: synthesize MPEG Layer III byte streams
//! - fakes: scripted decoder, resampler and pull-driven output device

#![allow(dead_code)]

pub mod fakes;
pub mod mpeg;

pub use fakes::{
    BufferingDecoder, FailingDecoder, FailingFactory, PassthroughFactory, PullDeviceFactory,
    FailingSource, StallingSource,
};
pub use mpeg::{
    mpeg_frame, silent_stream, silent_stream_48k, JPEG_APP2_MARKER, MPEG_FRAME_LEN, MPEG_FRAME_LEN_48K,
};

use streamplay::config::PipelineConfig;

/// Small, fast configuration for tests
pub fn test_config(capacity_frames: usize, prefill_frames: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.decode.chunk_bytes = 2048;
    config.decode.low_water_bytes = 512;
    config.buffer.capacity_frames = capacity_frames;
    config.buffer.prefill_frames = prefill_frames;
    config.buffer.backpressure_poll_ms = 1;
    config.telemetry.interval_ms = 10;
    config
}
