//! Core audio data types
//!
//! Defines the canonical playback format and the PCM frames that flow from
//! the decoder to the resampler.
//!
//! **Format:**
//! - Canonical samples are f32 (floating point -1.0 to 1.0)
//! - Interleaved: [L, R, L, R, ...] for the canonical stereo layout
//! - Decoded PCM frames stay planar and in their native sample format until
//!   the resampler normalizes them

use std::time::Duration;

/// Default canonical sample rate
pub const CANONICAL_SAMPLE_RATE: u32 = 44100;

/// Default canonical channel count
pub const CANONICAL_CHANNELS: u16 = 2;

/// The single fixed format the playback device consumes.
///
/// The sample format is always interleaved f32. Rate and channel count are
/// fixed for the lifetime of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalFormat {
    /// Frames per second
    pub sample_rate: u32,

    /// Samples per frame
    pub channels: u16,
}

impl CanonicalFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of interleaved f32 values in `frames` frames
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }

    /// Wall-clock duration of `frames` frames
    pub fn duration_of(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

impl Default for CanonicalFormat {
    fn default() -> Self {
        Self::new(CANONICAL_SAMPLE_RATE, CANONICAL_CHANNELS)
    }
}

/// Native sample format tag of a decoded PCM frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
}

/// Planar PCM samples in their native format, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PcmData {
    U8(Vec<Vec<u8>>),
    S16(Vec<Vec<i16>>),
    S32(Vec<Vec<i32>>),
    F32(Vec<Vec<f32>>),
    F64(Vec<Vec<f64>>),
}

impl PcmData {
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            PcmData::U8(_) => SampleFormat::U8,
            PcmData::S16(_) => SampleFormat::S16,
            PcmData::S32(_) => SampleFormat::S32,
            PcmData::F32(_) => SampleFormat::F32,
            PcmData::F64(_) => SampleFormat::F64,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            PcmData::U8(planes) => planes.len(),
            PcmData::S16(planes) => planes.len(),
            PcmData::S32(planes) => planes.len(),
            PcmData::F32(planes) => planes.len(),
            PcmData::F64(planes) => planes.len(),
        }
    }

    /// Frames per channel (length of the shortest plane)
    pub fn frames(&self) -> usize {
        fn shortest<T>(planes: &[Vec<T>]) -> usize {
            planes.iter().map(Vec::len).min().unwrap_or(0)
        }

        match self {
            PcmData::U8(planes) => shortest(planes),
            PcmData::S16(planes) => shortest(planes),
            PcmData::S32(planes) => shortest(planes),
            PcmData::F32(planes) => shortest(planes),
            PcmData::F64(planes) => shortest(planes),
        }
    }

    /// Convert every plane to f32 normalized to [-1.0, 1.0].
    ///
    /// Planes are truncated to [`PcmData::frames`] so all channels have
    /// the same length.
    pub fn to_f32_planar(&self) -> Vec<Vec<f32>> {
        let frames = self.frames();

        fn convert<T: Copy>(planes: &[Vec<T>], frames: usize, f: impl Fn(T) -> f32) -> Vec<Vec<f32>> {
            planes
                .iter()
                .map(|plane| plane[..frames].iter().map(|&s| f(s)).collect())
                .collect()
        }

        match self {
            PcmData::U8(planes) => convert(planes, frames, |s| (s as f32 - 128.0) / 128.0),
            PcmData::S16(planes) => convert(planes, frames, |s| s as f32 / 32768.0),
            PcmData::S32(planes) => convert(planes, frames, |s| (s as f64 / 2_147_483_648.0) as f32),
            PcmData::F32(planes) => convert(planes, frames, |s| s),
            PcmData::F64(planes) => convert(planes, frames, |s| s as f32),
        }
    }
}

/// Format descriptor of a PCM frame: `{sample_format, sample_rate, channel_layout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One burst of decoded PCM, created by the decoder and consumed by the
/// resampler.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    /// Native sample rate
    pub sample_rate: u32,

    /// Planar samples in native format
    pub data: PcmData,
}

impl PcmFrame {
    pub fn new(sample_rate: u32, data: PcmData) -> Self {
        Self { sample_rate, data }
    }

    pub fn spec(&self) -> StreamSpec {
        StreamSpec {
            sample_format: self.data.sample_format(),
            sample_rate: self.sample_rate,
            channels: self.data.channels() as u16,
        }
    }

    /// Frames per channel
    pub fn frame_count(&self) -> usize {
        self.data.frames()
    }
}
