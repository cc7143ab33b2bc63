//! Audio resampling using rubato
//!
//! Normalizes decoded PCM frames to the canonical playback format: f32
//! samples, canonical channel layout and canonical sample rate.
//!
//! The resampler is built once for the stream (from the first decoded
//! frame) and then fed one frame at a time. Rate conversion works on fixed
//! input chunks, so input that does not fill a chunk is carried over to the
//! next frame and drained by [`FrameResampler::flush`] at end of stream.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use thiserror::Error;
use tracing::debug;

use crate::audio::types::{CanonicalFormat, PcmFrame, StreamSpec};
use crate::error::{Error, Result};

/// Input chunk size for rate conversion, in frames
pub const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Per-frame conversion failure. Never fatal: the frame is skipped.
#[derive(Debug, Error)]
pub enum ResampleError {
    /// Frame has no samples
    #[error("Frame contains no samples")]
    EmptyFrame,

    /// Frame does not match the format the resampler was built for
    #[error("Frame format {actual_rate}Hz/{actual_channels}ch does not match resampler input {expected_rate}Hz/{expected_channels}ch")]
    FormatMismatch {
        expected_rate: u32,
        expected_channels: u16,
        actual_rate: u32,
        actual_channels: u16,
    },

    /// Rate conversion engine failed
    #[error("Resampling failed: {0}")]
    Engine(String),
}

/// Resampler collaborator: converts one frame at a time to canonical PCM.
pub trait FrameResampler: Send {
    /// Convert `frame`, appending interleaved canonical samples to `out`.
    /// Returns the number of canonical frames appended, which may be zero
    /// while input is being accumulated.
    fn convert(&mut self, frame: &PcmFrame, out: &mut Vec<f32>) -> std::result::Result<usize, ResampleError>;

    /// Drain any buffered input at end of stream.
    fn flush(&mut self, out: &mut Vec<f32>) -> std::result::Result<usize, ResampleError>;
}

/// Builds the stream's resampler once the source format is known.
pub trait ResamplerFactory: Send {
    /// Fails with [`Error::ResampleSetup`], which is fatal for the stream.
    fn create(&self, source: &StreamSpec, target: &CanonicalFormat) -> Result<Box<dyn FrameResampler>>;
}

/// Factory for [`Resampler`]
#[derive(Debug, Default, Clone, Copy)]
pub struct RubatoFactory;

impl ResamplerFactory for RubatoFactory {
    fn create(&self, source: &StreamSpec, target: &CanonicalFormat) -> Result<Box<dyn FrameResampler>> {
        Ok(Box::new(Resampler::new(source, target)?))
    }
}

/// Stateful resampler using rubato for sample rate conversion.
pub struct Resampler {
    source_rate: u32,
    source_channels: u16,
    target: CanonicalFormat,

    /// None when source and target rates match
    engine: Option<FastFixedIn<f32>>,

    /// Planar input (already in target layout) waiting for a full chunk
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(source: &StreamSpec, target: &CanonicalFormat) -> Result<Self> {
        if source.sample_rate == 0 || source.channels == 0 {
            return Err(Error::ResampleSetup(format!(
                "invalid source format {}Hz/{}ch",
                source.sample_rate, source.channels
            )));
        }
        if target.sample_rate == 0 || target.channels == 0 {
            return Err(Error::ResampleSetup(format!(
                "invalid target format {}Hz/{}ch",
                target.sample_rate, target.channels
            )));
        }

        let engine = if source.sample_rate == target.sample_rate {
            debug!("Sample rate already at {}Hz, no rate conversion", target.sample_rate);
            None
        } else {
            debug!(
                "Resampling from {}Hz to {}Hz ({} -> {} channels)",
                source.sample_rate, target.sample_rate, source.channels, target.channels
            );
            let engine = FastFixedIn::<f32>::new(
                target.sample_rate as f64 / source.sample_rate as f64,
                1.0, // no runtime ratio changes
                PolynomialDegree::Septic,
                RESAMPLER_CHUNK_FRAMES,
                target.channels as usize,
            )
            .map_err(|e| Error::ResampleSetup(e.to_string()))?;
            Some(engine)
        };

        Ok(Self {
            source_rate: source.sample_rate,
            source_channels: source.channels,
            target: *target,
            engine,
            pending: vec![Vec::with_capacity(RESAMPLER_CHUNK_FRAMES * 2); target.channels as usize],
        })
    }

    fn ratio(&self) -> f64 {
        self.target.sample_rate as f64 / self.source_rate as f64
    }

    /// Map source channels onto the target layout.
    ///
    /// Mono is duplicated to every output channel. Otherwise source channel
    /// `i` is mixed into output channel `i % target`, averaging where
    /// several land on the same output.
    fn remap_channels(planar: Vec<Vec<f32>>, target: usize) -> Vec<Vec<f32>> {
        let source = planar.len();
        if source == target {
            return planar;
        }

        let frames = planar.first().map(Vec::len).unwrap_or(0);
        if source == 1 {
            return vec![planar[0].clone(); target];
        }

        let mut output = vec![vec![0.0f32; frames]; target];
        let mut contributors = vec![0usize; target];
        for (ch, plane) in planar.iter().enumerate() {
            let dest = ch % target;
            contributors[dest] += 1;
            for (out, &sample) in output[dest].iter_mut().zip(plane) {
                *out += sample;
            }
        }

        for (plane, &count) in output.iter_mut().zip(&contributors) {
            if count > 1 {
                let scale = 1.0 / count as f32;
                plane.iter_mut().for_each(|s| *s *= scale);
            }
        }
        output
    }

    /// Append planar samples to `out` as interleaved frames
    fn interleave_into(planar: &[Vec<f32>], frames: usize, out: &mut Vec<f32>) {
        out.reserve(frames * planar.len());
        for frame_idx in 0..frames {
            for plane in planar {
                out.push(plane[frame_idx]);
            }
        }
    }

    /// Run every complete chunk in `pending` through the engine
    fn process_pending(&mut self, out: &mut Vec<f32>) -> std::result::Result<usize, ResampleError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(0);
        };

        let mut produced = 0;
        while self.pending[0].len() >= engine.input_frames_next() {
            let needed = engine.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|plane| plane.drain(..needed).collect())
                .collect();

            let resampled = engine
                .process(&chunk, None)
                .map_err(|e| ResampleError::Engine(e.to_string()))?;

            let frames = resampled.first().map(Vec::len).unwrap_or(0);
            Self::interleave_into(&resampled, frames, out);
            produced += frames;
        }
        Ok(produced)
    }
}

impl FrameResampler for Resampler {
    fn convert(&mut self, frame: &PcmFrame, out: &mut Vec<f32>) -> std::result::Result<usize, ResampleError> {
        let spec = frame.spec();
        if spec.sample_rate != self.source_rate || spec.channels != self.source_channels {
            return Err(ResampleError::FormatMismatch {
                expected_rate: self.source_rate,
                expected_channels: self.source_channels,
                actual_rate: spec.sample_rate,
                actual_channels: spec.channels,
            });
        }

        let frames = frame.frame_count();
        if frames == 0 {
            return Err(ResampleError::EmptyFrame);
        }

        let planar = Self::remap_channels(frame.data.to_f32_planar(), self.target.channels as usize);

        if self.engine.is_none() {
            Self::interleave_into(&planar, frames, out);
            return Ok(frames);
        }

        for (pending, plane) in self.pending.iter_mut().zip(planar) {
            pending.extend(plane);
        }
        self.process_pending(out)
    }

    fn flush(&mut self, out: &mut Vec<f32>) -> std::result::Result<usize, ResampleError> {
        let remaining = self.pending[0].len();
        let ratio = self.ratio();
        let Some(engine) = self.engine.as_mut() else {
            return Ok(0);
        };
        if remaining == 0 {
            return Ok(0);
        }

        let mut resampled = engine
            .process_partial(Some(self.pending.as_slice()), None)
            .map_err(|e| ResampleError::Engine(e.to_string()))?;
        self.pending.iter_mut().for_each(Vec::clear);

        // The partial chunk is zero-padded by the engine; keep only the
        // frames that correspond to real input.
        let expected = (remaining as f64 * ratio).ceil() as usize;
        let frames = resampled.first().map(Vec::len).unwrap_or(0).min(expected);
        resampled.iter_mut().for_each(|plane| plane.truncate(frames));

        Self::interleave_into(&resampled, frames, out);
        debug!("Flushed resampler: {} input frames -> {} output frames", remaining, frames);
        Ok(frames)
    }
}
