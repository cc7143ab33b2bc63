//! Decode stage: raw bytes to canonical PCM in the sample FIFO
//!
//! Runs on a blocking worker thread. One pass of the loop:
//!
//! 1. **Refill** the bitstream cursor when it drops below the low-water
//!    mark (or when the parser cannot progress without more bytes).
//! 2. **Parse** one step; a completed packet goes to the decoder.
//! 3. **Decode** and drain every frame the decoder has for that packet.
//! 4. **Resample** each frame to the canonical format. A frame that fails
//!    to convert is skipped; failing to build the resampler is fatal.
//! 5. **Publish** into the FIFO. When the FIFO is full the stage sleeps
//!    for the backpressure interval and retries, checking the stop flag
//!    between attempts. Samples are never dropped.
//!
//! At end of source the parser gets the leftover bytes, the decoder gets
//! the flush marker, and the resampler tail is drained.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::cursor::{BitstreamCursor, Refill};
use crate::audio::decoder::{DecoderOutput, PacketDecoder};
use crate::audio::parser::{Packet, PacketParser};
use crate::audio::resampler::{FrameResampler, ResamplerFactory, RubatoFactory};
use crate::audio::types::{CanonicalFormat, PcmFrame};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::playback::fifo::FifoWriter;

/// How the stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Source exhausted and everything flushed into the FIFO
    Completed,

    /// Stop flag observed before the source was exhausted
    Stopped,
}

/// Counters reported when the stage ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub outcome: DecodeOutcome,

    /// Raw bytes read from the source
    pub bytes_read: u64,

    /// Packets submitted to the decoder (excluding the flush marker)
    pub packets: u64,

    /// PCM frames received from the decoder
    pub frames_decoded: u64,

    /// PCM frames skipped after a conversion failure
    pub frames_skipped: u64,

    /// Canonical frames written to the FIFO
    pub frames_published: u64,

    /// Times the stage waited on a full FIFO
    pub backpressure_waits: u64,
}

impl Default for DecodeSummary {
    fn default() -> Self {
        Self {
            outcome: DecodeOutcome::Completed,
            bytes_read: 0,
            packets: 0,
            frames_decoded: 0,
            frames_skipped: 0,
            frames_published: 0,
            backpressure_waits: 0,
        }
    }
}

/// Whether the loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stopped,
}

/// Producer side of the pipeline
pub struct DecodeStage {
    source: Box<dyn Read + Send>,
    cursor: BitstreamCursor,
    parser: Box<dyn PacketParser>,
    decoder: Box<dyn PacketDecoder>,
    resampler_factory: Box<dyn ResamplerFactory>,

    /// Built from the first decoded frame
    resampler: Option<Box<dyn FrameResampler>>,

    writer: FifoWriter,
    format: CanonicalFormat,

    chunk_bytes: usize,
    low_water_bytes: usize,
    backpressure_poll: Duration,

    stop: Arc<AtomicBool>,

    /// Reused conversion output
    scratch: Vec<f32>,

    summary: DecodeSummary,
}

impl DecodeStage {
    /// Assemble a stage writing into `writer`.
    ///
    /// Uses the rubato resampler unless another factory is supplied with
    /// [`with_resampler_factory`](Self::with_resampler_factory).
    pub fn new(
        source: Box<dyn Read + Send>,
        parser: Box<dyn PacketParser>,
        decoder: Box<dyn PacketDecoder>,
        writer: FifoWriter,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let format = config.canonical_format();
        if writer.channels() != format.channels {
            return Err(Error::Config(format!(
                "FIFO has {} channels but canonical format has {}",
                writer.channels(),
                format.channels
            )));
        }

        Ok(Self {
            source,
            cursor: BitstreamCursor::with_capacity(config.decode.chunk_bytes * 2),
            parser,
            decoder,
            resampler_factory: Box::new(RubatoFactory),
            resampler: None,
            writer,
            format,
            chunk_bytes: config.decode.chunk_bytes,
            low_water_bytes: config.decode.low_water_bytes,
            backpressure_poll: config.backpressure_poll(),
            stop: Arc::new(AtomicBool::new(false)),
            scratch: Vec::new(),
            summary: DecodeSummary::default(),
        })
    }

    pub fn with_resampler_factory(mut self, factory: Box<dyn ResamplerFactory>) -> Self {
        self.resampler_factory = factory;
        self
    }

    /// Flag that makes [`run`](Self::run) return with
    /// [`DecodeOutcome::Stopped`] at the next check.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run until the source is exhausted, a fatal error occurs, or the stop
    /// flag is set.
    pub fn run(mut self) -> Result<DecodeSummary> {
        info!("Decode stage started");
        let mut end_of_source = false;

        loop {
            if self.stop_requested() {
                return Ok(self.finish(DecodeOutcome::Stopped));
            }

            if !end_of_source && self.cursor.remaining() < self.low_water_bytes {
                end_of_source = self.refill()?;
                continue;
            }

            let output = self.parser.parse(self.cursor.bytes())?;
            self.cursor.advance(output.consumed)?;

            if let Some(packet) = output.packet {
                if self.decode_packet(Some(&packet))? == Flow::Stopped {
                    return Ok(self.finish(DecodeOutcome::Stopped));
                }
                continue;
            }

            if output.consumed == 0 {
                if end_of_source {
                    break;
                }
                end_of_source = self.refill()?;
            }
        }

        if self.flush()? == Flow::Stopped {
            return Ok(self.finish(DecodeOutcome::Stopped));
        }
        Ok(self.finish(DecodeOutcome::Completed))
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn finish(mut self, outcome: DecodeOutcome) -> DecodeSummary {
        self.summary.outcome = outcome;
        let s = &self.summary;
        info!(
            "Decode stage {:?}: {} packets, {} frames decoded, {} skipped, {} canonical frames published",
            outcome, s.packets, s.frames_decoded, s.frames_skipped, s.frames_published
        );
        self.summary
    }

    /// Read one chunk. Returns true at end of source.
    fn refill(&mut self) -> Result<bool> {
        loop {
            match self
                .cursor
                .refill(&mut *self.source, self.chunk_bytes)
                .map_err(Error::SourceRead)?
            {
                Refill::Read(n) => {
                    self.summary.bytes_read += n as u64;
                    debug!("Read {} bytes, {} unparsed", n, self.cursor.remaining());
                    return Ok(false);
                }
                Refill::EndOfSource => {
                    debug!(
                        "End of source after {} bytes, {} unparsed",
                        self.summary.bytes_read,
                        self.cursor.remaining()
                    );
                    return Ok(true);
                }
                Refill::Retry => {
                    if self.stop_requested() {
                        return Ok(false);
                    }
                    std::thread::sleep(self.backpressure_poll);
                }
            }
        }
    }

    /// End of source: leftover bytes, decoder flush, resampler tail.
    fn flush(&mut self) -> Result<Flow> {
        if let Some(packet) = self.parser.finish(self.cursor.bytes()) {
            if self.decode_packet(Some(&packet))? == Flow::Stopped {
                return Ok(Flow::Stopped);
            }
        }

        if self.decode_packet(None)? == Flow::Stopped {
            return Ok(Flow::Stopped);
        }

        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Flow::Continue);
        };

        let mut samples = std::mem::take(&mut self.scratch);
        samples.clear();
        let flow = match resampler.flush(&mut samples) {
            Ok(_) => self.publish(&samples)?,
            Err(e) => {
                warn!("Failed to drain resampler tail: {}", e);
                Flow::Continue
            }
        };
        self.scratch = samples;
        Ok(flow)
    }

    /// Submit a packet (or the flush marker) and drain the decoder.
    fn decode_packet(&mut self, packet: Option<&Packet>) -> Result<Flow> {
        if packet.is_some() {
            self.summary.packets += 1;
        }
        self.decoder.send_packet(packet)?;

        loop {
            match self.decoder.receive_frame()? {
                DecoderOutput::Frame(frame) => {
                    self.summary.frames_decoded += 1;
                    if self.process_frame(&frame)? == Flow::Stopped {
                        return Ok(Flow::Stopped);
                    }
                }
                DecoderOutput::NeedMoreInput | DecoderOutput::EndOfStream => return Ok(Flow::Continue),
            }
        }
    }

    /// Resample one decoded frame and publish it.
    fn process_frame(&mut self, frame: &PcmFrame) -> Result<Flow> {
        if self.resampler.is_none() {
            let spec = frame.spec();
            info!(
                "Source format: {:?}, {}Hz, {} channels; canonical: {}Hz, {} channels",
                spec.sample_format, spec.sample_rate, spec.channels, self.format.sample_rate, self.format.channels
            );
            self.resampler = Some(self.resampler_factory.create(&spec, &self.format)?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Flow::Continue);
        };

        let mut samples = std::mem::take(&mut self.scratch);
        samples.clear();
        let flow = match resampler.convert(frame, &mut samples) {
            Ok(_) => self.publish(&samples)?,
            Err(e) => {
                self.summary.frames_skipped += 1;
                warn!("Skipping frame {}: {}", self.summary.frames_decoded, e);
                Flow::Continue
            }
        };
        self.scratch = samples;
        Ok(flow)
    }

    /// Write all of `samples`, waiting for space as needed.
    fn publish(&mut self, samples: &[f32]) -> Result<Flow> {
        let channels = self.format.channels as usize;
        let mut offset = 0;

        while offset < samples.len() {
            let written = self.writer.write(&samples[offset..])?;
            offset += written * channels;
            self.summary.frames_published += written as u64;

            if offset < samples.len() {
                if self.stop_requested() {
                    return Ok(Flow::Stopped);
                }
                self.writer.record_backpressure_wait();
                self.summary.backpressure_waits += 1;
                std::thread::sleep(self.backpressure_poll);
            }
        }

        Ok(Flow::Continue)
    }
}
