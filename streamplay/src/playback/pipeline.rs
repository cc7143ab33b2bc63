//! Pipeline driver
//!
//! Owns the lifecycle of one playback session:
//!
//! 1. Validate configuration, open the source, build parser and decoder
//! 2. Build the sample FIFO and split it
//! 3. Start the decode stage on a blocking worker
//! 4. Wait until `prefill_frames` are queued (or decoding finished)
//! 5. Open and start the device session bound to the FIFO reader
//! 6. Poll telemetry until stopped externally, decoding fails, the device
//!    reports a stream error, or a finished stream has drained and the
//!    device has asked for one more period
//! 7. Tear down: stop the device, stop and join the decode stage, release
//!
//! A failure at any step releases whatever was already acquired; the
//! decode worker is always joined before returning.

use std::fs::File;
use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::decoder::{PacketDecoder, SymphoniaDecoder};
use crate::audio::output::{AudioOutput, CpalOutputFactory, OutputFactory};
use crate::audio::parser::{MpegFrameParser, PacketParser};
use crate::audio::resampler::{ResamplerFactory, RubatoFactory};
use crate::audio::types::CanonicalFormat;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::playback::callback::PlaybackCallback;
use crate::playback::decode_stage::{DecodeStage, DecodeSummary};
use crate::playback::fifo::{FifoMonitor, FifoStats, SampleFifo};

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// External stop signal
    Signal,

    /// Source fully decoded and the FIFO drained
    EndOfStream,
}

/// Outcome of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub reason: StopReason,

    /// Decode stage counters
    pub decode: DecodeSummary,

    /// FIFO counters at teardown
    pub fifo: FifoStats,

    /// Underrun events while the device was running and decoding was
    /// still in progress
    pub playback_underruns: u64,

    /// Whether the device was ever started
    pub device_started: bool,
}

type DecodeTask = JoinHandle<Result<DecodeSummary>>;

/// Drives one playback session.
pub struct PipelineDriver {
    config: PipelineConfig,
    output_factory: Box<dyn OutputFactory>,
    resampler_factory: Box<dyn ResamplerFactory>,
}

impl PipelineDriver {
    /// Driver using the default output device and rubato.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            output_factory: Box::new(CpalOutputFactory),
            resampler_factory: Box::new(RubatoFactory),
        }
    }

    pub fn with_output_factory(mut self, factory: Box<dyn OutputFactory>) -> Self {
        self.output_factory = factory;
        self
    }

    pub fn with_resampler_factory(mut self, factory: Box<dyn ResamplerFactory>) -> Self {
        self.resampler_factory = factory;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Play an MPEG audio file until `stop` resolves or the file ends.
    pub async fn play_file<S>(self, path: &Path, stop: S) -> Result<PlaybackSummary>
    where
        S: Future<Output = ()>,
    {
        self.config.validate()?;

        let file = File::open(path).map_err(|source| Error::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Opened source: {}", path.display());

        let parser = Box::new(MpegFrameParser::new(self.config.decode.max_resync_bytes));
        let decoder = Box::new(SymphoniaDecoder::mp3()?);

        self.run(Box::new(file), parser, decoder, stop).await
    }

    /// Run a session over arbitrary collaborators.
    pub async fn run<S>(
        self,
        source: Box<dyn Read + Send>,
        parser: Box<dyn PacketParser>,
        decoder: Box<dyn PacketDecoder>,
        stop: S,
    ) -> Result<PlaybackSummary>
    where
        S: Future<Output = ()>,
    {
        self.config.validate()?;
        let format = self.config.canonical_format();
        let poll = self.config.backpressure_poll();

        let (writer, reader) = SampleFifo::new(self.config.buffer.capacity_frames, format.channels)?.split();
        let monitor = writer.monitor();
        info!(
            "Sample FIFO: {} frames ({:.2}s), prefill {} frames",
            monitor.capacity(),
            format.duration_of(monitor.capacity()).as_secs_f64(),
            self.config.buffer.prefill_frames
        );

        let stage = DecodeStage::new(source, parser, decoder, writer, &self.config)?
            .with_resampler_factory(self.resampler_factory);
        let stop_flag = stage.stop_handle();
        let mut decode_task: DecodeTask = tokio::task::spawn_blocking(move || stage.run());
        let mut decode_result: Option<DecodeSummary> = None;

        tokio::pin!(stop);

        // Prefill
        let mut prefill_poll = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("Stop requested before playback started");
                    let decode = Self::join_decode(decode_task, decode_result, &stop_flag).await?;
                    return Ok(Self::summary(StopReason::Signal, decode, &monitor, 0, false));
                }
                result = &mut decode_task => {
                    decode_result = Some(Self::task_result(result)?);
                    break;
                }
                _ = prefill_poll.tick() => {
                    if monitor.size() >= self.config.buffer.prefill_frames {
                        break;
                    }
                }
            }
        }
        debug!("Prefill complete: {} frames queued", monitor.size());

        // Device session
        let callback = PlaybackCallback::new(reader);
        let mut output = match Self::start_output(self.output_factory.as_ref(), &format, callback) {
            Ok(output) => output,
            Err(e) => {
                error!("Failed to start audio output: {}", e);
                if let Err(decode_err) = Self::join_decode(decode_task, decode_result, &stop_flag).await {
                    warn!("Decode stage also failed during shutdown: {}", decode_err);
                }
                return Err(e);
            }
        };
        info!(
            "Playback started at {}Hz, {} channels",
            format.sample_rate, format.channels
        );

        let mut last_underruns = monitor.stats().underrun_events;
        let mut playback_underruns = 0;
        let mut telemetry = tokio::time::interval(self.config.telemetry_interval());
        let mut drain_poll = tokio::time::interval(poll);
        let mut drained_at_read: Option<u64> = None;

        let reason = loop {
            tokio::select! {
                _ = &mut stop => break StopReason::Signal,
                result = &mut decode_task, if decode_result.is_none() => {
                    match Self::task_result(result) {
                        Ok(summary) => decode_result = Some(summary),
                        Err(e) => {
                            error!("Decode stage failed: {}", e);
                            output.stop();
                            return Err(e);
                        }
                    }
                }
                _ = telemetry.tick() => {
                    let stats = monitor.stats();
                    debug!(
                        "Buffer: {}/{} frames ({:.0}%), written {}, read {}, silenced {}, waits {}",
                        stats.occupied_frames,
                        stats.capacity_frames,
                        stats.fill_percent() * 100.0,
                        stats.frames_written,
                        stats.frames_read,
                        stats.frames_silenced,
                        stats.backpressure_waits
                    );

                    let new_underruns = stats.underrun_events - last_underruns;
                    last_underruns = stats.underrun_events;
                    if new_underruns > 0 && decode_result.is_none() {
                        playback_underruns += new_underruns;
                        warn!("{} buffer underruns during playback ({} frames of silence so far)", new_underruns, stats.frames_silenced);
                    }

                    if output.has_stream_error() {
                        error!("Audio device reported a stream error, stopping");
                        output.stop();
                        Self::join_decode(decode_task, decode_result, &stop_flag).await?;
                        return Err(Error::AudioOutput("device reported a stream error".to_string()));
                    }
                }
                _ = drain_poll.tick(), if decode_result.is_some() => {
                    // The pull that emptied the FIFO may still be queued in
                    // the device; stop once it asks for the next period.
                    let stats = monitor.stats();
                    if stats.occupied_frames == 0 {
                        match drained_at_read {
                            Some(reads) if stats.reads > reads => break StopReason::EndOfStream,
                            Some(_) => {}
                            None => drained_at_read = Some(stats.reads),
                        }
                    }
                }
            }
        };

        // Teardown: device first, then the producer
        match reason {
            StopReason::Signal => info!("Stop requested, shutting down playback"),
            StopReason::EndOfStream => info!("End of stream reached"),
        }
        output.stop();
        let decode = Self::join_decode(decode_task, decode_result, &stop_flag).await?;
        drop(output);

        let summary = Self::summary(reason, decode, &monitor, playback_underruns, true);
        info!(
            "Playback finished: {} frames played, {} underruns, {} frames skipped",
            summary.fifo.frames_read, summary.playback_underruns, summary.decode.frames_skipped
        );
        Ok(summary)
    }

    fn start_output(
        factory: &dyn OutputFactory,
        format: &CanonicalFormat,
        callback: PlaybackCallback,
    ) -> Result<Box<dyn AudioOutput>> {
        let mut output = factory.open(format, callback)?;
        output.start()?;
        Ok(output)
    }

    fn task_result(
        result: std::result::Result<Result<DecodeSummary>, tokio::task::JoinError>,
    ) -> Result<DecodeSummary> {
        result.map_err(|e| Error::Task(e.to_string()))?
    }

    /// Signal the decode stage to stop and wait for it.
    async fn join_decode(
        task: DecodeTask,
        finished: Option<DecodeSummary>,
        stop_flag: &Arc<AtomicBool>,
    ) -> Result<DecodeSummary> {
        stop_flag.store(true, Ordering::Release);
        match finished {
            Some(summary) => Ok(summary),
            None => Self::task_result(task.await),
        }
    }

    fn summary(
        reason: StopReason,
        decode: DecodeSummary,
        monitor: &FifoMonitor,
        playback_underruns: u64,
        device_started: bool,
    ) -> PlaybackSummary {
        PlaybackSummary {
            reason,
            decode,
            fifo: monitor.stats(),
            playback_underruns,
            device_started,
        }
    }
}
