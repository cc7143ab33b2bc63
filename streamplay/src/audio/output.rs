//! Audio output using cpal
//!
//! The device session owns the [`PlaybackCallback`] (and through it the
//! FIFO reader) for its whole lifetime. The device pulls on its own clock;
//! the session only starts, stops and reports stream errors.

use crate::audio::types::CanonicalFormat;
use crate::error::{Error, Result};
use crate::playback::callback::PlaybackCallback;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Device session collaborator.
///
/// Not `Send`: some backends pin the stream to the thread that built it.
pub trait AudioOutput {
    /// Begin pulling from the callback
    fn start(&mut self) -> Result<()>;

    /// Stop pulling. After this returns the callback is not invoked again.
    fn stop(&mut self);

    /// True once the device reported a stream error
    fn has_stream_error(&self) -> bool {
        false
    }
}

/// Opens a device session bound to a playback callback.
pub trait OutputFactory {
    fn open(&self, format: &CanonicalFormat, callback: PlaybackCallback) -> Result<Box<dyn AudioOutput>>;
}

/// Opens the system default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutputFactory;

impl OutputFactory for CpalOutputFactory {
    fn open(&self, format: &CanonicalFormat, callback: PlaybackCallback) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalOutput::open(format, callback)?))
    }
}

/// cpal device session
pub struct CpalOutput {
    stream: Stream,
    playing: bool,

    /// Stream error flag - set by the cpal error callback
    error_flag: Arc<AtomicBool>,

    /// Count of stream errors reported
    error_count: Arc<AtomicU32>,
}

impl CpalOutput {
    /// Open the default output device in the canonical format and bind
    /// `callback` to it. The stream is built paused.
    pub fn open(format: &CanonicalFormat, callback: PlaybackCallback) -> Result<Self> {
        if callback.channels() != format.channels {
            return Err(Error::AudioOutput(format!(
                "Callback carries {} channels but device format has {}",
                callback.channels(),
                format.channels
            )));
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using default audio device: {}", name);

        let config = Self::find_config(&device, format)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format=f32, buffer_size={:?}",
            config.sample_rate.0, config.channels, config.buffer_size
        );

        let error_flag = Arc::new(AtomicBool::new(false));
        let error_count = Arc::new(AtomicU32::new(0));
        let stream = Self::build_stream_f32(&device, &config, callback, &error_flag, &error_count)?;

        // Some backends start streams on creation
        if let Err(e) = stream.pause() {
            debug!("Could not pause freshly built stream: {}", e);
        }

        Ok(Self {
            stream,
            playing: false,
            error_flag,
            error_count,
        })
    }

    /// Find a device configuration matching the canonical format exactly.
    ///
    /// The canonical format is fixed for the session; a device that cannot
    /// play it is a construction failure.
    fn find_config(device: &Device, format: &CanonicalFormat) -> Result<StreamConfig> {
        let supported_configs = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

        let mut matching = supported_configs.filter(|config| {
            config.channels() == format.channels
                && config.min_sample_rate().0 <= format.sample_rate
                && config.max_sample_rate().0 >= format.sample_rate
                && config.sample_format() == SampleFormat::F32
        });

        match matching.next() {
            Some(supported) => Ok(supported
                .with_sample_rate(cpal::SampleRate(format.sample_rate))
                .config()),
            None => Err(Error::AudioOutput(format!(
                "Device does not support {}Hz/{}ch f32 output",
                format.sample_rate, format.channels
            ))),
        }
    }

    fn build_stream_f32(
        device: &Device,
        config: &StreamConfig,
        mut callback: PlaybackCallback,
        error_flag: &Arc<AtomicBool>,
        error_count: &Arc<AtomicU32>,
    ) -> Result<Stream> {
        let error_flag = Arc::clone(error_flag);
        let error_count = Arc::clone(error_count);

        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback.on_device_pull(data);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    /// Number of stream errors reported by the device
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }
}

impl AudioOutput for CpalOutput {
    fn start(&mut self) -> Result<()> {
        info!("Starting audio stream");
        self.stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        if !self.playing {
            return;
        }
        if let Err(e) = self.stream.pause() {
            warn!("Failed to pause audio stream: {}", e);
        }
        self.playing = false;
        info!("Audio stream stopped");
    }

    fn has_stream_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
