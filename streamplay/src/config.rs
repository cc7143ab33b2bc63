//! Configuration for streamplay
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (input path, --config, --log-level)
//! 2. Environment variables (STREAMPLAY_INPUT, STREAMPLAY_CONFIG, STREAMPLAY_LOG)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! Levels 1 and 2 are resolved by clap in `main.rs`; this module owns the
//! TOML file and the defaults. Every TOML field is optional.

use crate::audio::parser::DEFAULT_MAX_RESYNC_BYTES;
use crate::audio::types::{CanonicalFormat, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the config directory under the platform config dir
const CONFIG_DIR_NAME: &str = "streamplay";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Decode stage settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DecodeConfig {
    /// Bytes requested from the source per refill
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Refill when fewer unparsed bytes than this remain
    #[serde(default = "default_low_water_bytes")]
    pub low_water_bytes: usize,

    /// Garbage tolerated while searching for frame sync
    #[serde(default = "default_max_resync_bytes")]
    pub max_resync_bytes: usize,
}

/// Sample FIFO settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BufferConfig {
    /// FIFO capacity in canonical frames
    ///
    /// Default: 88200 (2 seconds at 44.1kHz)
    #[serde(default = "default_capacity_frames")]
    pub capacity_frames: usize,

    /// Frames queued before the device is started
    #[serde(default = "default_prefill_frames")]
    pub prefill_frames: usize,

    /// How long the decode stage yields when the FIFO is full
    #[serde(default = "default_backpressure_poll_ms")]
    pub backpressure_poll_ms: u64,
}

/// Canonical playback format (samples are always f32)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,
}

/// Passive buffer telemetry
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_chunk_bytes() -> usize {
    20 * 1024
}

fn default_low_water_bytes() -> usize {
    4096
}

fn default_max_resync_bytes() -> usize {
    DEFAULT_MAX_RESYNC_BYTES
}

fn default_capacity_frames() -> usize {
    CANONICAL_SAMPLE_RATE as usize * 2
}

fn default_prefill_frames() -> usize {
    CANONICAL_SAMPLE_RATE as usize / 2
}

fn default_backpressure_poll_ms() -> u64 {
    5
}

fn default_sample_rate() -> u32 {
    CANONICAL_SAMPLE_RATE
}

fn default_channels() -> u16 {
    CANONICAL_CHANNELS
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: default_chunk_bytes(),
            low_water_bytes: default_low_water_bytes(),
            max_resync_bytes: default_max_resync_bytes(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_frames: default_capacity_frames(),
            prefill_frames: default_prefill_frames(),
            backpressure_poll_ms: default_backpressure_poll_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the configuration file.
    ///
    /// An explicit path must exist. Without one, the platform default
    /// location is used if present, otherwise built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match Self::resolve_path(explicit) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// File that [`resolve`](Self::resolve) reads, if any
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.exists()),
        }
    }

    /// `<config_dir>/streamplay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join("config.toml"))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::Config(msg));

        if self.decode.chunk_bytes == 0 {
            return invalid("decode.chunk_bytes must be greater than zero".to_string());
        }
        if self.decode.low_water_bytes >= self.decode.chunk_bytes {
            return invalid(format!(
                "decode.low_water_bytes ({}) must be less than decode.chunk_bytes ({})",
                self.decode.low_water_bytes, self.decode.chunk_bytes
            ));
        }
        if self.decode.max_resync_bytes == 0 {
            return invalid("decode.max_resync_bytes must be greater than zero".to_string());
        }
        if self.buffer.capacity_frames == 0 {
            return invalid("buffer.capacity_frames must be greater than zero".to_string());
        }
        if self.buffer.prefill_frames > self.buffer.capacity_frames {
            return invalid(format!(
                "buffer.prefill_frames ({}) exceeds buffer.capacity_frames ({})",
                self.buffer.prefill_frames, self.buffer.capacity_frames
            ));
        }
        if self.buffer.backpressure_poll_ms == 0 {
            return invalid("buffer.backpressure_poll_ms must be greater than zero".to_string());
        }
        if self.output.sample_rate == 0 || self.output.channels == 0 {
            return invalid(format!(
                "output format {}Hz/{}ch is not playable",
                self.output.sample_rate, self.output.channels
            ));
        }
        if self.telemetry.interval_ms == 0 {
            return invalid("telemetry.interval_ms must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn canonical_format(&self) -> CanonicalFormat {
        CanonicalFormat::new(self.output.sample_rate, self.output.channels)
    }

    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.buffer.backpressure_poll_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.interval_ms)
    }
}

/// Build a tracing filter directive.
///
/// A bare level applies to this crate only; anything containing `=` or
/// `,` is taken as a complete directive.
pub fn log_filter(cli_level: Option<&str>, logging: &LoggingConfig) -> String {
    let level = cli_level.unwrap_or(&logging.level);
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("streamplay={}", level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.decode.chunk_bytes, 20480);
        assert_eq!(config.decode.low_water_bytes, 4096);
        assert_eq!(config.buffer.capacity_frames, 88200);
        assert_eq!(config.buffer.prefill_frames, 22050);
        assert_eq!(config.canonical_format(), CanonicalFormat::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [buffer]
            capacity_frames = 4096
            prefill_frames = 1024

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer.capacity_frames, 4096);
        assert_eq!(config.buffer.prefill_frames, 1024);
        assert_eq!(config.buffer.backpressure_poll_ms, 5);
        assert_eq!(config.decode, DecodeConfig::default());
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nsample_rate = 48000\n[telemetry]\ninterval_ms = 250").unwrap();

        let config = PipelineConfig::resolve(Some(file.path())).unwrap();
        assert_eq!(config.output.sample_rate, 48000);
        assert_eq!(config.output.channels, 2);
        assert_eq!(config.telemetry_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_resolve_path_prefers_explicit() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(
            PipelineConfig::resolve_path(Some(file.path())),
            Some(file.path().to_path_buf())
        );
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::resolve(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert_eq!(err.stage(), "config");
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(PipelineConfig::from_toml_str("[buffer]\ncapacity_frames = \"lots\"").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.buffer.prefill_frames = config.buffer.capacity_frames + 1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.buffer.capacity_frames = 0;
        config.buffer.prefill_frames = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.decode.low_water_bytes = config.decode.chunk_bytes;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.output.channels = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_log_filter() {
        let logging = LoggingConfig::default();
        assert_eq!(log_filter(None, &logging), "streamplay=info");
        assert_eq!(log_filter(Some("trace"), &logging), "streamplay=trace");
        assert_eq!(log_filter(Some("streamplay=debug,symphonia=warn"), &logging), "streamplay=debug,symphonia=warn");
    }
}
