//! Error types for streamplay
//!
//! Every variant of [`Error`] is fatal for the pipeline. Recoverable
//! conditions (a single frame failing to resample, a transient short read)
//! have their own module-local types and never surface here.

use std::path::PathBuf;
use thiserror::Error;

use crate::audio::parser::ParseError;
use crate::playback::fifo::FifoError;

/// Main error type for streamplay
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("[config] Configuration error: {0}")]
    Config(String),

    /// Raw byte source could not be opened
    #[error("[source] Failed to open {}: {source}", path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Raw byte source failed mid-stream (not a short read)
    #[error("[source] Read error: {0}")]
    SourceRead(#[source] std::io::Error),

    /// Decoder or parser could not be constructed
    #[error("[decoder] Failed to create decoder: {0}")]
    DecoderInit(String),

    /// Malformed bitstream
    #[error("[parser] {0}")]
    Parse(#[from] ParseError),

    /// Decoder refused a packet
    #[error("[decoder] Cannot submit packet to the decoder: {0}")]
    DecoderSubmit(String),

    /// Hard decode error
    #[error("[decoder] Error during decoding: {0}")]
    Decode(String),

    /// Resampler could not be constructed; no frame can ever be processed
    #[error("[resampler] Failed to create resampler: {0}")]
    ResampleSetup(String),

    /// Audio output device errors
    #[error("[output] Audio output error: {0}")]
    AudioOutput(String),

    /// Sample buffer misuse
    #[error("[buffer] {0}")]
    Buffer(#[from] FifoError),

    /// Decode task panicked or was cancelled by the runtime
    #[error("[pipeline] Decode task failed: {0}")]
    Task(String),
}

impl Error {
    /// Name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::SourceOpen { .. } | Error::SourceRead(_) => "source",
            Error::Parse(_) => "parser",
            Error::DecoderInit(_) | Error::DecoderSubmit(_) | Error::Decode(_) => "decoder",
            Error::ResampleSetup(_) => "resampler",
            Error::AudioOutput(_) => "output",
            Error::Buffer(_) => "buffer",
            Error::Task(_) => "pipeline",
        }
    }
}

/// Convenience Result type using streamplay Error
pub type Result<T> = std::result::Result<T, Error>;
