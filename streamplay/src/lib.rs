//! # streamplay
//!
//! Streaming MPEG audio player.
//!
//! **Architecture:** decode stage (parser + symphonia + rubato) feeding a
//! lock-free sample FIFO that a cpal device callback drains in real time.
//! Decoding and playback run concurrently; the FIFO is the only state
//! they share.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use playback::{PipelineDriver, PlaybackSummary, StopReason};
