//! Producer/consumer pipeline between the decode stage and the device

pub mod callback;
pub mod decode_stage;
pub mod fifo;
pub mod pipeline;

pub use callback::PlaybackCallback;
pub use decode_stage::{DecodeOutcome, DecodeStage, DecodeSummary};
pub use fifo::{FifoError, FifoMonitor, FifoReader, FifoStats, FifoWriter, ReadOutcome, SampleFifo};
pub use pipeline::{PipelineDriver, PlaybackSummary, StopReason};
