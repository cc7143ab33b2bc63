//! Audio collaborators: bitstream parsing, decoding, resampling, output

pub mod cursor;
pub mod decoder;
pub mod output;
pub mod parser;
pub mod resampler;
pub mod types;

pub use cursor::{BitstreamCursor, Refill};
pub use decoder::{DecoderOutput, PacketDecoder, SymphoniaDecoder};
pub use output::{AudioOutput, CpalOutput, CpalOutputFactory, OutputFactory};
pub use parser::{MpegFrameParser, Packet, PacketParser, ParseError, ParseOutput};
pub use resampler::{FrameResampler, ResampleError, Resampler, ResamplerFactory, RubatoFactory};
pub use types::{CanonicalFormat, PcmData, PcmFrame, SampleFormat, StreamSpec};
