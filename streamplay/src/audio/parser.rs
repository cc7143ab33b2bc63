//! MPEG audio frame parser
//!
//! Carves a raw byte stream into packets holding exactly one MPEG-1/2/2.5
//! Layer III frame each (header included), which is what the symphonia
//! MP3 decoder expects per packet.
//!
//! The parser is re-entrant over a sliding window: every call looks at the
//! unconsumed bytes from the front, consumes what it can and reports
//! whether a packet is ready. A return of zero consumed bytes and no packet
//! means "need more input".
//!
//! Handled on the way:
//! - leading or interleaved garbage (bounded, see [`ParseError::LostSync`]);
//!   a header found by searching must match the stream and be followed by
//!   another header before it is trusted
//! - ID3v2 tags, skipped even when larger than one refill chunk
//! - ID3v1 `TAG` trailers directly after a frame
//! - the Xing/Info metadata frame at the start of VBR/LAME files

use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while parsing the bitstream. Both are fatal for the stream.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No valid frame header found within the resync budget
    #[error("Lost frame sync: skipped {skipped} bytes without finding a valid frame")]
    LostSync { skipped: usize },

    /// Parser reported consuming more bytes than were available
    #[error("Parser consumed {consumed} bytes but only {remaining} remained")]
    Overconsumed { consumed: usize, remaining: usize },
}

/// A complete, codec-addressable chunk of compressed data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of one parse step
#[derive(Debug, Default)]
pub struct ParseOutput {
    /// Bytes consumed from the front of the input
    pub consumed: usize,

    /// Packet completed by this step, if any
    pub packet: Option<Packet>,
}

impl ParseOutput {
    fn consumed(consumed: usize) -> Self {
        Self {
            consumed,
            packet: None,
        }
    }

    /// True when the parser could make no progress without more bytes
    pub fn needs_input(&self) -> bool {
        self.consumed == 0 && self.packet.is_none()
    }
}

/// Parser collaborator: turns raw bytes into packets.
///
/// Implementations must tolerate being called again on leftover bytes after
/// a refill, with more bytes appended.
pub trait PacketParser: Send {
    /// Parse from the front of `input`.
    fn parse(&mut self, input: &[u8]) -> Result<ParseOutput, ParseError>;

    /// Called once when the source is exhausted, with whatever bytes the
    /// parser left unconsumed. May return a final packet.
    fn finish(&mut self, tail: &[u8]) -> Option<Packet>;
}

/// MPEG audio version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Stream parameters taken from the first accepted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub version: MpegVersion,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
    pub samples_per_frame: u32,
}

const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];
const SAMPLE_RATES_V2: [u32; 3] = [22050, 24000, 16000];
const SAMPLE_RATES_V25: [u32; 3] = [11025, 12000, 8000];

const HEADER_LEN: usize = 4;
const ID3V2_HEADER_LEN: usize = 10;
const ID3V1_TAG_LEN: usize = 128;

/// Decoded Layer III frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub has_crc: bool,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: u16,
}

impl FrameHeader {
    /// Parse a 4-byte header. Returns `None` for anything that is not a
    /// valid Layer III header (free-format bitrate included).
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let &[b0, b1, b2, b3] = bytes.get(..HEADER_LEN)? else {
            return None;
        };

        if b0 != 0xFF || b1 & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (b1 >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };

        // Layer bits: 01 = Layer III
        if (b1 >> 1) & 0x03 != 0x01 {
            return None;
        }

        let bitrate_idx = (b2 >> 4) as usize;
        let sample_rate_idx = ((b2 >> 2) & 0x03) as usize;
        if bitrate_idx == 0 || bitrate_idx == 15 || sample_rate_idx == 3 {
            return None;
        }

        // Reserved emphasis
        if b3 & 0x03 == 0x02 {
            return None;
        }

        let (bitrate_kbps, sample_rate) = match version {
            MpegVersion::Mpeg1 => (BITRATES_V1_L3[bitrate_idx], SAMPLE_RATES_V1[sample_rate_idx]),
            MpegVersion::Mpeg2 => (BITRATES_V2_L3[bitrate_idx], SAMPLE_RATES_V2[sample_rate_idx]),
            MpegVersion::Mpeg25 => (BITRATES_V2_L3[bitrate_idx], SAMPLE_RATES_V25[sample_rate_idx]),
        };

        Some(Self {
            version,
            has_crc: b1 & 0x01 == 0,
            bitrate_kbps,
            sample_rate,
            padding: (b2 >> 1) & 0x01 == 1,
            channels: if b3 >> 6 == 0x03 { 1 } else { 2 },
        })
    }

    /// Total frame length in bytes, header included
    pub fn frame_len(&self) -> usize {
        let coefficient = match self.version {
            MpegVersion::Mpeg1 => 144_000,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72_000,
        };
        (coefficient * self.bitrate_kbps / self.sample_rate) as usize + self.padding as usize
    }

    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 576,
        }
    }

    fn side_info_len(&self) -> usize {
        match (self.version, self.channels) {
            (MpegVersion::Mpeg1, 1) => 17,
            (MpegVersion::Mpeg1, _) => 32,
            (_, 1) => 9,
            (_, _) => 17,
        }
    }

    /// Whether this frame carries a Xing/Info VBR header instead of audio
    fn is_xing_frame(&self, frame: &[u8]) -> bool {
        let offset = HEADER_LEN + if self.has_crc { 2 } else { 0 } + self.side_info_len();
        matches!(frame.get(offset..offset + 4), Some(b"Xing") | Some(b"Info"))
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            version: self.version,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bitrate_kbps: self.bitrate_kbps,
            samples_per_frame: self.samples_per_frame(),
        }
    }
}

/// Default number of garbage bytes tolerated between frames
pub const DEFAULT_MAX_RESYNC_BYTES: usize = 64 * 1024;

/// Layer III frame parser
#[derive(Debug)]
pub struct MpegFrameParser {
    /// Bytes of an ID3v2 tag still to skip
    skip_pending: usize,

    /// Garbage skipped since the last accepted frame
    garbage: usize,

    max_resync_bytes: usize,

    frames: u64,

    stream_info: Option<StreamInfo>,
}

impl MpegFrameParser {
    pub fn new(max_resync_bytes: usize) -> Self {
        Self {
            skip_pending: 0,
            garbage: 0,
            max_resync_bytes,
            frames: 0,
            stream_info: None,
        }
    }

    /// Parameters of the first accepted frame
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.stream_info
    }

    /// Number of frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.frames
    }

    fn skip_garbage(&mut self, count: usize) -> Result<ParseOutput, ParseError> {
        self.garbage += count;
        if self.garbage > self.max_resync_bytes {
            return Err(ParseError::LostSync {
                skipped: self.garbage,
            });
        }
        debug!("Skipping {} bytes while searching for frame sync", count);
        Ok(ParseOutput::consumed(count))
    }

    /// Directly behind an accepted frame
    fn at_frame_boundary(&self) -> bool {
        self.garbage == 0 && self.stream_info.is_some()
    }

    /// Same version and sample rate as the stream so far
    fn matches_stream(&self, header: &FrameHeader) -> bool {
        self.stream_info
            .map_or(true, |info| info.version == header.version && info.sample_rate == header.sample_rate)
    }

    /// Whether `rest` (the bytes after a candidate frame) starts with a
    /// compatible header or a tag. `None` until enough bytes are available.
    fn followed_by_frame(header: &FrameHeader, rest: &[u8]) -> Option<bool> {
        let next = rest.get(..HEADER_LEN)?;
        if next.starts_with(b"TAG") || next.starts_with(b"ID3") {
            return Some(true);
        }
        Some(
            FrameHeader::parse(next)
                .is_some_and(|n| n.version == header.version && n.sample_rate == header.sample_rate),
        )
    }

    /// Skip up to the next plausible sync point. The last bytes are kept in
    /// case a header straddles the end of the window.
    fn resync(&mut self, input: &[u8]) -> Result<ParseOutput, ParseError> {
        let next_sync = input
            .windows(HEADER_LEN)
            .skip(1)
            .position(|w| {
                w.starts_with(b"ID3") || FrameHeader::parse(w).is_some_and(|h| self.matches_stream(&h))
            })
            .map(|p| p + 1);
        let count = next_sync.unwrap_or(input.len() - (HEADER_LEN - 1));
        self.skip_garbage(count)
    }

    /// Size of an ID3v2 tag starting at `input[0]`, if one is there
    fn id3v2_len(input: &[u8]) -> Option<usize> {
        let header = input.get(..ID3V2_HEADER_LEN)?;
        if &header[..3] != b"ID3" || header[6..10].iter().any(|b| b & 0x80 != 0) {
            return None;
        }
        let size = header[6..10]
            .iter()
            .fold(0usize, |acc, &b| (acc << 7) | b as usize);
        let footer = if header[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };
        Some(ID3V2_HEADER_LEN + size + footer)
    }
}

impl Default for MpegFrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESYNC_BYTES)
    }
}

impl PacketParser for MpegFrameParser {
    fn parse(&mut self, input: &[u8]) -> Result<ParseOutput, ParseError> {
        if self.skip_pending > 0 {
            let count = self.skip_pending.min(input.len());
            self.skip_pending -= count;
            return Ok(ParseOutput::consumed(count));
        }

        if input.len() < ID3V2_HEADER_LEN {
            // Enough for a frame header but maybe not for an ID3 header;
            // only commit once the ambiguity is resolved.
            if input.len() < HEADER_LEN || input.starts_with(b"ID") || input.starts_with(b"TA") {
                return Ok(ParseOutput::default());
            }
        }

        if let Some(tag_len) = Self::id3v2_len(input) {
            debug!("Skipping ID3v2 tag ({} bytes)", tag_len);
            let count = tag_len.min(input.len());
            self.skip_pending = tag_len - count;
            return Ok(ParseOutput::consumed(count));
        }

        if input.starts_with(b"TAG") && self.at_frame_boundary() {
            if input.len() < ID3V1_TAG_LEN {
                return Ok(ParseOutput::default());
            }
            debug!("Skipping ID3v1 tag");
            return Ok(ParseOutput::consumed(ID3V1_TAG_LEN));
        }

        let header = match FrameHeader::parse(input) {
            Some(header) if self.matches_stream(&header) => header,
            _ => return self.resync(input),
        };

        let frame_len = header.frame_len();
        if input.len() < frame_len {
            return Ok(ParseOutput::default());
        }

        // A header found by searching is only trusted once the next one
        // lines up behind it (or the source ends, see `finish`).
        if !self.at_frame_boundary() {
            match Self::followed_by_frame(&header, &input[frame_len..]) {
                None => return Ok(ParseOutput::default()),
                Some(false) => return self.resync(input),
                Some(true) => {}
            }
        }

        if self.garbage > 0 {
            warn!("Resynchronized after skipping {} bytes of invalid data", self.garbage);
            self.garbage = 0;
        }

        let frame = &input[..frame_len];

        if self.frames == 0 && self.stream_info.is_none() && header.is_xing_frame(frame) {
            debug!("Dropping Xing/Info metadata frame");
            self.stream_info = Some(header.info());
            return Ok(ParseOutput::consumed(frame_len));
        }

        if self.stream_info.is_none() {
            let info = header.info();
            debug!(
                "First frame: {:?}, {}Hz, {} channels, {}kbps",
                info.version, info.sample_rate, info.channels, info.bitrate_kbps
            );
            self.stream_info = Some(info);
        }

        self.frames += 1;
        Ok(ParseOutput {
            consumed: frame_len,
            packet: Some(Packet::new(frame.to_vec())),
        })
    }

    fn finish(&mut self, tail: &[u8]) -> Option<Packet> {
        if tail.is_empty() || self.skip_pending > 0 {
            return None;
        }

        let Some(header) = FrameHeader::parse(tail).filter(|h| self.matches_stream(h)) else {
            debug!("Discarding {} trailing bytes at end of stream", tail.len());
            return None;
        };

        let frame_len = header.frame_len();
        if tail.len() < frame_len {
            warn!("Discarding truncated final frame ({} bytes)", tail.len());
            return None;
        }

        // An unconfirmed candidate counts only if it ends exactly at the end
        // of the source (or right before an ID3v1 trailer).
        if tail.len() > frame_len && !tail[frame_len..].starts_with(b"TAG") {
            debug!("Discarding {} trailing bytes at end of stream", tail.len());
            return None;
        }

        let frame = &tail[..frame_len];
        if self.stream_info.is_none() && header.is_xing_frame(frame) {
            return None;
        }
        self.stream_info.get_or_insert(header.info());
        self.frames += 1;
        Some(Packet::new(frame.to_vec()))
    }
}
