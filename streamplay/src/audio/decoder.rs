//! Packet decoder using symphonia
//!
//! The decode stage talks to decoders through [`PacketDecoder`], a
//! submit/receive interface that keeps "need more input", "end of stream"
//! and hard errors distinct. [`SymphoniaDecoder`] adapts symphonia's
//! one-packet-in, one-buffer-out decoder to it.

use std::collections::VecDeque;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::conv::IntoSample;
use symphonia::core::formats::Packet as SymphoniaPacket;
use symphonia::core::sample::Sample;
use tracing::debug;

use crate::audio::parser::Packet;
use crate::audio::types::{PcmData, PcmFrame};
use crate::error::{Error, Result};

/// What the decoder has to offer after a packet was submitted
#[derive(Debug)]
pub enum DecoderOutput {
    /// A decoded PCM frame
    Frame(PcmFrame),

    /// All output for the submitted input has been drained
    NeedMoreInput,

    /// Flush marker was submitted and all buffered output has been drained
    EndOfStream,
}

/// Decoder collaborator.
///
/// Call [`send_packet`](Self::send_packet), then
/// [`receive_frame`](Self::receive_frame) until it stops returning frames.
/// Submitting `None` is the flush marker.
pub trait PacketDecoder: Send {
    /// Submit a packet, or `None` to flush. Fails with
    /// [`Error::DecoderSubmit`] if the decoder cannot accept input.
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()>;

    /// Take the next decoded frame. Fails with [`Error::Decode`] on a hard
    /// decode error.
    fn receive_frame(&mut self) -> Result<DecoderOutput>;
}

/// symphonia-backed decoder for a raw elementary stream
pub struct SymphoniaDecoder {
    decoder: Box<dyn Decoder>,

    /// Decoded frames not yet received
    pending: VecDeque<PcmFrame>,

    /// Decode failure to report on the next receive
    failure: Option<String>,

    /// Flush marker received
    draining: bool,

    packets: u64,
}

impl SymphoniaDecoder {
    /// Create a decoder for MPEG Layer III packets.
    pub fn mp3() -> Result<Self> {
        Self::for_codec(CODEC_TYPE_MP3)
    }

    pub fn for_codec(codec: CodecType) -> Result<Self> {
        let mut params = CodecParameters::new();
        params.for_codec(codec);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::DecoderInit(e.to_string()))?;

        debug!("Created symphonia decoder for codec {:?}", decoder.codec_params().codec);

        Ok(Self {
            decoder,
            pending: VecDeque::new(),
            failure: None,
            draining: false,
            packets: 0,
        })
    }

    fn to_pcm_frame(decoded: &AudioBufferRef) -> PcmFrame {
        let sample_rate = decoded.spec().rate;
        let data = match decoded {
            AudioBufferRef::U8(buf) => PcmData::U8(Self::planes(&**buf)),
            AudioBufferRef::U16(buf) => PcmData::S16(Self::planes(&**buf)),
            AudioBufferRef::U24(buf) => PcmData::S32(Self::planes(&**buf)),
            AudioBufferRef::U32(buf) => PcmData::S32(Self::planes(&**buf)),
            AudioBufferRef::S8(buf) => PcmData::S16(Self::planes(&**buf)),
            AudioBufferRef::S16(buf) => PcmData::S16(Self::planes(&**buf)),
            AudioBufferRef::S24(buf) => PcmData::S32(Self::planes(&**buf)),
            AudioBufferRef::S32(buf) => PcmData::S32(Self::planes(&**buf)),
            AudioBufferRef::F32(buf) => PcmData::F32(Self::planes(&**buf)),
            AudioBufferRef::F64(buf) => PcmData::F64(Self::planes(&**buf)),
        };
        PcmFrame::new(sample_rate, data)
    }

    /// Copy each channel, widening to the target sample type
    fn planes<S, T>(buf: &AudioBuffer<S>) -> Vec<Vec<T>>
    where
        S: Sample + IntoSample<T>,
    {
        (0..buf.spec().channels.count())
            .map(|ch| buf.chan(ch).iter().map(|&s| s.into_sample()).collect())
            .collect()
    }
}

impl PacketDecoder for SymphoniaDecoder {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        if self.draining {
            return Err(Error::DecoderSubmit("decoder is draining after flush".to_string()));
        }
        if !self.pending.is_empty() {
            return Err(Error::DecoderSubmit("previous output has not been received".to_string()));
        }

        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };

        let symphonia_packet = SymphoniaPacket::new_from_slice(0, self.packets, 0, packet.data());
        self.packets += 1;

        match self.decoder.decode(&symphonia_packet) {
            Ok(decoded) => {
                if decoded.frames() > 0 {
                    let frame = Self::to_pcm_frame(&decoded);
                    self.pending.push_back(frame);
                }
            }
            Err(e) => self.failure = Some(e.to_string()),
        }

        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecoderOutput> {
        if let Some(message) = self.failure.take() {
            return Err(Error::Decode(message));
        }

        match self.pending.pop_front() {
            Some(frame) => Ok(DecoderOutput::Frame(frame)),
            None if self.draining => Ok(DecoderOutput::EndOfStream),
            None => Ok(DecoderOutput::NeedMoreInput),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleFormat;

    /// MPEG-1 Layer III, 128kbps, 44.1kHz, stereo, all-zero side info and
    /// main data: decodes to silence.
    fn silent_frame() -> Packet {
        let mut bytes = vec![0xFF, 0xFB, 0x90, 0x00];
        bytes.resize(417, 0);
        Packet::new(bytes)
    }

    #[test]
    fn test_decode_silent_frames() {
        let mut decoder = SymphoniaDecoder::mp3().unwrap();

        for _ in 0..3 {
            decoder.send_packet(Some(&silent_frame())).unwrap();
            match decoder.receive_frame().unwrap() {
                DecoderOutput::Frame(frame) => {
                    assert_eq!(frame.frame_count(), 1152);
                    assert_eq!(frame.spec().channels, 2);
                    assert_eq!(frame.spec().sample_rate, 44100);
                    assert_eq!(frame.spec().sample_format, SampleFormat::F32);
                }
                other => panic!("expected frame, got {:?}", other),
            }
            assert!(matches!(decoder.receive_frame().unwrap(), DecoderOutput::NeedMoreInput));
        }

        decoder.send_packet(None).unwrap();
        assert!(matches!(decoder.receive_frame().unwrap(), DecoderOutput::EndOfStream));
    }

    #[test]
    fn test_submit_after_flush_rejected() {
        let mut decoder = SymphoniaDecoder::mp3().unwrap();
        decoder.send_packet(None).unwrap();

        let err = decoder.send_packet(Some(&silent_frame())).unwrap_err();
        assert!(matches!(err, Error::DecoderSubmit(_)));
    }

    #[test]
    fn test_submit_without_receive_rejected() {
        let mut decoder = SymphoniaDecoder::mp3().unwrap();
        decoder.send_packet(Some(&silent_frame())).unwrap();

        let err = decoder.send_packet(Some(&silent_frame())).unwrap_err();
        assert!(matches!(err, Error::DecoderSubmit(_)));
    }

    #[test]
    fn test_garbage_packet_is_decode_error() {
        let mut decoder = SymphoniaDecoder::mp3().unwrap();
        decoder.send_packet(Some(&Packet::new(vec![0x00; 64]))).unwrap();

        let err = decoder.receive_frame().unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(err.stage(), "decoder");
    }
}
