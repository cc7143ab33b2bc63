//! Fake collaborators for driving the pipeline without codecs or hardware

use std::collections::VecDeque;
use std::io::{Cursor, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use streamplay::audio::decoder::{DecoderOutput, PacketDecoder};
use streamplay::audio::output::{AudioOutput, OutputFactory};
use streamplay::audio::parser::Packet;
use streamplay::audio::resampler::{FrameResampler, ResampleError, ResamplerFactory};
use streamplay::audio::types::{CanonicalFormat, PcmData, PcmFrame, StreamSpec};
use streamplay::error::{Error, Result};
use streamplay::playback::callback::PlaybackCallback;

/// Decoder that turns every packet into one stereo f32 frame and holds
/// `delay` frames back until later packets (or the flush) arrive.
///
/// Sample values count up from 1.0 across the whole stream, so the
/// interleaved output is 1, 2, 3, ...
pub struct BufferingDecoder {
    frames_per_packet: usize,
    delay: usize,
    sample_rate: u32,
    next_value: f32,
    held: VecDeque<PcmFrame>,
    ready: VecDeque<PcmFrame>,
    draining: bool,
}

impl BufferingDecoder {
    pub fn new(frames_per_packet: usize, delay: usize) -> Self {
        Self {
            frames_per_packet,
            delay,
            sample_rate: 44100,
            next_value: 1.0,
            held: VecDeque::new(),
            ready: VecDeque::new(),
            draining: false,
        }
    }

    fn make_frame(&mut self) -> PcmFrame {
        let mut left = Vec::with_capacity(self.frames_per_packet);
        let mut right = Vec::with_capacity(self.frames_per_packet);
        for _ in 0..self.frames_per_packet {
            left.push(self.next_value);
            right.push(self.next_value + 1.0);
            self.next_value += 2.0;
        }
        PcmFrame::new(self.sample_rate, PcmData::F32(vec![left, right]))
    }
}

impl PacketDecoder for BufferingDecoder {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        if self.draining {
            return Err(Error::DecoderSubmit("already flushed".to_string()));
        }
        match packet {
            Some(_) => {
                let frame = self.make_frame();
                self.held.push_back(frame);
                while self.held.len() > self.delay {
                    if let Some(frame) = self.held.pop_front() {
                        self.ready.push_back(frame);
                    }
                }
            }
            None => {
                self.draining = true;
                self.ready.extend(self.held.drain(..));
            }
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecoderOutput> {
        match self.ready.pop_front() {
            Some(frame) => Ok(DecoderOutput::Frame(frame)),
            None if self.draining => Ok(DecoderOutput::EndOfStream),
            None => Ok(DecoderOutput::NeedMoreInput),
        }
    }
}

/// Decodes like [`BufferingDecoder`] until packet `fail_at` (1-based),
/// which is a hard decode error.
pub struct FailingDecoder {
    inner: BufferingDecoder,
    fail_at: u64,
    packets: u64,
    failed: bool,
}

impl FailingDecoder {
    pub fn new(frames_per_packet: usize, fail_at: u64) -> Self {
        Self {
            inner: BufferingDecoder::new(frames_per_packet, 0),
            fail_at,
            packets: 0,
            failed: false,
        }
    }
}

impl PacketDecoder for FailingDecoder {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        if packet.is_some() {
            self.packets += 1;
            if self.packets == self.fail_at {
                self.failed = true;
                return Ok(());
            }
        }
        self.inner.send_packet(packet)
    }

    fn receive_frame(&mut self) -> Result<DecoderOutput> {
        if std::mem::take(&mut self.failed) {
            return Err(Error::Decode("corrupt main data".to_string()));
        }
        self.inner.receive_frame()
    }
}

/// Resampler factory whose resamplers interleave f32 input unchanged and
/// fail on the listed conversions (0-based, counted across the stream).
#[derive(Debug, Default, Clone)]
pub struct PassthroughFactory {
    pub fail_conversions: Vec<u64>,
}

impl PassthroughFactory {
    pub fn failing_on(fail_conversions: Vec<u64>) -> Self {
        Self { fail_conversions }
    }
}

impl ResamplerFactory for PassthroughFactory {
    fn create(&self, _source: &StreamSpec, target: &CanonicalFormat) -> Result<Box<dyn FrameResampler>> {
        Ok(Box::new(Passthrough {
            channels: target.channels as usize,
            fail_conversions: self.fail_conversions.clone(),
            conversions: 0,
        }))
    }
}

struct Passthrough {
    channels: usize,
    fail_conversions: Vec<u64>,
    conversions: u64,
}

impl FrameResampler for Passthrough {
    fn convert(&mut self, frame: &PcmFrame, out: &mut Vec<f32>) -> std::result::Result<usize, ResampleError> {
        let index = self.conversions;
        self.conversions += 1;
        if self.fail_conversions.contains(&index) {
            return Err(ResampleError::Engine(format!("injected failure on conversion {}", index)));
        }

        let planes = frame.data.to_f32_planar();
        let frames = frame.frame_count();
        for i in 0..frames {
            for ch in 0..self.channels {
                out.push(planes[ch % planes.len()][i]);
            }
        }
        Ok(frames)
    }

    fn flush(&mut self, _out: &mut Vec<f32>) -> std::result::Result<usize, ResampleError> {
        Ok(0)
    }
}

/// Resampler factory that can never build a resampler
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingFactory;

impl ResamplerFactory for FailingFactory {
    fn create(&self, source: &StreamSpec, _target: &CanonicalFormat) -> Result<Box<dyn FrameResampler>> {
        Err(Error::ResampleSetup(format!("cannot convert from {}Hz", source.sample_rate)))
    }
}

/// Source that serves `data` and then fails with an I/O error
pub struct FailingSource {
    data: Cursor<Vec<u8>>,
}

impl FailingSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Cursor::new(data) }
    }
}

impl Read for FailingSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(std::io::Error::new(ErrorKind::Other, "device removed")),
            n => Ok(n),
        }
    }
}

/// Source that serves `data` and then reports `WouldBlock` forever
pub struct StallingSource {
    data: Cursor<Vec<u8>>,
}

impl StallingSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Cursor::new(data) }
    }
}

impl Read for StallingSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(std::io::Error::new(ErrorKind::WouldBlock, "no data yet")),
            n => Ok(n),
        }
    }
}

/// Output factory for a device that pulls `period_frames` every `period`
/// on its own thread and records everything it was given.
#[derive(Clone)]
pub struct PullDeviceFactory {
    period_frames: usize,
    period: Duration,
    fail_open: bool,
    stream_error: bool,
    captured: Arc<Mutex<Vec<f32>>>,
    pulls: Arc<AtomicU64>,
    opened: Arc<AtomicBool>,
}

impl PullDeviceFactory {
    pub fn new(period_frames: usize, period: Duration) -> Self {
        Self {
            period_frames,
            period,
            fail_open: false,
            stream_error: false,
            captured: Arc::new(Mutex::new(Vec::new())),
            pulls: Arc::new(AtomicU64::new(0)),
            opened: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Device construction always fails
    pub fn failing() -> Self {
        let mut factory = Self::new(64, Duration::from_millis(1));
        factory.fail_open = true;
        factory
    }

    /// Device reports a stream error as soon as it is opened
    pub fn with_stream_error(mut self) -> Self {
        self.stream_error = true;
        self
    }

    /// Everything the device pulled, silence included
    pub fn captured(&self) -> Vec<f32> {
        self.captured.lock().unwrap().clone()
    }

    pub fn pulls(&self) -> u64 {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn was_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }
}

impl OutputFactory for PullDeviceFactory {
    fn open(&self, format: &CanonicalFormat, callback: PlaybackCallback) -> Result<Box<dyn AudioOutput>> {
        if self.fail_open {
            return Err(Error::AudioOutput("no output device available".to_string()));
        }
        self.opened.store(true, Ordering::SeqCst);

        Ok(Box::new(PullDevice {
            callback: Some(callback),
            slot_len: self.period_frames * format.channels as usize,
            period: self.period,
            stream_error: self.stream_error,
            captured: Arc::clone(&self.captured),
            pulls: Arc::clone(&self.pulls),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

struct PullDevice {
    callback: Option<PlaybackCallback>,
    slot_len: usize,
    period: Duration,
    stream_error: bool,
    captured: Arc<Mutex<Vec<f32>>>,
    pulls: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput for PullDevice {
    fn start(&mut self) -> Result<()> {
        let mut callback = self
            .callback
            .take()
            .ok_or_else(|| Error::AudioOutput("device already started".to_string()))?;

        let slot_len = self.slot_len;
        let period = self.period;
        let captured = Arc::clone(&self.captured);
        let pulls = Arc::clone(&self.pulls);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        self.thread = Some(std::thread::spawn(move || {
            let mut slot = vec![0.0f32; slot_len];
            while running.load(Ordering::SeqCst) {
                callback.on_device_pull(&mut slot);
                pulls.fetch_add(1, Ordering::SeqCst);
                captured.lock().unwrap().extend_from_slice(&slot);
                std::thread::sleep(period);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn has_stream_error(&self) -> bool {
        self.stream_error
    }
}

impl Drop for PullDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
