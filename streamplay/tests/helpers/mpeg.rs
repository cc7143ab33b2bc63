//! MPEG-1 Layer III stream synthesis

/// Length of a 128kbps / 44.1kHz frame without padding
pub const MPEG_FRAME_LEN: usize = 417;

/// One MPEG-1 Layer III frame, 128kbps, 44.1kHz, no CRC, silent payload
pub fn mpeg_frame(padding: bool, mono: bool) -> Vec<u8> {
    let mut frame = vec![
        0xFF,
        0xFB,
        0x90 | ((padding as u8) << 1),
        if mono { 0xC0 } else { 0x00 },
    ];
    frame.resize(MPEG_FRAME_LEN + padding as usize, 0);
    frame
}

/// `frames` consecutive stereo frames
pub fn silent_stream(frames: usize) -> Vec<u8> {
    (0..frames).flat_map(|_| mpeg_frame(false, false)).collect()
}

/// Length of a 128kbps / 48kHz frame
pub const MPEG_FRAME_LEN_48K: usize = 384;

/// `frames` consecutive stereo 48kHz frames, silent payload
pub fn silent_stream_48k(frames: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|_| {
            let mut frame = vec![0xFF, 0xFB, 0x94, 0x00];
            frame.resize(MPEG_FRAME_LEN_48K, 0);
            frame
        })
        .collect()
}

/// JPEG APP2 marker as found in embedded cover art. It also reads as an
/// MPEG-2.5 Layer III header.
pub const JPEG_APP2_MARKER: [u8; 4] = [0xFF, 0xE2, 0x90, 0x00];
