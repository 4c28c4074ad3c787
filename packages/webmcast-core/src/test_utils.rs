//! Test support: deterministic stand-ins for the external codec libraries
//! and generators for synthetic capture data.
//!
//! The stubs honor the backend contracts (block-sized packet production with
//! advancing granule positions, keyframe handling) without performing real
//! compression, so pipeline behavior can be tested end to end.

use std::collections::VecDeque;

use crate::codec::vorbis::{VorbisAnalyzer, VorbisPacket, VorbisSetup};
use crate::codec::vpx::{VpxCodec, VpxPacket, VpxSetup};
use crate::config::{AudioConfig, PixelFormat, VideoConfig};
use crate::error::CodecError;
use crate::media::{AudioBuffer, VideoFrame};
use crate::mux::VorbisPrivate;

/// Vorbis analyzer stub: emits one packet per `block_size` submitted sample
/// frames, with the granule position advancing accordingly.
pub struct StubVorbisAnalyzer {
    block_size: usize,
    pending_frames: usize,
    granulepos: i64,
    initialized: bool,
}

impl StubVorbisAnalyzer {
    pub fn new(block_size: usize) -> Self {
        Self { block_size, pending_frames: 0, granulepos: 0, initialized: false }
    }
}

impl VorbisAnalyzer for StubVorbisAnalyzer {
    fn init(&mut self, setup: &VorbisSetup) -> Result<VorbisPrivate, CodecError> {
        if setup.channels == 0 || setup.channels > 2 {
            return Err(CodecError::UnsupportedFormat("stub supports 1-2 channels".into()));
        }
        self.initialized = true;
        // Shaped like real Vorbis headers: packet type byte + "vorbis" magic.
        let mut ident = vec![0x01];
        ident.extend_from_slice(b"vorbis");
        ident.extend_from_slice(&setup.sample_rate.to_le_bytes());
        ident.push(setup.channels as u8);
        ident.resize(30, 0);
        let mut comments = vec![0x03];
        comments.extend_from_slice(b"vorbis");
        for (tag, value) in &setup.comment_tags {
            comments.extend_from_slice(tag.as_bytes());
            comments.push(b'=');
            comments.extend_from_slice(value.as_bytes());
        }
        let mut packet_setup = vec![0x05];
        packet_setup.extend_from_slice(b"vorbis");
        packet_setup.resize(64, 0xAA);
        Ok(VorbisPrivate { ident, comments, setup: packet_setup })
    }

    fn submit(&mut self, planes: &[Vec<f32>]) -> Result<(), CodecError> {
        if !self.initialized {
            return Err(CodecError::Library("submit before init".into()));
        }
        let frames = planes.first().map_or(0, Vec::len);
        if planes.iter().any(|p| p.len() != frames) {
            return Err(CodecError::InvalidInput("unequal plane lengths"));
        }
        self.pending_frames += frames;
        Ok(())
    }

    fn next_packet(&mut self) -> Result<Option<VorbisPacket>, CodecError> {
        if self.pending_frames < self.block_size {
            return Ok(None);
        }
        self.pending_frames -= self.block_size;
        self.granulepos += self.block_size as i64;
        let mut data = vec![0u8; 48];
        data[..8].copy_from_slice(&self.granulepos.to_le_bytes());
        Ok(Some(VorbisPacket { data, granulepos: self.granulepos }))
    }
}

/// VPx codec stub: one packet per encode call, keyframe on the first frame
/// and whenever forced.
#[derive(Default)]
pub struct StubVpxCodec {
    initialized: bool,
    produced_any: bool,
    pending: VecDeque<VpxPacket>,
}

impl VpxCodec for StubVpxCodec {
    fn init(&mut self, setup: &VpxSetup) -> Result<(), CodecError> {
        if setup.width == 0 || setup.height == 0 {
            return Err(CodecError::Library("zero frame geometry".into()));
        }
        self.initialized = true;
        Ok(())
    }

    fn encode(
        &mut self,
        _frame: &VideoFrame,
        timestamp_ms: i64,
        _duration_ms: i64,
        force_keyframe: bool,
    ) -> Result<(), CodecError> {
        if !self.initialized {
            return Err(CodecError::Library("encode before init".into()));
        }
        let keyframe = force_keyframe || !self.produced_any;
        self.produced_any = true;
        let mut data = vec![if keyframe { 0x9D } else { 0x10 }; 96];
        data[1..9].copy_from_slice(&timestamp_ms.to_le_bytes());
        self.pending.push_back(VpxPacket { data, keyframe });
        Ok(())
    }

    fn next_packet(&mut self) -> Result<Option<VpxPacket>, CodecError> {
        Ok(self.pending.pop_front())
    }
}

/// A small I420 frame with a deterministic pattern.
pub fn i420_frame(timestamp_ms: i64, duration_ms: i64) -> VideoFrame {
    let config = VideoConfig {
        format: PixelFormat::I420,
        width: 64,
        height: 48,
        stride: 64,
        frame_rate: 30.0,
    };
    let len = (config.width * config.height) as usize * 3 / 2;
    let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_add(timestamp_ms as u8)).collect();
    let mut frame = VideoFrame::default();
    frame
        .init(config, false, timestamp_ms, duration_ms, &data)
        .unwrap_or_else(|err| panic!("i420_frame init failed: {err}"));
    frame
}

/// An interleaved PCM-16 buffer carrying `frames` sample frames of a ramp
/// signal.
pub fn pcm16_buffer(
    config: &AudioConfig,
    frames: usize,
    timestamp_ms: i64,
    duration_ms: i64,
) -> AudioBuffer {
    let mut samples = Vec::with_capacity(frames * usize::from(config.channels));
    for i in 0..frames {
        for channel in 0..config.channels {
            samples.push(((i % 256) as i16 - 128) * 64 + channel as i16);
        }
    }
    let mut buffer = AudioBuffer::default();
    buffer.init(*config, timestamp_ms, duration_ms, bytemuck::cast_slice(&samples));
    buffer
}
