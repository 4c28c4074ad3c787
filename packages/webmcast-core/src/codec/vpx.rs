//! VPx (VP8/VP9) video encoding front-end.
//!
//! Owns frame counters, decimation, and keyframe-interval forcing; the
//! codec backend handles rate control and bitstream production.

use crate::config::{PixelFormat, VideoConfig, VpxConfig};
use crate::error::CodecError;
use crate::media::VideoFrame;

/// One compressed frame out of the codec.
#[derive(Debug, Clone, Default)]
pub struct VpxPacket {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

/// Fully resolved codec setup: frame geometry plus the tuning knobs.
/// `None` tuning fields suppress the matching library control.
#[derive(Debug, Clone)]
pub struct VpxSetup {
    pub width: u32,
    pub height: u32,
    pub config: VpxConfig,
}

/// Interface of the external VPx library: one-pass realtime encoding at a
/// 1/1000 timebase.
pub trait VpxCodec: Send {
    fn init(&mut self, setup: &VpxSetup) -> Result<(), CodecError>;

    /// Encodes one raw I420/YV12 frame. Output is collected through
    /// [`Self::next_packet`].
    fn encode(
        &mut self,
        frame: &VideoFrame,
        timestamp_ms: i64,
        duration_ms: i64,
        force_keyframe: bool,
    ) -> Result<(), CodecError>;

    /// Drains the next compressed frame packet, skipping any stats packets
    /// the library may emit.
    fn next_packet(&mut self) -> Result<Option<VpxPacket>, CodecError>;
}

/// Result of one encode pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncodeOutcome {
    Encoded,
    /// Frame discarded by decimation (or the codec produced no packet).
    Dropped,
}

/// VPx encoder wrapper.
pub struct VpxEncoder {
    codec: Box<dyn VpxCodec>,
    config: VpxConfig,
    output_format: PixelFormat,
    frames_in: i64,
    frames_out: i64,
    last_keyframe_time_ms: i64,
    last_timestamp_ms: i64,
}

impl VpxEncoder {
    pub fn init(
        mut codec: Box<dyn VpxCodec>,
        video_config: &VideoConfig,
        vpx_config: &VpxConfig,
    ) -> Result<Self, CodecError> {
        codec.init(&VpxSetup {
            width: video_config.width,
            height: video_config.height,
            config: vpx_config.clone(),
        })?;
        log::info!(
            "[Vpx] init: {:?} {}x{} @ {} kbps, keyframe interval {} ms",
            vpx_config.codec,
            video_config.width,
            video_config.height,
            vpx_config.bitrate,
            vpx_config.keyframe_interval
        );
        Ok(Self {
            codec,
            output_format: vpx_config.codec.output_format(),
            config: vpx_config.clone(),
            frames_in: 0,
            frames_out: 0,
            last_keyframe_time_ms: 0,
            last_timestamp_ms: 0,
        })
    }

    /// Compresses `raw` into `out`.
    ///
    /// Returns [`VideoEncodeOutcome::Dropped`] when the frame is discarded by
    /// decimation; `out` is untouched in that case.
    pub fn encode_frame(
        &mut self,
        raw: &VideoFrame,
        out: &mut VideoFrame,
    ) -> Result<VideoEncodeOutcome, CodecError> {
        if raw.is_empty() {
            return Err(CodecError::InvalidInput("empty raw frame"));
        }
        let Some(config) = raw.config().copied() else {
            return Err(CodecError::InvalidInput("uninitialized raw frame"));
        };
        if !config.format.is_vpx_input() {
            return Err(CodecError::UnsupportedFormat(format!(
                "VPx input must be I420 or YV12, got {:?}",
                config.format
            )));
        }

        self.frames_in += 1;
        if let Some(decimate) = self.config.decimate {
            if decimate > 1 && self.frames_in % i64::from(decimate) != 0 {
                return Ok(VideoEncodeOutcome::Dropped);
            }
        }

        let time_since_keyframe = raw.timestamp() - self.last_keyframe_time_ms;
        let force_keyframe = time_since_keyframe > self.config.keyframe_interval;

        self.codec.encode(raw, raw.timestamp(), raw.duration(), force_keyframe)?;

        let Some(packet) = self.codec.next_packet()? else {
            log::debug!("[Vpx] no output packet for frame at {} ms", raw.timestamp());
            return Ok(VideoEncodeOutcome::Dropped);
        };

        let mut out_config = config;
        out_config.format = self.output_format;
        out.init(out_config, packet.keyframe, raw.timestamp(), raw.duration(), &packet.data)?;

        if packet.keyframe {
            self.last_keyframe_time_ms = out.timestamp();
            log::info!("[Vpx] keyframe @ {:.3} sec", self.last_keyframe_time_ms as f64 / 1000.0);
        }
        self.frames_out += 1;
        self.last_timestamp_ms = out.timestamp();
        Ok(VideoEncodeOutcome::Encoded)
    }

    pub fn frames_in(&self) -> i64 {
        self.frames_in
    }

    pub fn frames_out(&self) -> i64 {
        self.frames_out
    }

    pub fn last_keyframe_time_ms(&self) -> i64 {
        self.last_keyframe_time_ms
    }

    pub fn last_timestamp_ms(&self) -> i64 {
        self.last_timestamp_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VpxCodecId;
    use crate::test_utils::{i420_frame, StubVpxCodec};

    fn encoder(config: VpxConfig) -> VpxEncoder {
        VpxEncoder::init(Box::new(StubVpxCodec::default()), &VideoConfig::default(), &config)
            .unwrap()
    }

    #[test]
    fn rejects_non_planar_input() {
        let mut enc = encoder(VpxConfig::default());
        let mut raw = VideoFrame::default();
        raw.init(
            VideoConfig { format: PixelFormat::Vp8, ..VideoConfig::default() },
            true,
            0,
            33,
            &[1, 2, 3],
        )
        .unwrap();
        let mut out = VideoFrame::default();
        assert!(matches!(
            enc.encode_frame(&raw, &mut out),
            Err(CodecError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn first_frame_is_keyframe_and_counted() {
        let mut enc = encoder(VpxConfig::default());
        let mut out = VideoFrame::default();
        let outcome = enc.encode_frame(&i420_frame(0, 33), &mut out).unwrap();
        assert_eq!(outcome, VideoEncodeOutcome::Encoded);
        assert!(out.keyframe());
        assert_eq!(out.format(), Some(PixelFormat::Vp8));
        assert_eq!(enc.frames_in(), 1);
        assert_eq!(enc.frames_out(), 1);
    }

    #[test]
    fn keyframes_forced_by_interval() {
        let config = VpxConfig { keyframe_interval: 100, ..VpxConfig::default() };
        let mut enc = encoder(config);
        let mut out = VideoFrame::default();

        enc.encode_frame(&i420_frame(0, 33), &mut out).unwrap();
        assert!(out.keyframe());
        enc.encode_frame(&i420_frame(33, 33), &mut out).unwrap();
        assert!(!out.keyframe());
        enc.encode_frame(&i420_frame(66, 33), &mut out).unwrap();
        assert!(!out.keyframe());
        // 133 - 0 > 100: forced.
        enc.encode_frame(&i420_frame(133, 33), &mut out).unwrap();
        assert!(out.keyframe());
        assert_eq!(enc.last_keyframe_time_ms(), 133);
    }

    #[test]
    fn decimation_drops_frames() {
        let config = VpxConfig { decimate: Some(2), ..VpxConfig::default() };
        let mut enc = encoder(config);
        let mut out = VideoFrame::default();

        let mut encoded = 0;
        for i in 0..10 {
            if enc.encode_frame(&i420_frame(i * 33, 33), &mut out).unwrap()
                == VideoEncodeOutcome::Encoded
            {
                encoded += 1;
            }
        }
        assert_eq!(enc.frames_in(), 10);
        assert_eq!(encoded, 5);
        assert_eq!(enc.frames_out(), 5);
    }

    #[test]
    fn vp9_output_format_follows_codec_selection() {
        let config = VpxConfig { codec: VpxCodecId::Vp9, ..VpxConfig::default() };
        let mut enc = encoder(config);
        let mut out = VideoFrame::default();
        enc.encode_frame(&i420_frame(0, 33), &mut out).unwrap();
        assert_eq!(out.format(), Some(PixelFormat::Vp9));
    }

    #[test]
    fn timestamps_preserved_through_encode() {
        let mut enc = encoder(VpxConfig::default());
        let mut out = VideoFrame::default();
        enc.encode_frame(&i420_frame(500, 33), &mut out).unwrap();
        assert_eq!(out.timestamp(), 500);
        assert_eq!(out.duration(), 33);
        assert_eq!(enc.last_timestamp_ms(), 500);
    }
}
