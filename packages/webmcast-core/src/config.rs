//! Configuration structures for capture formats, codec tuning, and the
//! encoder itself.
//!
//! Codec tuning knobs that default to "leave the library alone" are modeled
//! as `Option`: `None` means the corresponding library control call is
//! suppressed entirely.

use serde::{Deserialize, Serialize};

/// Uncompressed (or passthrough) audio sample formats accepted from capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Signed 16-bit integer PCM.
    Pcm,
    /// 32-bit IEEE floating point.
    IeeeFloat,
    /// Compressed Vorbis packets (encoder output, never capture input).
    Vorbis,
}

/// Audio capture configuration. Immutable once the encoder is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub format: AudioFormat,
    /// 1 (mono) or 2 (stereo).
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth: 16 for PCM, 32 for IEEE float.
    pub bits_per_sample: u16,
    /// Bytes per sample frame across all channels.
    pub block_align: u16,
    pub bytes_per_second: u32,
    /// Channel position mask; 0 when the source does not report one.
    pub channel_mask: u32,
}

impl AudioConfig {
    /// Returns a 16-bit PCM configuration for the given rate and channels.
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        let block_align = channels * 2;
        Self {
            format: AudioFormat::Pcm,
            channels,
            sample_rate,
            bits_per_sample: 16,
            block_align,
            bytes_per_second: sample_rate * u32::from(block_align),
            channel_mask: 0,
        }
    }

    /// Bytes per single-channel sample, rounded up.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::pcm16(44_100, 2)
    }
}

/// Pixel formats accepted from video capture, plus the compressed formats
/// produced by the VPx encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    I420,
    Yv12,
    Yuy2,
    Yuyv,
    Uyvy,
    Rgb24,
    Rgba,
    Vp8,
    Vp9,
}

impl PixelFormat {
    /// True for the planar formats libvpx accepts directly.
    pub fn is_vpx_input(self) -> bool {
        matches!(self, Self::I420 | Self::Yv12)
    }

    /// True for the compressed formats produced by the VPx encoder.
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Vp8 | Self::Vp9)
    }
}

/// Video capture configuration, negotiated at capture-connect time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row of the luma plane (or packed row). Equal to `width`
    /// after conversion to I420.
    pub stride: u32,
    /// Frame rate in frames per second.
    pub frame_rate: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { format: PixelFormat::I420, width: 640, height: 480, stride: 640, frame_rate: 30.0 }
    }
}

/// Vorbis encoder tuning. Bitrates are kilobits per second; the encoder
/// multiplies by 1000 before handing them to the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VorbisConfig {
    /// Average (managed) bitrate in kbps.
    pub average_bitrate: i32,
    /// Minimum bitrate in kbps. `None` leaves the library default.
    pub minimum_bitrate: Option<i32>,
    /// Maximum bitrate in kbps. `None` leaves the library default.
    pub maximum_bitrate: Option<i32>,
    /// When true and no min/max bitrate is set, switch the library into
    /// quality-driven VBR mode.
    pub bitrate_based_quality: bool,
    /// Enable channel coupling.
    pub channel_coupling: bool,
    /// Impulse block bias, -15.0 to 0.0.
    pub impulse_block_bias: Option<f64>,
    /// Hard lowpass frequency in kHz, 2 to 99.
    pub lowpass_frequency: Option<f64>,
}

impl Default for VorbisConfig {
    fn default() -> Self {
        Self {
            average_bitrate: 128,
            minimum_bitrate: None,
            maximum_bitrate: None,
            bitrate_based_quality: true,
            channel_coupling: false,
            impulse_block_bias: None,
            lowpass_frequency: None,
        }
    }
}

/// VPx codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpxCodecId {
    Vp8,
    Vp9,
}

impl VpxCodecId {
    /// Matroska codec ID string for the track entry.
    pub fn codec_id(self) -> &'static str {
        match self {
            Self::Vp8 => "V_VP8",
            Self::Vp9 => "V_VP9",
        }
    }

    /// The compressed pixel format this codec produces.
    pub fn output_format(self) -> PixelFormat {
        match self {
            Self::Vp8 => PixelFormat::Vp8,
            Self::Vp9 => PixelFormat::Vp9,
        }
    }
}

/// VPx encoder tuning. `None` fields suppress the matching library control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpxConfig {
    /// Time between keyframes, in milliseconds.
    pub keyframe_interval: i64,
    /// Target bitrate in kilobits.
    pub bitrate: u32,
    pub codec: VpxCodecId,
    /// Frame rate decimation factor: keep one frame in `decimate`.
    pub decimate: Option<u32>,
    pub min_quantizer: u32,
    pub max_quantizer: u32,
    /// Encoder complexity (cpu-used).
    pub speed: Option<i32>,
    /// Threshold at which a macroblock is considered static.
    pub static_threshold: Option<u32>,
    pub thread_count: Option<u32>,
    /// Number of token partitions, 0-3 (log2).
    pub token_partitions: Option<u32>,
    /// Percentage to undershoot the requested datarate.
    pub undershoot: Option<u32>,
    /// Blurs adjacent frames to reduce input noise, 0-1.
    pub noise_sensitivity: Option<u32>,
    /// Percentage to overshoot the requested datarate.
    pub overshoot: Option<u32>,
    /// Client buffer sizes, in milliseconds.
    pub total_buffer_time: Option<i64>,
    pub initial_buffer_time: Option<i64>,
    pub optimal_buffer_time: Option<i64>,
    /// Maximum keyframe bitrate as a percentage of `bitrate`.
    pub max_keyframe_bitrate: Option<u32>,
    /// Loop filter sharpness, 0-7.
    pub sharpness: Option<u32>,
    pub error_resilient: bool,
    /// Golden frame bitrate boost in CBR, percentage of `bitrate`.
    pub goldenframe_cbr_boost: Option<u32>,
    /// Adaptive quantization mode, 0-3 (VP9).
    pub adaptive_quantization_mode: Option<u32>,
    /// Tile columns in log2 units (VP9).
    pub tile_columns: Option<u32>,
    /// Disables frame parallel decoding features (VP9).
    pub disable_frame_parallel: bool,
}

impl Default for VpxConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: 1000,
            bitrate: 500,
            codec: VpxCodecId::Vp8,
            decimate: None,
            min_quantizer: 2,
            max_quantizer: 52,
            speed: Some(-6),
            static_threshold: None,
            thread_count: None,
            token_partitions: None,
            undershoot: None,
            noise_sensitivity: None,
            overshoot: None,
            total_buffer_time: Some(1000),
            initial_buffer_time: Some(500),
            optimal_buffer_time: Some(600),
            max_keyframe_bitrate: Some(300),
            sharpness: Some(0),
            error_resilient: false,
            goldenframe_cbr_boost: Some(300),
            adaptive_quantization_mode: Some(3),
            tile_columns: Some(4),
            disable_frame_parallel: false,
        }
    }
}

/// Top-level encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub disable_audio: bool,
    pub disable_video: bool,

    /// Capture device names. Empty means system default.
    pub audio_device_name: Option<String>,
    pub video_device_name: Option<String>,

    /// Ask the capture source to present its own configuration interface.
    pub manual_audio_config: bool,
    pub manual_video_config: bool,

    /// Requested capture settings; the source negotiates and reports the
    /// actual settings at connect time.
    pub requested_audio_config: AudioConfig,
    pub requested_video_config: VideoConfig,

    pub vorbis: VorbisConfig,
    pub vpx: VpxConfig,

    /// Enable DASH encoding mode (dual single-track muxers).
    pub dash_encode: bool,
    /// MPD name and DASH chunk ID prefix.
    pub dash_name: String,
    /// Output directory for the MPD and DASH chunks.
    pub dash_dir: String,
    /// MPD SegmentTemplate startNumber value.
    pub dash_start_number: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            disable_audio: false,
            disable_video: false,
            audio_device_name: None,
            video_device_name: None,
            manual_audio_config: false,
            manual_video_config: false,
            requested_audio_config: AudioConfig::default(),
            requested_video_config: VideoConfig::default(),
            vorbis: VorbisConfig::default(),
            vpx: VpxConfig::default(),
            dash_encode: false,
            dash_name: "webmcast".to_string(),
            dash_dir: "./".to_string(),
            dash_start_number: "1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_derived_fields() {
        let config = AudioConfig::pcm16(48_000, 2);
        assert_eq!(config.block_align, 4);
        assert_eq!(config.bytes_per_second, 192_000);
        assert_eq!(config.bytes_per_sample(), 2);
    }

    #[test]
    fn vpx_defaults_match_product_defaults() {
        let config = VpxConfig::default();
        assert_eq!(config.keyframe_interval, 1000);
        assert_eq!(config.bitrate, 500);
        assert_eq!(config.codec, VpxCodecId::Vp8);
        assert_eq!(config.min_quantizer, 2);
        assert_eq!(config.max_quantizer, 52);
        assert!(config.decimate.is_none());
    }

    #[test]
    fn codec_id_strings() {
        assert_eq!(VpxCodecId::Vp8.codec_id(), "V_VP8");
        assert_eq!(VpxCodecId::Vp9.codec_id(), "V_VP9");
    }
}
