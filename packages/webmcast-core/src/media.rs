//! Owned audio and video buffer value types.
//!
//! Both types own their payload bytes outright and support the deep-clone and
//! destructive-swap operations [`crate::pool::BufferPool`] needs to recycle
//! storage between capture and encoder threads.

use crate::config::{AudioConfig, PixelFormat, VideoConfig};
use crate::error::CodecError;

/// A block of audio samples (raw capture data or compressed Vorbis packet)
/// plus its format and timing.
#[derive(Debug, Default, Clone)]
pub struct AudioBuffer {
    config: Option<AudioConfig>,
    timestamp_ms: i64,
    duration_ms: i64,
    data: Vec<u8>,
}

impl AudioBuffer {
    /// Copies `data` into the buffer, reusing existing storage when possible.
    pub fn init(
        &mut self,
        config: AudioConfig,
        timestamp_ms: i64,
        duration_ms: i64,
        data: &[u8],
    ) {
        self.config = Some(config);
        self.timestamp_ms = timestamp_ms;
        self.duration_ms = duration_ms;
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    pub fn config(&self) -> Option<&AudioConfig> {
        self.config.as_ref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn set_timestamp(&mut self, timestamp_ms: i64) {
        self.timestamp_ms = timestamp_ms;
    }

    pub fn duration(&self) -> i64 {
        self.duration_ms
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

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Deep-copies this buffer into `target`, reusing `target`'s storage.
    pub fn clone_into_buffer(&self, target: &mut Self) {
        target.config = self.config;
        target.timestamp_ms = self.timestamp_ms;
        target.duration_ms = self.duration_ms;
        target.data.clear();
        target.data.extend_from_slice(&self.data);
    }

    /// Destructively swaps all contents with `other`.
    pub fn swap_contents(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }
}

/// A video frame: raw planar/packed pixels from capture, or a compressed VPx
/// frame out of the encoder.
#[derive(Debug, Default, Clone)]
pub struct VideoFrame {
    config: Option<VideoConfig>,
    keyframe: bool,
    timestamp_ms: i64,
    duration_ms: i64,
    data: Vec<u8>,
}

impl VideoFrame {
    /// Stores `data` in the frame.
    ///
    /// Uncompressed formats other than I420 and YV12 are converted to I420
    /// during initialization; after conversion `config.stride == width`. The
    /// keyframe flag is forced on for all uncompressed frames.
    pub fn init(
        &mut self,
        config: VideoConfig,
        keyframe: bool,
        timestamp_ms: i64,
        duration_ms: i64,
        data: &[u8],
    ) -> Result<(), CodecError> {
        if data.is_empty() {
            return Err(CodecError::InvalidInput("empty video frame"));
        }
        self.timestamp_ms = timestamp_ms;
        self.duration_ms = duration_ms;

        match config.format {
            PixelFormat::Vp8 | PixelFormat::Vp9 => {
                self.config = Some(config);
                self.keyframe = keyframe;
                self.data.clear();
                self.data.extend_from_slice(data);
            }
            PixelFormat::I420 | PixelFormat::Yv12 => {
                self.config = Some(config);
                self.keyframe = true;
                self.data.clear();
                self.data.extend_from_slice(data);
            }
            _ => {
                self.convert_to_i420(&config, data)?;
                self.keyframe = true;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> Option<&VideoConfig> {
        self.config.as_ref()
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.config.map(|c| c.format)
    }

    pub fn width(&self) -> u32 {
        self.config.map_or(0, |c| c.width)
    }

    pub fn height(&self) -> u32 {
        self.config.map_or(0, |c| c.height)
    }

    pub fn stride(&self) -> u32 {
        self.config.map_or(0, |c| c.stride)
    }

    pub fn keyframe(&self) -> bool {
        self.keyframe
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn set_timestamp(&mut self, timestamp_ms: i64) {
        self.timestamp_ms = timestamp_ms;
    }

    pub fn duration(&self) -> i64 {
        self.duration_ms
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

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Deep-copies this frame into `target`, reusing `target`'s storage.
    pub fn clone_into_buffer(&self, target: &mut Self) {
        target.config = self.config;
        target.keyframe = self.keyframe;
        target.timestamp_ms = self.timestamp_ms;
        target.duration_ms = self.duration_ms;
        target.data.clear();
        target.data.extend_from_slice(&self.data);
    }

    /// Destructively swaps all contents with `other`.
    pub fn swap_contents(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Converts a packed frame to planar I420 into `self.data`. Output stride
    /// equals width.
    fn convert_to_i420(&mut self, config: &VideoConfig, data: &[u8]) -> Result<(), CodecError> {
        let width = config.width as usize;
        let height = config.height as usize;
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidInput("zero frame dimensions"));
        }

        let y_size = width * height;
        let chroma_size = width.div_ceil(2) * height.div_ceil(2);
        self.data.clear();
        self.data.resize(y_size + 2 * chroma_size, 0);

        match config.format {
            PixelFormat::Yuy2 | PixelFormat::Yuyv => {
                self.packed_422_to_i420(config, data, 0, 1, 3)?
            }
            PixelFormat::Uyvy => self.packed_422_to_i420(config, data, 1, 0, 2)?,
            PixelFormat::Rgb24 => self.rgb_to_i420(config, data, 3)?,
            PixelFormat::Rgba => self.rgb_to_i420(config, data, 4)?,
            _ => return Err(CodecError::InvalidInput("unexpected conversion source format")),
        }

        self.config = Some(VideoConfig {
            format: PixelFormat::I420,
            width: config.width,
            height: config.height,
            stride: config.width,
            frame_rate: config.frame_rate,
        });
        Ok(())
    }

    /// Unpacks 4:2:2 YUV (two pixels per four bytes) into I420. `y_off`,
    /// `u_off`, and `v_off` locate the samples within each four-byte group.
    fn packed_422_to_i420(
        &mut self,
        config: &VideoConfig,
        data: &[u8],
        y_off: usize,
        u_off: usize,
        v_off: usize,
    ) -> Result<(), CodecError> {
        let width = config.width as usize;
        let height = config.height as usize;
        let stride = if config.stride > 0 { config.stride as usize } else { width * 2 };
        if data.len() < stride * height {
            return Err(CodecError::InvalidInput("packed 4:2:2 frame too short"));
        }

        let y_size = width * height;
        let chroma_w = width.div_ceil(2);
        let chroma_size = chroma_w * height.div_ceil(2);

        for row in 0..height {
            let src_row = &data[row * stride..];
            for pair in 0..chroma_w {
                let group = &src_row[pair * 4..pair * 4 + 4];
                let x = pair * 2;
                self.data[row * width + x] = group[y_off];
                if x + 1 < width {
                    self.data[row * width + x + 1] = group[y_off + 2];
                }
                // 4:2:2 carries chroma on every row; keep even rows for 4:2:0.
                if row % 2 == 0 {
                    let c_idx = (row / 2) * chroma_w + pair;
                    self.data[y_size + c_idx] = group[u_off];
                    self.data[y_size + chroma_size + c_idx] = group[v_off];
                }
            }
        }
        Ok(())
    }

    /// Converts packed RGB (3 or 4 bytes per pixel, R-G-B byte order) to
    /// I420 with BT.601 studio-swing coefficients. Chroma is averaged over
    /// each 2x2 block.
    fn rgb_to_i420(
        &mut self,
        config: &VideoConfig,
        data: &[u8],
        bytes_per_pixel: usize,
    ) -> Result<(), CodecError> {
        let width = config.width as usize;
        let height = config.height as usize;
        let stride =
            if config.stride > 0 { config.stride as usize } else { width * bytes_per_pixel };
        if data.len() < stride * height {
            return Err(CodecError::InvalidInput("packed RGB frame too short"));
        }

        let y_size = width * height;
        let chroma_w = width.div_ceil(2);
        let chroma_size = chroma_w * height.div_ceil(2);

        for row in 0..height {
            let src_row = &data[row * stride..];
            for x in 0..width {
                let px = &src_row[x * bytes_per_pixel..];
                let (r, g, b) = (i32::from(px[0]), i32::from(px[1]), i32::from(px[2]));
                let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
                self.data[row * width + x] = y.clamp(0, 255) as u8;
            }
        }

        for cy in 0..height.div_ceil(2) {
            for cx in 0..chroma_w {
                let mut r_sum = 0i32;
                let mut g_sum = 0i32;
                let mut b_sum = 0i32;
                let mut count = 0i32;
                for dy in 0..2 {
                    let row = cy * 2 + dy;
                    if row >= height {
                        continue;
                    }
                    for dx in 0..2 {
                        let col = cx * 2 + dx;
                        if col >= width {
                            continue;
                        }
                        let px = &data[row * stride + col * bytes_per_pixel..];
                        r_sum += i32::from(px[0]);
                        g_sum += i32::from(px[1]);
                        b_sum += i32::from(px[2]);
                        count += 1;
                    }
                }
                let (r, g, b) = (r_sum / count, g_sum / count, b_sum / count);
                let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                let c_idx = cy * chroma_w + cx;
                self.data[y_size + c_idx] = u.clamp(0, 255) as u8;
                self.data[y_size + chroma_size + c_idx] = v.clamp(0, 255) as u8;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_config(format: PixelFormat, width: u32, height: u32, stride: u32) -> VideoConfig {
        VideoConfig { format, width, height, stride, frame_rate: 30.0 }
    }

    #[test]
    fn audio_buffer_round_trip() {
        let mut buffer = AudioBuffer::default();
        buffer.init(AudioConfig::pcm16(44_100, 2), 20, 10, &[1, 2, 3, 4]);
        assert_eq!(buffer.timestamp(), 20);
        assert_eq!(buffer.duration(), 10);
        assert_eq!(buffer.data(), &[1, 2, 3, 4]);
        assert!(buffer.capacity() >= buffer.len());
    }

    #[test]
    fn audio_buffer_init_reuses_storage() {
        let mut buffer = AudioBuffer::default();
        buffer.init(AudioConfig::default(), 0, 0, &vec![0u8; 4096]);
        let capacity = buffer.capacity();
        buffer.init(AudioConfig::default(), 1, 1, &[9, 9]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn swap_moves_payload_both_ways() {
        let mut a = AudioBuffer::default();
        let mut b = AudioBuffer::default();
        a.init(AudioConfig::default(), 5, 1, &[1, 1]);
        b.init(AudioConfig::default(), 7, 1, &[2, 2, 2]);
        a.swap_contents(&mut b);
        assert_eq!(a.data(), &[2, 2, 2]);
        assert_eq!(a.timestamp(), 7);
        assert_eq!(b.data(), &[1, 1]);
        assert_eq!(b.timestamp(), 5);
    }

    #[test]
    fn i420_frame_stored_verbatim_with_keyframe_forced() {
        let mut frame = VideoFrame::default();
        let data = vec![0x80u8; 640 * 480 * 3 / 2];
        frame
            .init(video_config(PixelFormat::I420, 640, 480, 640), false, 100, 33, &data)
            .unwrap();
        assert!(frame.keyframe());
        assert_eq!(frame.format(), Some(PixelFormat::I420));
        assert_eq!(frame.len(), data.len());
    }

    #[test]
    fn compressed_frame_keeps_keyframe_flag() {
        let mut frame = VideoFrame::default();
        frame
            .init(video_config(PixelFormat::Vp8, 640, 480, 0), false, 0, 33, &[1, 2, 3])
            .unwrap();
        assert!(!frame.keyframe());
    }

    #[test]
    fn yuy2_converts_to_i420_with_width_stride() {
        // 4x2 frame: all Y=0x40, U=0x30, V=0x20.
        let mut packed = Vec::new();
        for _row in 0..2 {
            for _pair in 0..2 {
                packed.extend_from_slice(&[0x40, 0x30, 0x40, 0x20]);
            }
        }
        let mut frame = VideoFrame::default();
        frame
            .init(video_config(PixelFormat::Yuy2, 4, 2, 8), false, 0, 33, &packed)
            .unwrap();
        let config = frame.config().unwrap();
        assert_eq!(config.format, PixelFormat::I420);
        assert_eq!(config.stride, 4);
        assert_eq!(frame.len(), 4 * 2 + 2 * 2);
        assert!(frame.data()[..8].iter().all(|&y| y == 0x40));
        assert_eq!(&frame.data()[8..10], &[0x30, 0x30]);
        assert_eq!(&frame.data()[10..12], &[0x20, 0x20]);
    }

    #[test]
    fn rgb_white_converts_to_bright_luma_neutral_chroma() {
        let mut frame = VideoFrame::default();
        let data = vec![0xFFu8; 2 * 2 * 3];
        frame
            .init(video_config(PixelFormat::Rgb24, 2, 2, 6), false, 0, 33, &data)
            .unwrap();
        // White: Y=235, U=V=128 in studio swing.
        assert_eq!(frame.data()[0], 235);
        assert_eq!(frame.data()[4], 128);
        assert_eq!(frame.data()[5], 128);
    }

    #[test]
    fn empty_frame_rejected() {
        let mut frame = VideoFrame::default();
        let result = frame.init(video_config(PixelFormat::I420, 2, 2, 2), true, 0, 0, &[]);
        assert!(result.is_err());
    }
}
