//! Chunk-producing muxer adapter.
//!
//! [`LiveWebmMuxer`] wraps the live segment writer with a byte sink that
//! slices the stream into deliverable "chunks":
//!
//! - the first chunk is the metadata preamble (EBML header, segment info, and
//!   track entries);
//! - every subsequent chunk is one complete Cluster element.
//!
//! The sink never seeks; data is buffered only until a chunk is read out.
//! Callers must poll [`LiveWebmMuxer::chunk_ready`] periodically and drain
//! with [`LiveWebmMuxer::read_chunk`] to keep memory bounded, and must call
//! [`LiveWebmMuxer::finalize`] to avoid losing the final cluster.

use crate::config::{AudioConfig, AudioFormat, VideoConfig, VpxCodecId};
use crate::ebml::ids;
use crate::error::MuxerError;
use crate::media::{AudioBuffer, VideoFrame};
use crate::mkv::{Segment, SegmentSink};

/// WebM stores a nanosecond multiplier on top of the millisecond timebase.
pub const TIMECODE_SCALE: u64 = 1_000_000;

const WRITING_APP: &str = "webmlive v2";

/// The three Vorbis header packets, stored opaquely for the audio track's
/// CodecPrivate element.
#[derive(Debug, Clone, Default)]
pub struct VorbisPrivate {
    pub ident: Vec<u8>,
    pub comments: Vec<u8>,
    pub setup: Vec<u8>,
}

impl VorbisPrivate {
    /// Serializes the headers as Matroska CodecPrivate: a Xiph-laced
    /// concatenation descriptor followed by the packets.
    pub fn codec_private(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            3 + self.ident.len() / 255
                + self.comments.len() / 255
                + self.ident.len()
                + self.comments.len()
                + self.setup.len(),
        );
        out.push(2);
        for length in [self.ident.len(), self.comments.len()] {
            let mut remaining = length;
            while remaining >= 255 {
                out.push(255);
                remaining -= 255;
            }
            out.push(remaining as u8);
        }
        out.extend_from_slice(&self.ident);
        out.extend_from_slice(&self.comments);
        out.extend_from_slice(&self.setup);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.ident.is_empty() && self.comments.is_empty() && self.setup.is_empty()
    }
}

/// Byte sink handed to the segment writer. Accumulates written bytes and
/// stamps the chunk boundary whenever a new Cluster element starts.
#[derive(Debug, Default)]
pub struct ChunkWriter {
    buffer: Vec<u8>,
    bytes_written: u64,
    chunk_end: usize,
}

impl ChunkWriter {
    /// Length of the complete buffered chunk, or `None` when no chunk is
    /// ready.
    pub fn chunk_ready(&self) -> Option<usize> {
        (self.chunk_end > 0).then_some(self.chunk_end)
    }

    /// Bytes currently buffered (complete chunk plus any trailing partial
    /// cluster).
    pub fn bytes_buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes ever written through this sink.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Copies the buffered chunk into `out` and erases it from the buffer.
    pub fn read_chunk(&mut self, out: &mut [u8]) -> Result<usize, MuxerError> {
        let chunk_length = self.chunk_ready().ok_or(MuxerError::NoChunkReady)?;
        if out.len() < chunk_length {
            return Err(MuxerError::UserBufferTooSmall { chunk_length, capacity: out.len() });
        }
        out[..chunk_length].copy_from_slice(&self.buffer[..chunk_length]);
        self.buffer.drain(..chunk_length);
        self.chunk_end = 0;
        Ok(chunk_length)
    }
}

impl SegmentSink for ChunkWriter {
    fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
    }

    fn position(&self) -> u64 {
        self.bytes_written
    }

    fn element_start(&mut self, id: u32, _position: u64) {
        if id == ids::CLUSTER {
            // Everything buffered before this cluster is a complete chunk.
            self.chunk_end = self.buffer.len();
        }
    }
}

/// WebM muxing front-end producing live-mode chunks.
pub struct LiveWebmMuxer {
    segment: Segment<ChunkWriter>,
    audio_track_num: u64,
    video_track_num: u64,
    video_codec: VpxCodecId,
}

impl LiveWebmMuxer {
    /// Creates a muxer cutting clusters at `cluster_duration_ms` (normally
    /// the keyframe interval).
    pub fn new(cluster_duration_ms: i64) -> Result<Self, MuxerError> {
        if cluster_duration_ms < 1 {
            return Err(MuxerError::InvalidClusterDuration(cluster_duration_ms));
        }
        let mut segment = Segment::new(ChunkWriter::default());
        segment.set_writing_app(WRITING_APP);
        segment.set_max_cluster_duration(cluster_duration_ms as u64 * TIMECODE_SCALE);
        Ok(Self {
            segment,
            audio_track_num: 0,
            video_track_num: 0,
            video_codec: VpxCodecId::Vp8,
        })
    }

    /// Adds the audio track. The Vorbis codec-private headers are required;
    /// there is no private-less variant.
    pub fn add_audio_track(
        &mut self,
        config: &AudioConfig,
        private: &VorbisPrivate,
    ) -> Result<(), MuxerError> {
        if self.audio_track_num != 0 {
            return Err(MuxerError::AudioTrackExists);
        }
        if private.is_empty() {
            return Err(MuxerError::UnsupportedFormat("missing Vorbis codec private data"));
        }
        self.audio_track_num = self.segment.add_audio_track(
            f64::from(config.sample_rate),
            config.channels,
            "A_VORBIS",
            private.codec_private(),
        )?;
        Ok(())
    }

    /// Adds the video track.
    pub fn add_video_track(
        &mut self,
        config: &VideoConfig,
        codec: VpxCodecId,
    ) -> Result<(), MuxerError> {
        if self.video_track_num != 0 {
            return Err(MuxerError::VideoTrackExists);
        }
        self.video_track_num =
            self.segment.add_video_track(config.width, config.height, codec.codec_id())?;
        self.video_codec = codec;
        Ok(())
    }

    /// Writes one compressed Vorbis packet to the audio track.
    pub fn write_audio_buffer(&mut self, buffer: &AudioBuffer) -> Result<(), MuxerError> {
        if self.audio_track_num == 0 {
            return Err(MuxerError::NoAudioTrack);
        }
        if buffer.is_empty() {
            return Err(MuxerError::EmptyBuffer);
        }
        match buffer.config().map(|c| c.format) {
            Some(AudioFormat::Vorbis) => {}
            _ => return Err(MuxerError::UnsupportedFormat("audio buffer is not Vorbis")),
        }
        let timecode = ms_to_ticks(buffer.timestamp())?;
        // Vorbis packets are all "keyframes" as far as the container cares.
        self.segment.add_frame(self.audio_track_num, buffer.data(), timecode, true)
    }

    /// Writes one compressed VPx frame to the video track.
    pub fn write_video_frame(&mut self, frame: &VideoFrame) -> Result<(), MuxerError> {
        if self.video_track_num == 0 {
            return Err(MuxerError::NoVideoTrack);
        }
        if frame.is_empty() {
            return Err(MuxerError::EmptyBuffer);
        }
        if frame.format() != Some(self.video_codec.output_format()) {
            return Err(MuxerError::UnsupportedFormat("frame codec does not match video track"));
        }
        let timecode = ms_to_ticks(frame.timestamp())?;
        self.segment.add_frame(self.video_track_num, frame.data(), timecode, frame.keyframe())
    }

    /// Length of a complete buffered chunk, if one is ready.
    pub fn chunk_ready(&self) -> Option<usize> {
        self.segment.sink().chunk_ready()
    }

    /// Moves the buffered chunk into `out` and returns its length. The chunk
    /// is discarded from the internal buffer.
    pub fn read_chunk(&mut self, out: &mut [u8]) -> Result<usize, MuxerError> {
        self.segment.sink_mut().read_chunk(out)
    }

    /// Flushes the segment. When buffered bytes remain, the final cluster is
    /// promoted to a deliverable chunk; poll [`Self::chunk_ready`] one last
    /// time after this call.
    pub fn finalize(&mut self) -> Result<(), MuxerError> {
        self.segment.finalize()?;
        let position = self.segment.sink().position();
        if self.segment.sink().bytes_buffered() > 0 {
            self.segment.sink_mut().element_start(ids::CLUSTER, position);
        }
        Ok(())
    }

    /// Highest timestamp written to the muxer, in milliseconds.
    pub fn current_time_ms(&self) -> i64 {
        self.segment.last_timecode_ms()
    }

    pub fn has_audio_track(&self) -> bool {
        self.audio_track_num != 0
    }

    pub fn has_video_track(&self) -> bool {
        self.video_track_num != 0
    }
}

fn ms_to_ticks(timestamp_ms: i64) -> Result<u64, MuxerError> {
    if timestamp_ms < 0 {
        return Err(MuxerError::TimecodeOutOfRange(timestamp_ms));
    }
    Ok(timestamp_ms as u64 * TIMECODE_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PixelFormat, VideoConfig};

    fn vp8_frame(timestamp_ms: i64, keyframe: bool, payload: &[u8]) -> VideoFrame {
        let mut frame = VideoFrame::default();
        frame
            .init(
                VideoConfig {
                    format: PixelFormat::Vp8,
                    width: 320,
                    height: 240,
                    stride: 0,
                    frame_rate: 30.0,
                },
                keyframe,
                timestamp_ms,
                33,
                payload,
            )
            .unwrap();
        frame
    }

    fn vorbis_buffer(timestamp_ms: i64, payload: &[u8]) -> AudioBuffer {
        let mut config = AudioConfig::pcm16(44_100, 2);
        config.format = AudioFormat::Vorbis;
        let mut buffer = AudioBuffer::default();
        buffer.init(config, timestamp_ms, 20, payload);
        buffer
    }

    fn test_private() -> VorbisPrivate {
        VorbisPrivate { ident: vec![1; 30], comments: vec![2; 40], setup: vec![3; 50] }
    }

    fn video_muxer() -> LiveWebmMuxer {
        let mut muxer = LiveWebmMuxer::new(1000).unwrap();
        muxer.add_video_track(&VideoConfig::default(), VpxCodecId::Vp8).unwrap();
        muxer
    }

    #[test]
    fn rejects_sub_millisecond_cluster_duration() {
        assert!(matches!(
            LiveWebmMuxer::new(0),
            Err(MuxerError::InvalidClusterDuration(0))
        ));
    }

    #[test]
    fn first_chunk_is_metadata_preamble() {
        let mut muxer = video_muxer();
        muxer.write_video_frame(&vp8_frame(0, true, &[1, 2, 3])).unwrap();

        let length = muxer.chunk_ready().expect("metadata chunk");
        let mut chunk = vec![0u8; length];
        muxer.read_chunk(&mut chunk).unwrap();
        assert_eq!(&chunk[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        // No second chunk until the next cluster starts.
        assert!(muxer.chunk_ready().is_none());
    }

    #[test]
    fn cluster_chunks_follow_keyframes() {
        let mut muxer = video_muxer();
        muxer.write_video_frame(&vp8_frame(0, true, &[1])).unwrap();
        muxer.write_video_frame(&vp8_frame(33, false, &[2])).unwrap();
        muxer.write_video_frame(&vp8_frame(1000, true, &[3])).unwrap();

        // Drain metadata chunk.
        let length = muxer.chunk_ready().unwrap();
        let mut chunk = vec![0u8; length];
        muxer.read_chunk(&mut chunk).unwrap();

        // The first cluster completed when the second keyframe arrived.
        let length = muxer.chunk_ready().expect("cluster chunk");
        let mut chunk = vec![0u8; length];
        muxer.read_chunk(&mut chunk).unwrap();
        assert_eq!(&chunk[..4], &[0x1F, 0x43, 0xB6, 0x75]);
    }

    #[test]
    fn chunk_end_resets_after_read() {
        let mut muxer = video_muxer();
        muxer.write_video_frame(&vp8_frame(0, true, &[1])).unwrap();
        let length = muxer.chunk_ready().unwrap();
        let mut chunk = vec![0u8; length];
        muxer.read_chunk(&mut chunk).unwrap();
        assert!(muxer.chunk_ready().is_none());
        assert!(matches!(muxer.read_chunk(&mut chunk), Err(MuxerError::NoChunkReady)));
    }

    #[test]
    fn read_chunk_rejects_small_buffer() {
        let mut muxer = video_muxer();
        muxer.write_video_frame(&vp8_frame(0, true, &[1])).unwrap();
        let length = muxer.chunk_ready().unwrap();
        let mut tiny = vec![0u8; length - 1];
        assert!(matches!(
            muxer.read_chunk(&mut tiny),
            Err(MuxerError::UserBufferTooSmall { .. })
        ));
        // The chunk survives a failed read.
        assert_eq!(muxer.chunk_ready(), Some(length));
    }

    #[test]
    fn finalize_promotes_trailing_cluster() {
        let mut muxer = video_muxer();
        muxer.write_video_frame(&vp8_frame(0, true, &[1])).unwrap();
        let length = muxer.chunk_ready().unwrap();
        let mut chunk = vec![0u8; length];
        muxer.read_chunk(&mut chunk).unwrap();
        assert!(muxer.chunk_ready().is_none());

        muxer.finalize().unwrap();
        let length = muxer.chunk_ready().expect("final chunk");
        let mut chunk = vec![0u8; length];
        muxer.read_chunk(&mut chunk).unwrap();
        assert_eq!(&chunk[..4], &[0x1F, 0x43, 0xB6, 0x75]);
    }

    #[test]
    fn second_video_track_rejected() {
        let mut muxer = video_muxer();
        let result = muxer.add_video_track(&VideoConfig::default(), VpxCodecId::Vp8);
        assert_eq!(result.unwrap_err(), MuxerError::VideoTrackExists);
    }

    #[test]
    fn audio_track_requires_codec_private() {
        let mut muxer = LiveWebmMuxer::new(1000).unwrap();
        let result = muxer.add_audio_track(&AudioConfig::default(), &VorbisPrivate::default());
        assert!(matches!(result, Err(MuxerError::UnsupportedFormat(_))));
    }

    #[test]
    fn audio_write_requires_vorbis_payload() {
        let mut muxer = LiveWebmMuxer::new(1000).unwrap();
        muxer.add_audio_track(&AudioConfig::default(), &test_private()).unwrap();
        let mut raw = AudioBuffer::default();
        raw.init(AudioConfig::pcm16(44_100, 2), 0, 20, &[0, 0]);
        assert!(matches!(
            muxer.write_audio_buffer(&raw),
            Err(MuxerError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn codec_private_uses_xiph_lacing() {
        let private = VorbisPrivate { ident: vec![1; 300], comments: vec![2; 10], setup: vec![3; 5] };
        let bytes = private.codec_private();
        assert_eq!(bytes[0], 2);
        // ident: 300 = 255 + 45.
        assert_eq!(&bytes[1..3], &[255, 45]);
        assert_eq!(bytes[3], 10);
        assert_eq!(&bytes[4..304], &vec![1u8; 300][..]);
        assert_eq!(&bytes[304..314], &vec![2u8; 10][..]);
        assert_eq!(&bytes[314..319], &vec![3u8; 5][..]);
    }

    #[test]
    fn write_after_finalize_rejected() {
        let mut muxer = video_muxer();
        muxer.write_video_frame(&vp8_frame(0, true, &[1])).unwrap();
        muxer.finalize().unwrap();
        assert_eq!(
            muxer.write_video_frame(&vp8_frame(33, false, &[2])),
            Err(MuxerError::Finalized)
        );
    }

    #[test]
    fn current_time_tracks_highest_written_timestamp() {
        let mut muxer = LiveWebmMuxer::new(1000).unwrap();
        muxer.add_video_track(&VideoConfig::default(), VpxCodecId::Vp8).unwrap();
        muxer.add_audio_track(&AudioConfig::default(), &test_private()).unwrap();
        muxer.write_video_frame(&vp8_frame(0, true, &[1])).unwrap();
        muxer.write_audio_buffer(&vorbis_buffer(24, &[7])).unwrap();
        muxer.write_video_frame(&vp8_frame(33, false, &[2])).unwrap();
        assert_eq!(muxer.current_time_ms(), 33);
    }
}
