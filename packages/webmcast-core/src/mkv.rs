//! Live-mode WebM segment writer.
//!
//! Emits a single Segment with unknown element sizes so receivers can parse
//! the stream without knowing its final length. Bytes leave through a
//! [`SegmentSink`]; the sink is notified whenever a Cluster element starts,
//! which is how the chunking layer detects that the previous chunk is
//! complete.
//!
//! Cluster boundaries:
//! - the first block opens the first cluster (right after the EBML header,
//!   Info, and Tracks elements, which form the metadata preamble);
//! - when a video track exists, every video keyframe opens a new cluster;
//! - without a video track, a cluster is cut once its span reaches the
//!   configured maximum duration.

use bytes::BytesMut;

use crate::ebml::{self, ids};
use crate::error::MuxerError;

/// Byte sink for the segment writer. Mirrors the interface of a non-seekable
/// container writer target: sequential writes, a running position, and
/// element-start notifications.
pub trait SegmentSink {
    /// Appends `data` to the sink.
    fn write(&mut self, data: &[u8]);

    /// Total bytes written so far.
    fn position(&self) -> u64;

    /// Called when a new element of interest starts at `position`, before any
    /// of the element's bytes are written.
    fn element_start(&mut self, id: u32, position: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackKind {
    Video,
    Audio,
}

struct Track {
    number: u64,
    kind: TrackKind,
    codec_id: &'static str,
    // Video fields.
    width: u32,
    height: u32,
    // Audio fields.
    sample_rate: f64,
    channels: u16,
    codec_private: Vec<u8>,
    last_timecode_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    /// Tracks may be added; nothing written yet.
    Configurable,
    /// Headers are on the wire and frames are flowing.
    Writing,
    Finalized,
}

/// Live WebM segment writer over a [`SegmentSink`].
pub struct Segment<S: SegmentSink> {
    sink: S,
    timecode_scale: u64,
    writing_app: String,
    max_cluster_duration_ns: u64,
    tracks: Vec<Track>,
    state: SegmentState,
    cluster_open: bool,
    cluster_timecode_ms: i64,
    cluster_block_count: u64,
    scratch: BytesMut,
}

impl<S: SegmentSink> Segment<S> {
    pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

    pub fn new(sink: S) -> Self {
        Self {
            sink,
            timecode_scale: Self::DEFAULT_TIMECODE_SCALE,
            writing_app: String::new(),
            max_cluster_duration_ns: 0,
            tracks: Vec::new(),
            state: SegmentState::Configurable,
            cluster_open: false,
            cluster_timecode_ms: 0,
            cluster_block_count: 0,
            scratch: BytesMut::with_capacity(4096),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn set_writing_app(&mut self, app: &str) {
        self.writing_app = app.to_string();
    }

    /// Maximum cluster span in timecode-scale ticks (nanoseconds at the
    /// default scale).
    pub fn set_max_cluster_duration(&mut self, ticks: u64) {
        self.max_cluster_duration_ns = ticks;
    }

    /// Adds a video track and returns its track number.
    pub fn add_video_track(
        &mut self,
        width: u32,
        height: u32,
        codec_id: &'static str,
    ) -> Result<u64, MuxerError> {
        self.check_tracks_open()?;
        let number = self.tracks.len() as u64 + 1;
        self.tracks.push(Track {
            number,
            kind: TrackKind::Video,
            codec_id,
            width,
            height,
            sample_rate: 0.0,
            channels: 0,
            codec_private: Vec::new(),
            last_timecode_ms: None,
        });
        Ok(number)
    }

    /// Adds an audio track with the given codec-private bytes and returns its
    /// track number.
    pub fn add_audio_track(
        &mut self,
        sample_rate: f64,
        channels: u16,
        codec_id: &'static str,
        codec_private: Vec<u8>,
    ) -> Result<u64, MuxerError> {
        self.check_tracks_open()?;
        let number = self.tracks.len() as u64 + 1;
        self.tracks.push(Track {
            number,
            kind: TrackKind::Audio,
            codec_id,
            width: 0,
            height: 0,
            sample_rate,
            channels,
            codec_private,
            last_timecode_ms: None,
        });
        Ok(number)
    }

    /// Writes one frame to `track_number`. `timestamp_ticks` is expressed in
    /// timecode-scale ticks (nanoseconds at the default scale).
    pub fn add_frame(
        &mut self,
        track_number: u64,
        data: &[u8],
        timestamp_ticks: u64,
        keyframe: bool,
    ) -> Result<(), MuxerError> {
        if self.state == SegmentState::Finalized {
            return Err(MuxerError::Finalized);
        }
        if data.is_empty() {
            return Err(MuxerError::EmptyBuffer);
        }
        let timecode_ms = (timestamp_ticks / self.timecode_scale) as i64;

        let has_video = self.has_video_track();
        let max_cluster_ms = (self.max_cluster_duration_ns / self.timecode_scale) as i64;
        let track_index = self
            .tracks
            .iter()
            .position(|t| t.number == track_number)
            .ok_or(MuxerError::UnknownTrack(track_number))?;

        if let Some(previous) = self.tracks[track_index].last_timecode_ms {
            if timecode_ms < previous {
                return Err(MuxerError::NonMonotonicTimestamp {
                    previous,
                    current: timecode_ms,
                });
            }
        }

        if self.state == SegmentState::Configurable {
            self.write_headers();
            self.state = SegmentState::Writing;
        }

        let is_video = self.tracks[track_index].kind == TrackKind::Video;
        let new_cluster = if !self.cluster_open {
            true
        } else if has_video {
            is_video && keyframe && self.cluster_block_count > 0
        } else {
            max_cluster_ms > 0 && timecode_ms - self.cluster_timecode_ms >= max_cluster_ms
        };

        if new_cluster {
            self.start_cluster(timecode_ms);
        }

        let relative = timecode_ms - self.cluster_timecode_ms;
        if relative < 0 || relative > i64::from(i16::MAX) {
            return Err(MuxerError::TimecodeOutOfRange(timecode_ms));
        }

        self.scratch.clear();
        ebml::write_id(&mut self.scratch, ids::SIMPLE_BLOCK);
        ebml::write_size(&mut self.scratch, (1 + 2 + 1 + data.len()) as u64);
        self.scratch.extend_from_slice(&[0x80 | track_number as u8]);
        self.scratch.extend_from_slice(&(relative as i16).to_be_bytes());
        self.scratch.extend_from_slice(&[if keyframe { 0x80 } else { 0x00 }]);
        let header = self.scratch.split().freeze();
        self.sink.write(&header);
        self.sink.write(data);

        self.cluster_block_count += 1;
        self.tracks[track_index].last_timecode_ms = Some(timecode_ms);
        Ok(())
    }

    /// Marks the segment finalized. No writes are accepted afterwards.
    pub fn finalize(&mut self) -> Result<(), MuxerError> {
        if self.state == SegmentState::Finalized {
            return Err(MuxerError::Finalized);
        }
        self.cluster_open = false;
        self.state = SegmentState::Finalized;
        Ok(())
    }

    /// Highest block timecode written to any track, in milliseconds.
    pub fn last_timecode_ms(&self) -> i64 {
        self.tracks.iter().filter_map(|t| t.last_timecode_ms).max().unwrap_or(0)
    }

    fn has_video_track(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }

    fn check_tracks_open(&self) -> Result<(), MuxerError> {
        match self.state {
            SegmentState::Configurable => Ok(()),
            SegmentState::Writing => Err(MuxerError::TracksFrozen),
            SegmentState::Finalized => Err(MuxerError::Finalized),
        }
    }

    fn write_headers(&mut self) {
        let mut payload = BytesMut::new();
        ebml::write_uint(&mut payload, ids::EBML_VERSION, 1);
        ebml::write_uint(&mut payload, ids::EBML_READ_VERSION, 1);
        ebml::write_uint(&mut payload, ids::EBML_MAX_ID_LENGTH, 4);
        ebml::write_uint(&mut payload, ids::EBML_MAX_SIZE_LENGTH, 8);
        ebml::write_string(&mut payload, ids::DOC_TYPE, "webm");
        ebml::write_uint(&mut payload, ids::DOC_TYPE_VERSION, 2);
        ebml::write_uint(&mut payload, ids::DOC_TYPE_READ_VERSION, 2);

        self.scratch.clear();
        ebml::write_master(&mut self.scratch, ids::EBML, &payload);

        // Segment with unknown size; everything below is inside it.
        ebml::write_id(&mut self.scratch, ids::SEGMENT);
        ebml::write_unknown_size(&mut self.scratch);

        let mut info = BytesMut::new();
        ebml::write_uint(&mut info, ids::TIMECODE_SCALE, self.timecode_scale);
        ebml::write_string(&mut info, ids::MUXING_APP, &self.writing_app);
        ebml::write_string(&mut info, ids::WRITING_APP, &self.writing_app);
        ebml::write_master(&mut self.scratch, ids::INFO, &info);

        let mut tracks = BytesMut::new();
        for track in &self.tracks {
            let mut entry = BytesMut::new();
            ebml::write_uint(&mut entry, ids::TRACK_NUMBER, track.number);
            ebml::write_uint(&mut entry, ids::TRACK_UID, track.number);
            ebml::write_uint(&mut entry, ids::FLAG_LACING, 0);
            ebml::write_string(&mut entry, ids::CODEC_ID, track.codec_id);
            match track.kind {
                TrackKind::Video => {
                    ebml::write_uint(&mut entry, ids::TRACK_TYPE, ebml::TRACK_TYPE_VIDEO);
                    let mut video = BytesMut::new();
                    ebml::write_uint(&mut video, ids::PIXEL_WIDTH, u64::from(track.width));
                    ebml::write_uint(&mut video, ids::PIXEL_HEIGHT, u64::from(track.height));
                    ebml::write_master(&mut entry, ids::VIDEO, &video);
                }
                TrackKind::Audio => {
                    ebml::write_uint(&mut entry, ids::TRACK_TYPE, ebml::TRACK_TYPE_AUDIO);
                    let mut audio = BytesMut::new();
                    ebml::write_float(&mut audio, ids::SAMPLING_FREQUENCY, track.sample_rate);
                    ebml::write_uint(&mut audio, ids::CHANNELS, u64::from(track.channels));
                    ebml::write_master(&mut entry, ids::AUDIO, &audio);
                    if !track.codec_private.is_empty() {
                        ebml::write_binary(&mut entry, ids::CODEC_PRIVATE, &track.codec_private);
                    }
                }
            }
            ebml::write_master(&mut tracks, ids::TRACK_ENTRY, &entry);
        }
        ebml::write_master(&mut self.scratch, ids::TRACKS, &tracks);

        let headers = self.scratch.split().freeze();
        self.sink.write(&headers);
    }

    fn start_cluster(&mut self, timecode_ms: i64) {
        self.sink.element_start(ids::CLUSTER, self.sink.position());

        self.scratch.clear();
        ebml::write_id(&mut self.scratch, ids::CLUSTER);
        ebml::write_unknown_size(&mut self.scratch);
        ebml::write_uint(&mut self.scratch, ids::TIMECODE, timecode_ms.max(0) as u64);
        let cluster_head = self.scratch.split().freeze();
        self.sink.write(&cluster_head);

        self.cluster_open = true;
        self.cluster_timecode_ms = timecode_ms;
        self.cluster_block_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records writes and cluster-start positions.
    #[derive(Default)]
    struct RecordingSink {
        data: Vec<u8>,
        cluster_starts: Vec<u64>,
    }

    impl SegmentSink for RecordingSink {
        fn write(&mut self, data: &[u8]) {
            self.data.extend_from_slice(data);
        }

        fn position(&self) -> u64 {
            self.data.len() as u64
        }

        fn element_start(&mut self, id: u32, position: u64) {
            if id == ids::CLUSTER {
                self.cluster_starts.push(position);
            }
        }
    }

    const MS: u64 = Segment::<RecordingSink>::DEFAULT_TIMECODE_SCALE;

    fn video_segment() -> Segment<RecordingSink> {
        let mut segment = Segment::new(RecordingSink::default());
        segment.set_writing_app("test");
        segment.set_max_cluster_duration(1000 * MS);
        segment.add_video_track(320, 240, "V_VP8").unwrap();
        segment
    }

    #[test]
    fn headers_precede_first_cluster() {
        let mut segment = video_segment();
        segment.add_frame(1, &[1, 2, 3], 0, true).unwrap();

        let sink = segment.sink();
        assert_eq!(&sink.data[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(sink.cluster_starts.len(), 1);
        let start = sink.cluster_starts[0] as usize;
        assert_eq!(&sink.data[start..start + 4], &[0x1F, 0x43, 0xB6, 0x75]);
    }

    #[test]
    fn video_keyframes_cut_clusters() {
        let mut segment = video_segment();
        segment.add_frame(1, &[1], 0, true).unwrap();
        segment.add_frame(1, &[2], 33 * MS, false).unwrap();
        segment.add_frame(1, &[3], 66 * MS, false).unwrap();
        segment.add_frame(1, &[4], 1000 * MS, true).unwrap();
        assert_eq!(segment.sink().cluster_starts.len(), 2);
    }

    #[test]
    fn audio_only_cuts_on_duration() {
        let mut segment = Segment::new(RecordingSink::default());
        segment.set_max_cluster_duration(1000 * MS);
        segment.add_audio_track(44_100.0, 2, "A_VORBIS", vec![2, 1, 1, 0, 0, 0]).unwrap();
        for i in 0..50 {
            segment.add_frame(1, &[0xAB], i * 40 * MS, true).unwrap();
        }
        // 2 seconds of 40 ms packets: clusters at 0 and 1000 ms.
        assert_eq!(segment.sink().cluster_starts.len(), 2);
    }

    #[test]
    fn non_monotonic_timestamps_rejected_per_track() {
        let mut segment = video_segment();
        segment.add_frame(1, &[1], 100 * MS, true).unwrap();
        let result = segment.add_frame(1, &[2], 50 * MS, false);
        assert!(matches!(result, Err(MuxerError::NonMonotonicTimestamp { .. })));
    }

    #[test]
    fn writes_rejected_after_finalize() {
        let mut segment = video_segment();
        segment.add_frame(1, &[1], 0, true).unwrap();
        segment.finalize().unwrap();
        assert_eq!(segment.add_frame(1, &[2], 33 * MS, false), Err(MuxerError::Finalized));
    }

    #[test]
    fn track_adds_frozen_after_first_frame() {
        let mut segment = video_segment();
        segment.add_frame(1, &[1], 0, true).unwrap();
        let result = segment.add_audio_track(44_100.0, 2, "A_VORBIS", Vec::new());
        assert_eq!(result.unwrap_err(), MuxerError::TracksFrozen);
    }

    #[test]
    fn simple_block_layout() {
        let mut segment = video_segment();
        segment.add_frame(1, &[0xDE, 0xAD], 0, true).unwrap();
        let data = &segment.sink().data;
        // The SimpleBlock is the last element written: id, size, track vint,
        // relative timecode, flags, payload.
        let block = &data[data.len() - 8..];
        assert_eq!(block[0], 0xA3);
        assert_eq!(block[1], 0x80 | 6);
        assert_eq!(block[2], 0x81);
        assert_eq!(&block[3..5], &[0, 0]);
        assert_eq!(block[5], 0x80);
        assert_eq!(&block[6..8], &[0xDE, 0xAD]);
    }

    #[test]
    fn mixed_av_interleaving_keeps_cluster_on_keyframe_only() {
        let mut segment = Segment::new(RecordingSink::default());
        segment.set_max_cluster_duration(1000 * MS);
        segment.add_video_track(320, 240, "V_VP8").unwrap();
        segment.add_audio_track(44_100.0, 2, "A_VORBIS", vec![0x02]).unwrap();

        segment.add_frame(1, &[1], 0, true).unwrap();
        for i in 0..60 {
            segment.add_frame(2, &[9], i * 25 * MS, true).unwrap();
        }
        // 1.5 s of audio alone never cuts a cluster while video is present.
        assert_eq!(segment.sink().cluster_starts.len(), 1);
        segment.add_frame(1, &[2], 1500 * MS, true).unwrap();
        assert_eq!(segment.sink().cluster_starts.len(), 2);
    }
}
