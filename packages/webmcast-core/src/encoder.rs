//! The encoder orchestrator.
//!
//! Owns the buffer pools, codecs, muxer(s), and data sinks, and runs the
//! single encoder thread. Capture threads push buffers through the pool
//! callbacks; the encoder thread pulls them out, compresses, muxes, and fans
//! completed chunks out to every sink.
//!
//! Stop protocol: `stop()` raises a flag under the control mutex and joins
//! the thread. The thread finalizes the muxer(s), waits for every sink to
//! become ready, and delivers the final chunk before exiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::codec::vorbis::{VorbisAnalyzer, VorbisEncoder};
use crate::codec::vpx::{VideoEncodeOutcome, VpxCodec, VpxEncoder};
use crate::config::{AudioConfig, EncoderConfig, VideoConfig};
use crate::dash::{DashConfig, DashWriter};
use crate::error::{CodecError, EncoderError, EncoderResult, PoolError};
use crate::media::{AudioBuffer, VideoFrame};
use crate::mux::LiveWebmMuxer;
use crate::pool::{BufferPool, DEFAULT_BUFFER_COUNT};
use crate::sink::SinkSet;
use crate::source::{
    AudioSamplesCallback, CaptureStatus, MediaSource, SourceOptions, VideoFrameCallback,
};

/// Initial size of the chunk staging buffer; grows on demand.
const DEFAULT_CHUNK_BUFFER_SIZE: usize = 100 * 1024;

/// Idle sleep used while polling pools and sink readiness.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Upper bound on waiting for sinks before the final chunk is written
/// anyway; sink writes are non-blocking so delivery is still attempted.
const FINAL_CHUNK_WAIT: Duration = Duration::from_secs(5);

struct ControlState {
    stop: bool,
    encoded_duration_ms: i64,
    error: Option<EncoderError>,
}

struct Pools {
    audio: BufferPool<AudioBuffer>,
    video: BufferPool<VideoFrame>,
    dropped_video_frames: AtomicU64,
}

/// Capture-facing side of the pools. Handed to the media source as the
/// sample/frame callbacks.
struct PoolCallbacks {
    pools: Arc<Pools>,
}

impl AudioSamplesCallback for PoolCallbacks {
    fn on_samples_received(&self, buffer: &mut AudioBuffer) -> CaptureStatus {
        match self.pools.audio.commit(buffer) {
            Ok(()) => CaptureStatus::Committed,
            Err(err) => {
                // The audio pool grows, so this is never routine congestion.
                log::error!("[Encoder] audio buffer commit failed: {}", err);
                CaptureStatus::Dropped
            }
        }
    }
}

impl VideoFrameCallback for PoolCallbacks {
    fn on_video_frame_received(&self, frame: &mut VideoFrame) -> CaptureStatus {
        match self.pools.video.commit(frame) {
            Ok(()) => CaptureStatus::Committed,
            Err(PoolError::Full) => {
                let dropped = self.pools.dropped_video_frames.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("[Encoder] video pool full, dropped frame ({} total)", dropped);
                CaptureStatus::Dropped
            }
            Err(err) => {
                log::error!("[Encoder] video frame commit failed: {}", err);
                CaptureStatus::Dropped
            }
        }
    }
}

/// Encode-pass strategy, selected once at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeStrategy {
    AudioOnly,
    VideoOnly,
    AudioVideo,
    Dash,
}

/// Muxer layout: one shared muxer, or per-stream muxers in DASH mode.
enum MuxerSet {
    Single(LiveWebmMuxer),
    Dash { audio: LiveWebmMuxer, video: LiveWebmMuxer },
}

impl MuxerSet {
    fn audio(&mut self) -> &mut LiveWebmMuxer {
        match self {
            Self::Single(muxer) => muxer,
            Self::Dash { audio, .. } => audio,
        }
    }

    fn video(&mut self) -> &mut LiveWebmMuxer {
        match self {
            Self::Single(muxer) => muxer,
            Self::Dash { video, .. } => video,
        }
    }
}

/// Top-level live WebM encoder.
pub struct WebmEncoder {
    config: EncoderConfig,
    actual_audio_config: Option<AudioConfig>,
    actual_video_config: Option<VideoConfig>,
    control: Arc<Mutex<ControlState>>,
    pools: Arc<Pools>,
    loop_state: Option<EncodeLoop>,
    thread: Option<JoinHandle<()>>,
}

impl WebmEncoder {
    /// Connects the capture source, negotiates formats, sizes the pools,
    /// initializes codecs and muxer(s), and selects the encode strategy.
    ///
    /// Codec backends are only required for the enabled streams.
    pub fn init(
        config: EncoderConfig,
        mut source: Box<dyn MediaSource>,
        sinks: SinkSet,
        audio_backend: Option<Box<dyn VorbisAnalyzer>>,
        video_backend: Option<Box<dyn VpxCodec>>,
    ) -> EncoderResult<Self> {
        if config.disable_audio && config.disable_video {
            return Err(EncoderError::Config("audio and video are both disabled".into()));
        }
        if sinks.is_empty() {
            return Err(EncoderError::Config("no data sink registered".into()));
        }

        let options = SourceOptions {
            audio_device_name: config.audio_device_name.clone(),
            video_device_name: config.video_device_name.clone(),
            manual_audio_config: config.manual_audio_config,
            manual_video_config: config.manual_video_config,
            requested_audio_config: (!config.disable_audio)
                .then_some(config.requested_audio_config),
            requested_video_config: (!config.disable_video)
                .then_some(config.requested_video_config),
        };
        source.connect(&options)?;

        let actual_audio_config = (!config.disable_audio)
            .then(|| {
                source.actual_audio_config().ok_or_else(|| {
                    EncoderError::InitFailed("source reported no audio config".into())
                })
            })
            .transpose()?;
        let actual_video_config = (!config.disable_video)
            .then(|| {
                source.actual_video_config().ok_or_else(|| {
                    EncoderError::InitFailed("source reported no video config".into())
                })
            })
            .transpose()?;

        // Video buffering: default slots when audio is disabled, otherwise
        // about half a second of frames while video waits for audio.
        let video_slots = match (&actual_video_config, config.disable_audio) {
            (Some(_), true) | (None, _) => DEFAULT_BUFFER_COUNT,
            (Some(video), false) => ((video.frame_rate / 2.0) as usize).max(1),
        };
        let pools = Arc::new(Pools {
            audio: BufferPool::new(true, DEFAULT_BUFFER_COUNT),
            video: BufferPool::new(false, video_slots),
            dropped_video_frames: AtomicU64::new(0),
        });

        let vorbis = actual_audio_config
            .as_ref()
            .map(|audio_config| {
                let backend = audio_backend.ok_or(CodecError::BackendUnavailable("libvorbis"));
                backend
                    .and_then(|backend| VorbisEncoder::init(backend, audio_config, &config.vorbis))
                    .map_err(EncoderError::AudioCodec)
            })
            .transpose()?;
        let vpx = actual_video_config
            .as_ref()
            .map(|video_config| {
                let backend = video_backend.ok_or(CodecError::BackendUnavailable("libvpx"));
                backend
                    .and_then(|backend| VpxEncoder::init(backend, video_config, &config.vpx))
                    .map_err(EncoderError::VideoCodec)
            })
            .transpose()?;

        let muxers = Self::build_muxers(&config, &actual_audio_config, &actual_video_config, &vorbis)?;
        if config.dash_encode {
            Self::write_dash_manifest(&config, &actual_audio_config, &actual_video_config)?;
        }

        let strategy = match (&actual_audio_config, &actual_video_config) {
            _ if config.dash_encode => EncodeStrategy::Dash,
            (Some(_), Some(_)) => EncodeStrategy::AudioVideo,
            (Some(_), None) => EncodeStrategy::AudioOnly,
            (None, Some(_)) => EncodeStrategy::VideoOnly,
            (None, None) => unreachable!("both streams disabled is rejected above"),
        };
        log::info!("[Encoder] init complete, strategy {:?}", strategy);

        let control = Arc::new(Mutex::new(ControlState {
            stop: false,
            encoded_duration_ms: 0,
            error: None,
        }));

        let loop_state = EncodeLoop {
            control: Arc::clone(&control),
            pools: Arc::clone(&pools),
            source,
            sinks,
            strategy,
            muxers,
            vorbis,
            vpx,
            audio_enabled: actual_audio_config.is_some(),
            video_enabled: actual_video_config.is_some(),
            dash_name: config.dash_name.clone(),
            raw_audio: AudioBuffer::default(),
            vorbis_out: AudioBuffer::default(),
            raw_frame: VideoFrame::default(),
            vpx_frame: VideoFrame::default(),
            chunk_buffer: vec![0; DEFAULT_CHUNK_BUFFER_SIZE],
            timestamp_offset: 0,
            chunk_counter: 0,
            audio_chunk_counter: 0,
            video_chunk_counter: 0,
        };

        Ok(Self {
            config,
            actual_audio_config,
            actual_video_config,
            control,
            pools,
            loop_state: Some(loop_state),
            thread: None,
        })
    }

    /// Spawns the encoder thread. Capture starts pushing buffers once the
    /// thread has started the media source.
    pub fn run(&mut self) -> EncoderResult<()> {
        let Some(loop_state) = self.loop_state.take() else {
            return Err(EncoderError::InitFailed("encoder already running".into()));
        };
        let thread = std::thread::Builder::new()
            .name("encoder".into())
            .spawn(move || loop_state.thread_main())
            .map_err(|err| EncoderError::InitFailed(format!("cannot spawn encoder: {err}")))?;
        self.thread = Some(thread);
        Ok(())
    }

    /// Requests stop and joins the encoder thread. Calling it again (or
    /// without `run`) returns cleanly.
    pub fn stop(&mut self) {
        {
            self.control.lock().stop = true;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[Encoder] encoder thread panicked");
            }
        }
    }

    /// Duration of media handed to the muxer so far, in milliseconds.
    pub fn encoded_duration(&self) -> i64 {
        self.control.lock().encoded_duration_ms
    }

    /// Takes the error that terminated the encode loop, if any.
    pub fn take_error(&self) -> Option<EncoderError> {
        self.control.lock().error.take()
    }

    /// Video frames rejected because the pool was full.
    pub fn dropped_video_frames(&self) -> u64 {
        self.pools.dropped_video_frames.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn actual_audio_config(&self) -> Option<&AudioConfig> {
        self.actual_audio_config.as_ref()
    }

    pub fn actual_video_config(&self) -> Option<&VideoConfig> {
        self.actual_video_config.as_ref()
    }

    fn build_muxers(
        config: &EncoderConfig,
        audio: &Option<AudioConfig>,
        video: &Option<VideoConfig>,
        vorbis: &Option<VorbisEncoder>,
    ) -> EncoderResult<MuxerSet> {
        let cluster_duration = config.vpx.keyframe_interval;
        if config.dash_encode {
            let mut audio_muxer = LiveWebmMuxer::new(cluster_duration)?;
            let mut video_muxer = LiveWebmMuxer::new(cluster_duration)?;
            if let (Some(audio_config), Some(vorbis)) = (audio, vorbis) {
                audio_muxer.add_audio_track(audio_config, vorbis.headers())?;
            }
            if let Some(video_config) = video {
                video_muxer.add_video_track(video_config, config.vpx.codec)?;
            }
            Ok(MuxerSet::Dash { audio: audio_muxer, video: video_muxer })
        } else {
            let mut muxer = LiveWebmMuxer::new(cluster_duration)?;
            if let Some(video_config) = video {
                muxer.add_video_track(video_config, config.vpx.codec)?;
            }
            if let (Some(audio_config), Some(vorbis)) = (audio, vorbis) {
                muxer.add_audio_track(audio_config, vorbis.headers())?;
            }
            Ok(MuxerSet::Single(muxer))
        }
    }

    /// Emits `<dash_dir>/<dash_name>.mpd` before encoding starts. The
    /// manifest describes the video representation when video is enabled,
    /// the audio representation otherwise.
    fn write_dash_manifest(
        config: &EncoderConfig,
        audio: &Option<AudioConfig>,
        video: &Option<VideoConfig>,
    ) -> EncoderResult<()> {
        let stream_kind = if video.is_some() { "video" } else { "audio" };
        let mut writer = DashWriter::default();
        if !writer.init(&config.dash_name, stream_kind) {
            return Err(EncoderError::InitFailed("dash writer init failed".into()));
        }

        let mut dash_config = DashConfig {
            chunk_duration: config.vpx.keyframe_interval.max(0) as u32,
            start_number: config.dash_start_number.clone(),
            rep_id: stream_kind.to_string(),
            content_type: stream_kind.to_string(),
            ..DashConfig::default()
        };
        dash_config.media = writer.media_pattern();
        dash_config.initialization = writer.initialization_name();
        if let Some(video_config) = video {
            dash_config.width = video_config.width;
            dash_config.height = video_config.height;
            dash_config.framerate = video_config.frame_rate as u32;
            dash_config.max_framerate = (video_config.frame_rate as u32).max(1);
            dash_config.codecs = match config.vpx.codec {
                crate::config::VpxCodecId::Vp8 => "vp8".to_string(),
                crate::config::VpxCodecId::Vp9 => "vp9".to_string(),
            };
            dash_config.bandwidth = config.vpx.bitrate * 1000;
        } else if audio.is_some() {
            dash_config.mimetype = "audio/webm".to_string();
            dash_config.codecs = "vorbis".to_string();
            dash_config.bandwidth = config.vorbis.average_bitrate.max(0) as u32 * 1000;
        }

        let mut manifest = String::new();
        if !writer.write_manifest(&dash_config, &mut manifest) {
            return Err(EncoderError::InitFailed("dash manifest generation failed".into()));
        }
        let path = std::path::Path::new(&config.dash_dir)
            .join(format!("{}.mpd", config.dash_name));
        std::fs::write(&path, manifest)
            .map_err(|err| EncoderError::InitFailed(format!("cannot write manifest: {err}")))?;
        log::info!("[Encoder] wrote DASH manifest {}", path.display());
        Ok(())
    }
}

impl Drop for WebmEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the encoder thread.
struct EncodeLoop {
    control: Arc<Mutex<ControlState>>,
    pools: Arc<Pools>,
    source: Box<dyn MediaSource>,
    sinks: SinkSet,
    strategy: EncodeStrategy,
    muxers: MuxerSet,
    vorbis: Option<VorbisEncoder>,
    vpx: Option<VpxEncoder>,
    audio_enabled: bool,
    video_enabled: bool,
    dash_name: String,
    raw_audio: AudioBuffer,
    vorbis_out: AudioBuffer,
    raw_frame: VideoFrame,
    vpx_frame: VideoFrame,
    chunk_buffer: Vec<u8>,
    timestamp_offset: i64,
    chunk_counter: u64,
    audio_chunk_counter: u64,
    video_chunk_counter: u64,
}

impl EncodeLoop {
    fn thread_main(mut self) {
        log::info!("[Encoder] encoder thread started");
        if let Err(err) = self.run_loop() {
            log::error!("[Encoder] encoder thread stopping on error: {}", err);
            self.control.lock().error = Some(err);
        }
        self.source.stop();
        log::info!("[Encoder] encoder thread finished");
    }

    fn run_loop(&mut self) -> EncoderResult<()> {
        let callbacks = Arc::new(PoolCallbacks { pools: Arc::clone(&self.pools) });
        let audio_callback: Option<Arc<dyn AudioSamplesCallback>> =
            self.audio_enabled.then(|| callbacks.clone() as Arc<dyn AudioSamplesCallback>);
        let video_callback: Option<Arc<dyn VideoFrameCallback>> =
            self.video_enabled.then(|| callbacks.clone() as Arc<dyn VideoFrameCallback>);
        self.source.run(audio_callback, video_callback)?;

        if !self.wait_for_samples()? {
            // Stop requested before any media arrived.
            return Ok(());
        }

        let mut user_initiated_stop = false;
        loop {
            if self.stop_requested() {
                log::info!("[Encoder] stop requested, leaving encode loop");
                user_initiated_stop = true;
                break;
            }
            self.source.check_status()?;

            match self.strategy {
                EncodeStrategy::AudioOnly => self.audio_only_pass()?,
                EncodeStrategy::VideoOnly => self.encode_video_frame()?,
                EncodeStrategy::AudioVideo => self.av_pass()?,
                EncodeStrategy::Dash => self.dash_pass()?,
            }

            if self.sinks.any_ready() {
                self.deliver_ready_chunks()?;
            }

            if self.pools.audio.is_empty() && self.pools.video.is_empty() {
                std::thread::sleep(IDLE_SLEEP);
            }
        }

        if user_initiated_stop {
            self.finish()?;
        }
        Ok(())
    }

    /// Blocks until every enabled pool has at least one buffer, then derives
    /// the timestamp offset that lifts negative capture timestamps to zero.
    /// Returns false when stop was requested while waiting.
    fn wait_for_samples(&mut self) -> EncoderResult<bool> {
        let mut got_audio = !self.audio_enabled;
        let mut got_video = !self.video_enabled;
        loop {
            if self.stop_requested() {
                return Ok(false);
            }
            got_audio = got_audio || !self.pools.audio.is_empty();
            got_video = got_video || !self.pools.video.is_empty();
            if got_audio && got_video {
                break;
            }
            std::thread::sleep(IDLE_SLEEP);
        }

        let first_audio_ts =
            if self.audio_enabled { self.pools.audio.active_timestamp()? } else { 0 };
        let first_video_ts =
            if self.video_enabled { self.pools.video.active_timestamp()? } else { 0 };

        self.timestamp_offset = if first_audio_ts < 0 && first_video_ts < 0 {
            first_audio_ts.abs().max(first_video_ts.abs())
        } else if first_audio_ts < 0 {
            first_audio_ts.abs()
        } else if first_video_ts < 0 {
            first_video_ts.abs()
        } else {
            0
        };
        log::info!("[Encoder] timestamp offset {} ms", self.timestamp_offset);
        Ok(true)
    }

    fn stop_requested(&self) -> bool {
        self.control.try_lock().map(|control| control.stop).unwrap_or(false)
    }

    /// Feeds one raw audio buffer to the Vorbis encoder, if one is waiting.
    fn encode_audio_buffer(&mut self) -> EncoderResult<()> {
        match self.pools.audio.decommit(&mut self.raw_audio) {
            Ok(()) => {}
            Err(PoolError::Empty) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        let offset_ts = self.raw_audio.timestamp() + self.timestamp_offset;
        self.raw_audio.set_timestamp(offset_ts);

        let vorbis = self
            .vorbis
            .as_mut()
            .ok_or_else(|| EncoderError::InitFailed("audio path without encoder".into()))?;
        vorbis.encode(&self.raw_audio).map_err(EncoderError::AudioCodec)
    }

    /// Audio-only pass: one raw buffer in, every available packet out.
    fn audio_only_pass(&mut self) -> EncoderResult<()> {
        self.encode_audio_buffer()?;
        loop {
            let vorbis = self
                .vorbis
                .as_mut()
                .ok_or_else(|| EncoderError::InitFailed("audio path without encoder".into()))?;
            match vorbis.read_compressed(&mut self.vorbis_out) {
                Ok(()) => {
                    self.muxers.audio().write_audio_buffer(&self.vorbis_out)?;
                    self.set_encoded_duration(self.vorbis_out.timestamp());
                }
                Err(CodecError::NoSamples) => break,
                Err(err) => return Err(EncoderError::AudioCodec(err)),
            }
        }
        Ok(())
    }

    /// Interleaved A+V pass.
    ///
    /// Keeps the muxer's per-track timestamps monotonic without buffering in
    /// the muxer itself: compressed audio is written only while it does not
    /// run ahead of the next video frame, one video frame is encoded when
    /// doing so cannot skip over pending audio, and an overshooting audio
    /// packet is held back and written after the video step.
    fn av_pass(&mut self) -> EncoderResult<()> {
        self.encode_audio_buffer()?;

        let video_timestamp = match self.pools.video.active_timestamp() {
            Ok(ts) => ts + self.timestamp_offset,
            Err(PoolError::Empty) => {
                self.vpx.as_ref().map_or(0, VpxEncoder::last_timestamp_ms)
            }
            Err(err) => return Err(err.into()),
        };

        let mut vorbis_buffered = false;
        loop {
            let vorbis = self
                .vorbis
                .as_mut()
                .ok_or_else(|| EncoderError::InitFailed("audio path without encoder".into()))?;
            match vorbis.read_compressed(&mut self.vorbis_out) {
                Ok(()) => {
                    if self.vorbis_out.timestamp() <= video_timestamp {
                        self.muxers.audio().write_audio_buffer(&self.vorbis_out)?;
                        self.set_encoded_duration(self.vorbis_out.timestamp());
                    } else {
                        // Hold this packet until the video frame of the same
                        // instant has been muxed.
                        vorbis_buffered = true;
                        break;
                    }
                }
                Err(CodecError::NoSamples) => break,
                Err(err) => return Err(EncoderError::AudioCodec(err)),
            }
        }

        self.drop_late_video_frames();

        let time_encoded = self.vorbis.as_ref().map_or(0, VorbisEncoder::time_encoded_ms);
        if video_timestamp <= time_encoded {
            self.encode_video_frame()?;
        }

        if vorbis_buffered {
            self.muxers.audio().write_audio_buffer(&self.vorbis_out)?;
            self.set_encoded_duration(self.vorbis_out.timestamp());
        }
        Ok(())
    }

    /// DASH pass: the audio-only and video-only passes against independent
    /// muxers; each muxer orders its own track.
    fn dash_pass(&mut self) -> EncoderResult<()> {
        if self.audio_enabled {
            self.audio_only_pass()?;
        }
        if self.video_enabled {
            self.drop_late_video_frames();
            self.encode_video_frame()?;
        }
        Ok(())
    }

    /// Discards queued frames that are already behind the muxer; they could
    /// no longer be written in order.
    fn drop_late_video_frames(&mut self) {
        let muxer_time = self.muxers.video().current_time_ms();
        while let Ok(ts) = self.pools.video.active_timestamp() {
            if ts + self.timestamp_offset < muxer_time {
                log::warn!(
                    "[Encoder] dropping late video frame ({} ms < muxer {} ms)",
                    ts + self.timestamp_offset,
                    muxer_time
                );
                self.pools.video.drop_active();
            } else {
                break;
            }
        }
    }

    /// Pulls one raw frame, compresses it, and writes it to the muxer.
    /// An empty pool or a decimated frame is not an error.
    fn encode_video_frame(&mut self) -> EncoderResult<()> {
        match self.pools.video.decommit(&mut self.raw_frame) {
            Ok(()) => {}
            Err(PoolError::Empty) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        let offset_ts = self.raw_frame.timestamp() + self.timestamp_offset;
        self.raw_frame.set_timestamp(offset_ts);

        let vpx = self
            .vpx
            .as_mut()
            .ok_or_else(|| EncoderError::InitFailed("video path without encoder".into()))?;
        match vpx
            .encode_frame(&self.raw_frame, &mut self.vpx_frame)
            .map_err(EncoderError::VideoCodec)?
        {
            VideoEncodeOutcome::Dropped => Ok(()),
            VideoEncodeOutcome::Encoded => {
                self.max_encoded_duration(self.vpx_frame.timestamp());
                self.muxers.video().write_video_frame(&self.vpx_frame)?;
                Ok(())
            }
        }
    }

    /// Drains every complete chunk from the muxer(s) into the sinks.
    fn deliver_ready_chunks(&mut self) -> EncoderResult<()> {
        match self.strategy {
            EncodeStrategy::Dash => {
                self.deliver_from(MuxerKind::DashAudio)?;
                self.deliver_from(MuxerKind::DashVideo)?;
            }
            _ => self.deliver_from(MuxerKind::Single)?,
        }
        Ok(())
    }

    fn finish(&mut self) -> EncoderResult<()> {
        match self.strategy {
            EncodeStrategy::Dash => {
                self.muxers.audio().finalize()?;
                self.muxers.video().finalize()?;
            }
            _ => self.muxers.audio().finalize()?,
        }

        // Give every sink a chance to catch up before the last delivery, but
        // never hang the stop path on a stuck sink.
        let deadline = Instant::now() + FINAL_CHUNK_WAIT;
        while !self.sinks.all_ready() && Instant::now() < deadline {
            std::thread::sleep(IDLE_SLEEP);
        }
        if !self.sinks.all_ready() {
            log::warn!("[Encoder] sinks still busy at stop, delivering final chunk anyway");
        }

        self.deliver_ready_chunks()
    }

    fn deliver_from(&mut self, kind: MuxerKind) -> EncoderResult<()> {
        loop {
            let muxer = match kind {
                MuxerKind::Single | MuxerKind::DashAudio => self.muxers.audio(),
                MuxerKind::DashVideo => self.muxers.video(),
            };
            let Some(chunk_length) = muxer.chunk_ready() else { break };

            if self.chunk_buffer.len() < chunk_length {
                self.chunk_buffer.resize(chunk_length * 2, 0);
            }
            let muxer = match kind {
                MuxerKind::Single | MuxerKind::DashAudio => self.muxers.audio(),
                MuxerKind::DashVideo => self.muxers.video(),
            };
            muxer.read_chunk(&mut self.chunk_buffer[..])?;

            let id = match kind {
                MuxerKind::Single => {
                    let id = format!("chunk_{}", self.chunk_counter);
                    self.chunk_counter += 1;
                    id
                }
                MuxerKind::DashAudio => {
                    let id = format!("{}_audio_{}.webm", self.dash_name, self.audio_chunk_counter);
                    self.audio_chunk_counter += 1;
                    id
                }
                MuxerKind::DashVideo => {
                    let id = format!("{}_video_{}.webm", self.dash_name, self.video_chunk_counter);
                    self.video_chunk_counter += 1;
                    id
                }
            };
            log::debug!("[Encoder] delivering chunk {} ({} bytes)", id, chunk_length);
            self.sinks
                .write_chunk(id, Bytes::copy_from_slice(&self.chunk_buffer[..chunk_length]));
        }
        Ok(())
    }

    fn set_encoded_duration(&self, timestamp_ms: i64) {
        if let Some(mut control) = self.control.try_lock() {
            control.encoded_duration_ms = timestamp_ms;
        }
    }

    fn max_encoded_duration(&self, timestamp_ms: i64) {
        if let Some(mut control) = self.control.try_lock() {
            control.encoded_duration_ms = control.encoded_duration_ms.max(timestamp_ms);
        }
    }
}

#[derive(Clone, Copy)]
enum MuxerKind {
    Single,
    DashAudio,
    DashVideo,
}
