//! The capture seam.
//!
//! Platform capture backends live outside this crate; everything the pipeline
//! needs from them is expressed here. A source is connected once with the
//! encoder's callbacks, negotiates its actual formats, and then pushes
//! buffers from its own threads until stopped.

use std::sync::Arc;

use crate::config::{AudioConfig, VideoConfig};
use crate::error::SourceError;
use crate::media::{AudioBuffer, VideoFrame};

/// Result of handing a buffer to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Buffer accepted; its storage was recycled into the caller.
    Committed,
    /// Buffer rejected because the pipeline is congested. Video frames are
    /// intentionally lossy; sources should count and move on.
    Dropped,
}

/// Receives audio buffers from capture threads.
///
/// The buffer argument is mutable so the pipeline can recycle storage into
/// it via destructive swap.
pub trait AudioSamplesCallback: Send + Sync {
    fn on_samples_received(&self, buffer: &mut AudioBuffer) -> CaptureStatus;
}

/// Receives video frames from capture threads.
pub trait VideoFrameCallback: Send + Sync {
    fn on_video_frame_received(&self, frame: &mut VideoFrame) -> CaptureStatus;
}

/// Options handed to the source at connect time.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    pub audio_device_name: Option<String>,
    pub video_device_name: Option<String>,
    /// Ask the source to present its own configuration interface instead of
    /// (or in addition to) honoring the requested configs.
    pub manual_audio_config: bool,
    pub manual_video_config: bool,
    pub requested_audio_config: Option<AudioConfig>,
    pub requested_video_config: Option<VideoConfig>,
}

/// A capture backend.
///
/// Lifecycle: `connect` negotiates device formats, the pipeline sizes its
/// buffer pools from the actual configs, then `run` attaches the callbacks
/// and starts the capture threads.
pub trait MediaSource: Send {
    /// Opens the capture devices and negotiates formats.
    fn connect(&mut self, options: &SourceOptions) -> Result<(), SourceError>;

    /// The negotiated audio format. `None` when audio is disabled or not yet
    /// connected.
    fn actual_audio_config(&self) -> Option<AudioConfig>;

    /// The negotiated video format. `None` when video is disabled or not yet
    /// connected.
    fn actual_video_config(&self) -> Option<VideoConfig>;

    /// Starts capture; buffers begin arriving on the callbacks from the
    /// source's own threads. Passing `None` for a callback disables that
    /// stream.
    fn run(
        &mut self,
        audio: Option<Arc<dyn AudioSamplesCallback>>,
        video: Option<Arc<dyn VideoFrameCallback>>,
    ) -> Result<(), SourceError>;

    /// Health check polled from the encoder loop.
    fn check_status(&self) -> Result<(), SourceError>;

    /// Stops capture. Must be idempotent.
    fn stop(&mut self);
}
