//! webmcast-capture - capture backends behind the `MediaSource` seam.
//!
//! Provides a [`CaptureSource`] combining:
//! - audio input through cpal when built with the `cpal` feature, a paced
//!   synthetic test tone otherwise;
//! - a synthetic moving test-pattern video source, standing in wherever no
//!   platform camera capture is wired up.
//!
//! All sources push buffers into the pipeline from their own threads, with
//! timestamps derived from delivered sample counts and frame indices.

#[cfg(feature = "cpal")]
mod audio;
mod tone;
mod video;

use std::sync::Arc;

use webmcast_core::error::SourceError;
use webmcast_core::source::{
    AudioSamplesCallback, MediaSource, SourceOptions, VideoFrameCallback,
};
use webmcast_core::{AudioConfig, VideoConfig};

#[cfg(feature = "cpal")]
pub use audio::audio_input_device_names;

/// Device name selecting the built-in test tone instead of a real device.
pub const TONE_DEVICE_NAME: &str = "tone";

enum AudioSourceKind {
    #[cfg(feature = "cpal")]
    Device(audio::AudioCapture),
    Tone(tone::ToneSource),
}

impl AudioSourceKind {
    fn open(options: &SourceOptions, requested: &AudioConfig) -> Result<Self, SourceError> {
        if options.audio_device_name.as_deref() == Some(TONE_DEVICE_NAME) {
            return Ok(Self::Tone(tone::ToneSource::new(requested)));
        }
        #[cfg(feature = "cpal")]
        {
            Ok(Self::Device(audio::AudioCapture::open(
                options.audio_device_name.as_deref(),
                requested,
            )?))
        }
        #[cfg(not(feature = "cpal"))]
        {
            if options.audio_device_name.is_some() {
                log::info!("[Capture] built without device capture, using the test tone");
            }
            Ok(Self::Tone(tone::ToneSource::new(requested)))
        }
    }

    fn actual_config(&self) -> AudioConfig {
        match self {
            #[cfg(feature = "cpal")]
            Self::Device(capture) => capture.actual_config(),
            Self::Tone(tone) => tone.actual_config(),
        }
    }

    fn start(&mut self, callback: Arc<dyn AudioSamplesCallback>) -> Result<(), SourceError> {
        match self {
            #[cfg(feature = "cpal")]
            Self::Device(capture) => capture.start(callback),
            Self::Tone(tone) => tone.start(callback),
        }
    }

    fn check_status(&self) -> Result<(), SourceError> {
        match self {
            #[cfg(feature = "cpal")]
            Self::Device(capture) => capture.check_status(),
            Self::Tone(tone) => tone.check_status(),
        }
    }

    fn stop(&mut self) {
        match self {
            #[cfg(feature = "cpal")]
            Self::Device(capture) => capture.stop(),
            Self::Tone(tone) => tone.stop(),
        }
    }
}

/// Capture backend combining the audio source with the synthetic video
/// source.
#[derive(Default)]
pub struct CaptureSource {
    audio: Option<AudioSourceKind>,
    video: Option<video::TestPatternSource>,
}

impl CaptureSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaSource for CaptureSource {
    fn connect(&mut self, options: &SourceOptions) -> Result<(), SourceError> {
        if options.manual_audio_config || options.manual_video_config {
            log::warn!("[Capture] manual configuration UI not available, using requested configs");
        }
        if let Some(requested) = &options.requested_audio_config {
            self.audio = Some(AudioSourceKind::open(options, requested)?);
        }
        if let Some(requested) = &options.requested_video_config {
            self.video = Some(video::TestPatternSource::new(requested));
            if options.video_device_name.is_some() {
                log::warn!("[Capture] video device capture not wired up, using test pattern");
            }
        }
        Ok(())
    }

    fn actual_audio_config(&self) -> Option<AudioConfig> {
        self.audio.as_ref().map(AudioSourceKind::actual_config)
    }

    fn actual_video_config(&self) -> Option<VideoConfig> {
        self.video.as_ref().map(video::TestPatternSource::actual_config)
    }

    fn run(
        &mut self,
        audio: Option<Arc<dyn AudioSamplesCallback>>,
        video: Option<Arc<dyn VideoFrameCallback>>,
    ) -> Result<(), SourceError> {
        match (self.audio.as_mut(), audio) {
            (Some(source), Some(callback)) => source.start(callback)?,
            (Some(_), None) => log::warn!("[Capture] audio connected but no callback attached"),
            _ => {}
        }
        match (self.video.as_mut(), video) {
            (Some(source), Some(callback)) => source.start(callback)?,
            (Some(_), None) => log::warn!("[Capture] video connected but no callback attached"),
            _ => {}
        }
        Ok(())
    }

    fn check_status(&self) -> Result<(), SourceError> {
        if let Some(source) = &self.audio {
            source.check_status()?;
        }
        if let Some(source) = &self.video {
            source.check_status()?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(source) = self.audio.as_mut() {
            source.stop();
        }
        if let Some(source) = self.video.as_mut() {
            source.stop();
        }
    }
}
