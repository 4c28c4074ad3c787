//! Synthetic video source.
//!
//! Generates a moving I420 test pattern at the requested geometry and frame
//! rate. Stands in for platform camera capture behind the same seam, and
//! gives the pipeline a deterministic video feed for soak testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use webmcast_core::error::SourceError;
use webmcast_core::media::VideoFrame;
use webmcast_core::source::VideoFrameCallback;
use webmcast_core::{PixelFormat, VideoConfig};

pub struct TestPatternSource {
    config: VideoConfig,
    stop: Arc<AtomicBool>,
    error: Arc<Mutex<Option<SourceError>>>,
    thread: Option<JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new(requested: &VideoConfig) -> Self {
        let width = if requested.width > 0 { requested.width } else { 640 };
        let height = if requested.height > 0 { requested.height } else { 480 };
        let frame_rate = if requested.frame_rate > 0.0 { requested.frame_rate } else { 30.0 };
        let config =
            VideoConfig { format: PixelFormat::I420, width, height, stride: width, frame_rate };
        log::info!(
            "[Capture] test pattern video: {}x{} @ {} fps",
            width,
            height,
            frame_rate
        );
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
            thread: None,
        }
    }

    pub fn actual_config(&self) -> VideoConfig {
        self.config
    }

    pub fn start(&mut self, callback: Arc<dyn VideoFrameCallback>) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::SeqCst);

        let config = self.config;
        let stop = Arc::clone(&self.stop);
        let thread = std::thread::Builder::new()
            .name("video-capture".into())
            .spawn(move || pattern_thread(config, callback, stop))
            .map_err(|err| SourceError::Failed(format!("cannot spawn video thread: {err}")))?;
        self.thread = Some(thread);
        Ok(())
    }

    pub fn check_status(&self) -> Result<(), SourceError> {
        match self.error.lock() {
            Ok(guard) => guard.clone().map_or(Ok(()), Err),
            Err(_) => Err(SourceError::Failed("video source state poisoned".into())),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pattern_thread(config: VideoConfig, callback: Arc<dyn VideoFrameCallback>, stop: Arc<AtomicBool>) {
    let frame_interval = Duration::from_secs_f64(1.0 / config.frame_rate);
    let frame_duration_ms = (1000.0 / config.frame_rate).round() as i64;
    let start = Instant::now();
    let mut frame = VideoFrame::default();
    let mut pattern = vec![0u8; i420_len(&config)];
    let mut frame_index: u64 = 0;
    let mut dropped: u64 = 0;

    log::info!("[Capture] test pattern running");
    while !stop.load(Ordering::SeqCst) {
        let timestamp_ms = (frame_index as f64 * 1000.0 / config.frame_rate) as i64;
        fill_pattern(&config, frame_index, &mut pattern);
        if frame
            .init(config, false, timestamp_ms, frame_duration_ms, &pattern)
            .is_ok()
            && callback.on_video_frame_received(&mut frame)
                == webmcast_core::source::CaptureStatus::Dropped
        {
            dropped += 1;
            if dropped % 100 == 1 {
                log::debug!("[Capture] {} pattern frames dropped so far", dropped);
            }
        }
        frame_index += 1;

        let next_frame_at = start + frame_interval.mul_f64(frame_index as f64);
        let now = Instant::now();
        if next_frame_at > now {
            std::thread::sleep(next_frame_at - now);
        }
    }
    log::info!("[Capture] test pattern stopped after {} frames", frame_index);
}

fn i420_len(config: &VideoConfig) -> usize {
    let width = config.width as usize;
    let height = config.height as usize;
    width * height + 2 * (width.div_ceil(2) * height.div_ceil(2))
}

/// Diagonal luma gradient scrolling one pixel per frame, chroma sweeping
/// slowly so every plane changes over time.
fn fill_pattern(config: &VideoConfig, frame_index: u64, out: &mut [u8]) {
    let width = config.width as usize;
    let height = config.height as usize;
    let chroma_w = width.div_ceil(2);
    let chroma_h = height.div_ceil(2);
    let shift = frame_index as usize;

    let (luma, chroma) = out.split_at_mut(width * height);
    for row in 0..height {
        for col in 0..width {
            luma[row * width + col] = ((row + col + shift) & 0xFF) as u8;
        }
    }
    let (u_plane, v_plane) = chroma.split_at_mut(chroma_w * chroma_h);
    let u_value = (64 + (frame_index / 4) % 128) as u8;
    let v_value = (192u64.wrapping_sub(frame_index / 4) % 256) as u8;
    u_plane.fill(u_value);
    v_plane.fill(v_value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use webmcast_core::source::CaptureStatus;

    struct CollectingCallback {
        frames: AtomicUsize,
        last_timestamp: Mutex<i64>,
    }

    impl VideoFrameCallback for CollectingCallback {
        fn on_video_frame_received(&self, frame: &mut VideoFrame) -> CaptureStatus {
            self.frames.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut last) = self.last_timestamp.lock() {
                *last = frame.timestamp();
            }
            CaptureStatus::Committed
        }
    }

    #[test]
    fn produces_frames_at_configured_geometry() {
        let requested = VideoConfig {
            format: PixelFormat::I420,
            width: 64,
            height: 48,
            stride: 64,
            frame_rate: 100.0,
        };
        let mut source = TestPatternSource::new(&requested);
        assert_eq!(source.actual_config().stride, 64);

        let callback = Arc::new(CollectingCallback {
            frames: AtomicUsize::new(0),
            last_timestamp: Mutex::new(0),
        });
        source.start(callback.clone()).expect("start");
        std::thread::sleep(Duration::from_millis(120));
        source.stop();

        let frames = callback.frames.load(Ordering::SeqCst);
        assert!(frames >= 5, "expected several frames, got {frames}");
        let last = *callback.last_timestamp.lock().expect("lock");
        // 100 fps: timestamps advance in 10 ms steps.
        assert_eq!(last % 10, 0);
    }

    #[test]
    fn pattern_changes_between_frames() {
        let config = VideoConfig {
            format: PixelFormat::I420,
            width: 16,
            height: 16,
            stride: 16,
            frame_rate: 30.0,
        };
        let mut first = vec![0u8; i420_len(&config)];
        let mut second = vec![0u8; i420_len(&config)];
        fill_pattern(&config, 0, &mut first);
        fill_pattern(&config, 1, &mut second);
        assert_ne!(first, second);
    }
}
