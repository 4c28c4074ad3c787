//! Synthetic audio source.
//!
//! Generates a paced 440 Hz PCM-16 test tone at the requested rate and
//! channel count. The default audio backend when the crate is built without
//! the `cpal` feature, and a deterministic signal for soak testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use webmcast_core::error::SourceError;
use webmcast_core::media::AudioBuffer;
use webmcast_core::source::AudioSamplesCallback;
use webmcast_core::{AudioConfig, AudioFormat};

const TONE_FREQUENCY_HZ: f64 = 440.0;
const BUFFER_MS: u64 = 20;

pub struct ToneSource {
    config: AudioConfig,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ToneSource {
    pub fn new(requested: &AudioConfig) -> Self {
        let sample_rate = if requested.sample_rate > 0 { requested.sample_rate } else { 44_100 };
        let channels = requested.channels.clamp(1, 2);
        let mut config = AudioConfig::pcm16(sample_rate, channels);
        config.format = AudioFormat::Pcm;
        log::info!("[Capture] test tone audio: {} Hz, {} ch", sample_rate, channels);
        Self { config, stop: Arc::new(AtomicBool::new(false)), thread: None }
    }

    pub fn actual_config(&self) -> AudioConfig {
        self.config
    }

    pub fn start(&mut self, callback: Arc<dyn AudioSamplesCallback>) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::SeqCst);

        let config = self.config;
        let stop = Arc::clone(&self.stop);
        let thread = std::thread::Builder::new()
            .name("audio-tone".into())
            .spawn(move || tone_thread(config, callback, stop))
            .map_err(|err| SourceError::Failed(format!("cannot spawn tone thread: {err}")))?;
        self.thread = Some(thread);
        Ok(())
    }

    pub fn check_status(&self) -> Result<(), SourceError> {
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tone_thread(config: AudioConfig, callback: Arc<dyn AudioSamplesCallback>, stop: Arc<AtomicBool>) {
    let frames_per_buffer = (u64::from(config.sample_rate) * BUFFER_MS / 1000) as usize;
    let channels = usize::from(config.channels);
    let rate = f64::from(config.sample_rate);
    let start = Instant::now();

    let mut buffer = AudioBuffer::default();
    let mut samples = vec![0i16; frames_per_buffer * channels];
    let mut frames_delivered: u64 = 0;

    log::info!("[Capture] test tone running");
    while !stop.load(Ordering::SeqCst) {
        for i in 0..frames_per_buffer {
            let t = (frames_delivered + i as u64) as f64 / rate;
            let value =
                ((t * TONE_FREQUENCY_HZ * std::f64::consts::TAU).sin() * 8192.0) as i16;
            for channel in 0..channels {
                samples[i * channels + channel] = value;
            }
        }
        let timestamp_ms = (frames_delivered * 1000 / u64::from(config.sample_rate)) as i64;
        buffer.init(config, timestamp_ms, BUFFER_MS as i64, bytemuck::cast_slice(&samples));
        callback.on_samples_received(&mut buffer);
        frames_delivered += frames_per_buffer as u64;

        let next_buffer_at =
            start + Duration::from_millis(frames_delivered * 1000 / u64::from(config.sample_rate));
        let now = Instant::now();
        if next_buffer_at > now {
            std::thread::sleep(next_buffer_at - now);
        }
    }
    log::info!("[Capture] test tone stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use webmcast_core::source::CaptureStatus;

    struct CollectingCallback {
        buffers: AtomicUsize,
        last: Mutex<(i64, usize)>,
    }

    impl AudioSamplesCallback for CollectingCallback {
        fn on_samples_received(&self, buffer: &mut AudioBuffer) -> CaptureStatus {
            self.buffers.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut last) = self.last.lock() {
                *last = (buffer.timestamp(), buffer.len());
            }
            CaptureStatus::Committed
        }
    }

    #[test]
    fn tone_delivers_paced_pcm_buffers() {
        let mut source = ToneSource::new(&AudioConfig::pcm16(8000, 1));
        let callback = Arc::new(CollectingCallback {
            buffers: AtomicUsize::new(0),
            last: Mutex::new((0, 0)),
        });
        source.start(callback.clone()).expect("start");
        std::thread::sleep(Duration::from_millis(100));
        source.stop();

        let buffers = callback.buffers.load(Ordering::SeqCst);
        assert!(buffers >= 2, "expected several buffers, got {buffers}");
        let (timestamp, length) = *callback.last.lock().expect("lock");
        // 20 ms at 8 kHz mono PCM-16: 160 frames, 320 bytes.
        assert_eq!(length, 320);
        assert_eq!(timestamp % 20, 0);
    }
}
