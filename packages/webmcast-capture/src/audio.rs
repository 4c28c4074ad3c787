//! cpal audio input capture.
//!
//! The cpal stream object is not `Send`, so the stream is built and kept
//! alive on a dedicated capture thread; samples arrive on cpal's callback and
//! are pushed into the pipeline with timestamps derived from the running
//! sample count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};

use webmcast_core::error::SourceError;
use webmcast_core::media::AudioBuffer;
use webmcast_core::source::AudioSamplesCallback;
use webmcast_core::{AudioConfig, AudioFormat};

/// Names of all available audio input devices.
pub fn audio_input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
        Err(err) => {
            log::error!("[Capture] cannot enumerate input devices: {}", err);
            Vec::new()
        }
    }
}

/// One open audio input device.
pub struct AudioCapture {
    device_name: Option<String>,
    actual_config: AudioConfig,
    sample_format: SampleFormat,
    stop: Arc<AtomicBool>,
    error: Arc<Mutex<Option<SourceError>>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Opens the named device (system default when `None`) and negotiates a
    /// capture format as close as possible to `requested`.
    pub fn open(
        device_name: Option<&str>,
        requested: &AudioConfig,
    ) -> Result<Self, SourceError> {
        let device = find_device(device_name)?;
        let default_config = device.default_input_config().map_err(|err| {
            SourceError::FormatRejected(format!("no default input config: {err}"))
        })?;

        // Keep the device's native sample format; honor the requested rate
        // and channel count.
        let sample_format = match default_config.sample_format() {
            SampleFormat::I16 => SampleFormat::I16,
            SampleFormat::F32 => SampleFormat::F32,
            other => {
                log::info!("[Capture] device format {:?} not supported, using f32", other);
                SampleFormat::F32
            }
        };
        let channels = match requested.channels {
            0 => default_config.channels(),
            requested_channels => requested_channels.min(2),
        };
        let sample_rate = if requested.sample_rate > 0 {
            requested.sample_rate
        } else {
            default_config.sample_rate().0
        };

        let (format, bits_per_sample) = match sample_format {
            SampleFormat::I16 => (AudioFormat::Pcm, 16),
            _ => (AudioFormat::IeeeFloat, 32),
        };
        let block_align = channels * bits_per_sample / 8;
        let actual_config = AudioConfig {
            format,
            channels,
            sample_rate,
            bits_per_sample,
            block_align,
            bytes_per_second: sample_rate * u32::from(block_align),
            channel_mask: 0,
        };
        log::info!(
            "[Capture] audio device {:?}: {:?} {} Hz, {} ch",
            device.name().unwrap_or_else(|_| "<unnamed>".into()),
            format,
            sample_rate,
            channels
        );

        Ok(Self {
            device_name: device_name.map(str::to_string),
            actual_config,
            sample_format,
            stop: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
            thread: None,
        })
    }

    pub fn actual_config(&self) -> AudioConfig {
        self.actual_config
    }

    /// Spawns the capture thread and starts the cpal stream.
    pub fn start(&mut self, callback: Arc<dyn AudioSamplesCallback>) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::SeqCst);

        let device_name = self.device_name.clone();
        let config = self.actual_config;
        let sample_format = self.sample_format;
        let stop = Arc::clone(&self.stop);
        let error = Arc::clone(&self.error);
        let (started_tx, started_rx) = mpsc::channel::<Result<(), SourceError>>();

        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                capture_thread(device_name, config, sample_format, callback, stop, error, started_tx)
            })
            .map_err(|err| SourceError::Failed(format!("cannot spawn capture thread: {err}")))?;
        self.thread = Some(thread);

        match started_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.stop();
                Err(err)
            }
            Err(_) => {
                self.stop();
                Err(SourceError::Failed("audio capture start timed out".into()))
            }
        }
    }

    pub fn check_status(&self) -> Result<(), SourceError> {
        match self.error.lock() {
            Ok(guard) => guard.clone().map_or(Ok(()), Err),
            Err(_) => Err(SourceError::Failed("audio capture state poisoned".into())),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device, SourceError> {
    let host = cpal::default_host();
    match device_name {
        None => host
            .default_input_device()
            .ok_or_else(|| SourceError::NoDevice("no default audio input device".into())),
        Some(name) => {
            let devices = host.input_devices().map_err(|err| {
                SourceError::Failed(format!("cannot enumerate input devices: {err}"))
            })?;
            for device in devices {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(SourceError::NoDevice(name.to_string()))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn capture_thread(
    device_name: Option<String>,
    config: AudioConfig,
    sample_format: SampleFormat,
    callback: Arc<dyn AudioSamplesCallback>,
    stop: Arc<AtomicBool>,
    error: Arc<Mutex<Option<SourceError>>>,
    started_tx: mpsc::Sender<Result<(), SourceError>>,
) {
    let device = match find_device(device_name.as_deref()) {
        Ok(device) => device,
        Err(err) => {
            let _ = started_tx.send(Err(err));
            return;
        }
    };
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let error_slot = Arc::clone(&error);
    let err_fn = move |err: cpal::StreamError| {
        log::error!("[Capture] audio stream error: {}", err);
        if let Ok(mut slot) = error_slot.lock() {
            *slot = Some(SourceError::Failed(err.to_string()));
        }
    };

    let stream = match sample_format {
        SampleFormat::I16 => {
            let mut delivery = SampleDelivery::new(config, callback);
            device.build_input_stream(
                &stream_config,
                move |samples: &[i16], _info: &cpal::InputCallbackInfo| {
                    delivery.deliver(bytemuck::cast_slice(samples), samples.len());
                },
                err_fn,
                None,
            )
        }
        _ => {
            let mut delivery = SampleDelivery::new(config, callback);
            device.build_input_stream(
                &stream_config,
                move |samples: &[f32], _info: &cpal::InputCallbackInfo| {
                    delivery.deliver(bytemuck::cast_slice(samples), samples.len());
                },
                err_fn,
                None,
            )
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = started_tx.send(Err(SourceError::FormatRejected(err.to_string())));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = started_tx.send(Err(SourceError::Failed(err.to_string())));
        return;
    }
    let _ = started_tx.send(Ok(()));
    log::info!("[Capture] audio stream running");

    // The stream is not Send; keep it alive here until stop.
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(10));
    }
    drop(stream);
    log::info!("[Capture] audio stream stopped");
}

/// Converts cpal callback buffers into timestamped `AudioBuffer`s.
struct SampleDelivery {
    config: AudioConfig,
    callback: Arc<dyn AudioSamplesCallback>,
    buffer: AudioBuffer,
    samples_delivered: u64,
}

impl SampleDelivery {
    fn new(config: AudioConfig, callback: Arc<dyn AudioSamplesCallback>) -> Self {
        Self { config, callback, buffer: AudioBuffer::default(), samples_delivered: 0 }
    }

    fn deliver(&mut self, data: &[u8], total_samples: usize) {
        let frames = total_samples as u64 / u64::from(self.config.channels.max(1));
        let rate = u64::from(self.config.sample_rate.max(1));
        let timestamp_ms = (self.samples_delivered * 1000 / rate) as i64;
        let duration_ms = (frames * 1000 / rate) as i64;
        self.samples_delivered += frames;

        self.buffer.init(self.config, timestamp_ms, duration_ms, data);
        self.callback.on_samples_received(&mut self.buffer);
    }
}
