//! webmcast-encoder - live WebM streaming encoder CLI.
//!
//! Captures audio/video, compresses to Vorbis/VPx, muxes live-mode WebM, and
//! POSTs cluster-aligned chunks to an HTTP endpoint. A second output mode
//! writes DASH segments and an MPD manifest to the filesystem.

mod config;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use webmcast_core::codec::{system_vorbis_analyzer, system_vpx_codec};
use webmcast_core::{
    EncoderConfig, FileWriter, HttpUploader, PostMode, SinkSet, UploaderSettings, VpxCodecId,
    WebmEncoder,
};

use crate::config::{parse_name_value_pairs, AppConfig};

const AGENT_QUERY_FRAGMENT: &str = "&agent=p";
const WEBM_ITAG_QUERY_FRAGMENT: &str = "&itag=43";
const METADATA_QUERY_FRAGMENT: &str = "&metadata=1";

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Live WebM streaming encoder.
#[derive(Parser, Debug)]
#[command(name = "webmcast-encoder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long = "log_level", default_value = "info", env = "WEBMCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Target for HTTP POSTs.
    #[arg(long)]
    url: Option<String>,

    /// Stream ID to include in the POST query string.
    #[arg(long = "stream_id")]
    stream_id: Option<String>,

    /// Stream name to include in the POST query string.
    #[arg(long = "stream_name")]
    stream_name: Option<String>,

    /// Send WebM chunks as file data in a form (RFC 1867 style).
    #[arg(long = "form_post")]
    form_post: bool,

    /// Extra HTTP header, NAME:VALUE. Repeatable.
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Form variable for form posts, NAME:VALUE. Repeatable.
    #[arg(long = "var", value_name = "NAME:VALUE")]
    form_variables: Vec<String>,

    /// Directory for local single-file recording.
    #[arg(long = "record_dir", value_name = "DIR")]
    record_dir: Option<String>,

    // Audio source options.
    /// Audio capture device name ("tone" selects the built-in test tone).
    #[arg(long = "adev")]
    audio_device: Option<String>,
    /// Disable audio capture.
    #[arg(long = "adisable")]
    audio_disable: bool,
    /// Attempt manual audio source configuration.
    #[arg(long = "amanual")]
    audio_manual: bool,
    /// Number of audio channels.
    #[arg(long = "achannels")]
    audio_channels: Option<u16>,
    /// Audio sample rate in Hz.
    #[arg(long = "arate")]
    audio_rate: Option<u32>,
    /// Audio bits per sample.
    #[arg(long = "asize")]
    audio_size: Option<u16>,

    // Vorbis encoder options.
    /// Average bitrate in kbps.
    #[arg(long = "vorbis_bitrate")]
    vorbis_bitrate: Option<i32>,
    /// Minimum bitrate in kbps.
    #[arg(long = "vorbis_minimum_bitrate")]
    vorbis_minimum_bitrate: Option<i32>,
    /// Maximum bitrate in kbps.
    #[arg(long = "vorbis_maximum_bitrate")]
    vorbis_maximum_bitrate: Option<i32>,
    /// Disable VBR when specifying only an average bitrate.
    #[arg(long = "vorbis_disable_vbr")]
    vorbis_disable_vbr: bool,
    /// Impulse block bias, -15.0 to 0.0.
    #[arg(long = "vorbis_iblock_bias")]
    vorbis_iblock_bias: Option<f64>,
    /// Hard lowpass frequency in kHz, 2 to 99.
    #[arg(long = "vorbis_lowpass_frequency")]
    vorbis_lowpass_frequency: Option<f64>,

    // Video source options.
    /// Video capture device name.
    #[arg(long = "vdev")]
    video_device: Option<String>,
    /// Disable video capture.
    #[arg(long = "vdisable")]
    video_disable: bool,
    /// Attempt manual video source configuration.
    #[arg(long = "vmanual")]
    video_manual: bool,
    /// Width in pixels.
    #[arg(long = "vwidth")]
    video_width: Option<u32>,
    /// Height in pixels.
    #[arg(long = "vheight")]
    video_height: Option<u32>,
    /// Frames per second.
    #[arg(long = "vframe_rate")]
    video_frame_rate: Option<f64>,

    // VPx encoder options.
    /// Video codec, vp8 or vp9.
    #[arg(long = "vpx_codec")]
    vpx_codec: Option<String>,
    /// Video bitrate in kbps.
    #[arg(long = "vpx_bitrate")]
    vpx_bitrate: Option<u32>,
    /// Time between keyframes in milliseconds.
    #[arg(long = "vpx_keyframe_interval")]
    vpx_keyframe_interval: Option<i64>,
    /// Frame rate decimation factor.
    #[arg(long = "vpx_decimate")]
    vpx_decimate: Option<u32>,
    /// Quantizer minimum.
    #[arg(long = "vpx_min_q")]
    vpx_min_q: Option<u32>,
    /// Quantizer maximum.
    #[arg(long = "vpx_max_q")]
    vpx_max_q: Option<u32>,
    /// Encoder speed (cpu-used).
    #[arg(long = "vpx_speed")]
    vpx_speed: Option<i32>,
    /// Static threshold.
    #[arg(long = "vpx_static_threshold")]
    vpx_static_threshold: Option<u32>,
    /// Number of encode threads.
    #[arg(long = "vpx_threads")]
    vpx_threads: Option<u32>,
    /// Number of token partitions, 0-3.
    #[arg(long = "vpx_token_partitions")]
    vpx_token_partitions: Option<u32>,
    /// Datarate undershoot percentage.
    #[arg(long = "vpx_undershoot")]
    vpx_undershoot: Option<u32>,
    /// Datarate overshoot percentage.
    #[arg(long = "vpx_overshoot")]
    vpx_overshoot: Option<u32>,
    /// Noise sensitivity, 0-1.
    #[arg(long = "vpx_noise_sensitivity")]
    vpx_noise_sensitivity: Option<u32>,
    /// Client buffer length in milliseconds.
    #[arg(long = "vpx_max_buffer")]
    vpx_max_buffer: Option<i64>,
    /// Play start buffer length in milliseconds.
    #[arg(long = "vpx_init_buffer")]
    vpx_init_buffer: Option<i64>,
    /// Optimal buffer length in milliseconds.
    #[arg(long = "vpx_opt_buffer")]
    vpx_opt_buffer: Option<i64>,
    /// Maximum keyframe bitrate as a percentage of the target.
    #[arg(long = "vpx_max_kf_bitrate")]
    vpx_max_kf_bitrate: Option<u32>,
    /// Loop filter sharpness, 0-7.
    #[arg(long = "vpx_sharpness")]
    vpx_sharpness: Option<u32>,
    /// Enable error resilience.
    #[arg(long = "vpx_error_resilient")]
    vpx_error_resilient: bool,
    /// Golden frame bitrate boost percentage (VP9).
    #[arg(long = "vpx_gf_cbr_boost")]
    vpx_gf_cbr_boost: Option<u32>,
    /// Adaptive quantization mode, 0-3 (VP9).
    #[arg(long = "vpx_aq_mode")]
    vpx_aq_mode: Option<u32>,
    /// Tile columns in log2 units (VP9).
    #[arg(long = "vpx_tile_cols")]
    vpx_tile_cols: Option<u32>,
    /// Disable frame parallel decoding features (VP9).
    #[arg(long = "vpx_disable_fpd")]
    vpx_disable_fpd: bool,

    // DASH output options.
    /// Enable DASH output mode.
    #[arg(long)]
    dash: bool,
    /// Output directory for the MPD and DASH chunks.
    #[arg(long = "dash_dir")]
    dash_dir: Option<String>,
    /// MPD name and DASH chunk id prefix.
    #[arg(long = "dash_name")]
    dash_name: Option<String>,
    /// MPD SegmentTemplate startNumber value.
    #[arg(long = "dash_start_number")]
    dash_start_number: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();
    log::info!("webmcast-encoder v{}", env!("CARGO_PKG_VERSION"));

    let mut app_config =
        AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    apply_cli_overrides(&args, &mut app_config);

    let Some(target_url) = app_config.url.clone() else {
        bail!("the --url parameter is required");
    };
    let has_query = target_url.contains('?');
    let stream_id = app_config.stream_id.clone().unwrap_or_default();
    let stream_name = app_config.stream_name.clone().unwrap_or_default();
    if !has_query && (stream_id.is_empty() || stream_name.is_empty()) {
        bail!("stream_id and stream_name are required when the target URL lacks a query string");
    }
    if app_config.encoder.disable_audio && app_config.encoder.disable_video {
        bail!("audio and video are both disabled");
    }

    install_sigint_handler();
    run_encoder(app_config, target_url, stream_id, stream_name)
}

/// CLI flags override config-file values.
fn apply_cli_overrides(args: &Args, config: &mut AppConfig) {
    let encoder = &mut config.encoder;

    if args.url.is_some() {
        config.url = args.url.clone();
    }
    if args.stream_id.is_some() {
        config.stream_id = args.stream_id.clone();
    }
    if args.stream_name.is_some() {
        config.stream_name = args.stream_name.clone();
    }
    config.form_post |= args.form_post;
    config.headers.extend(args.headers.iter().cloned());
    config.form_variables.extend(args.form_variables.iter().cloned());
    if args.record_dir.is_some() {
        config.record_dir = args.record_dir.clone();
    }

    encoder.disable_audio |= args.audio_disable;
    encoder.disable_video |= args.video_disable;
    encoder.manual_audio_config |= args.audio_manual;
    encoder.manual_video_config |= args.video_manual;
    if args.audio_device.is_some() {
        encoder.audio_device_name = args.audio_device.clone();
    }
    if args.video_device.is_some() {
        encoder.video_device_name = args.video_device.clone();
    }
    if let Some(channels) = args.audio_channels {
        encoder.requested_audio_config.channels = channels;
    }
    if let Some(rate) = args.audio_rate {
        encoder.requested_audio_config.sample_rate = rate;
    }
    if let Some(bits) = args.audio_size {
        encoder.requested_audio_config.bits_per_sample = bits;
    }
    if let Some(width) = args.video_width {
        encoder.requested_video_config.width = width;
        encoder.requested_video_config.stride = width;
    }
    if let Some(height) = args.video_height {
        encoder.requested_video_config.height = height;
    }
    if let Some(frame_rate) = args.video_frame_rate {
        encoder.requested_video_config.frame_rate = frame_rate;
    }

    if let Some(bitrate) = args.vorbis_bitrate {
        encoder.vorbis.average_bitrate = bitrate;
    }
    if args.vorbis_minimum_bitrate.is_some() {
        encoder.vorbis.minimum_bitrate = args.vorbis_minimum_bitrate;
    }
    if args.vorbis_maximum_bitrate.is_some() {
        encoder.vorbis.maximum_bitrate = args.vorbis_maximum_bitrate;
    }
    if args.vorbis_disable_vbr {
        encoder.vorbis.bitrate_based_quality = false;
    }
    if args.vorbis_iblock_bias.is_some() {
        encoder.vorbis.impulse_block_bias = args.vorbis_iblock_bias;
    }
    if args.vorbis_lowpass_frequency.is_some() {
        encoder.vorbis.lowpass_frequency = args.vorbis_lowpass_frequency;
    }

    if let Some(codec) = &args.vpx_codec {
        match codec.as_str() {
            "vp8" => encoder.vpx.codec = VpxCodecId::Vp8,
            "vp9" => encoder.vpx.codec = VpxCodecId::Vp9,
            other => log::error!("invalid --vpx_codec value: {}", other),
        }
    }
    if let Some(bitrate) = args.vpx_bitrate {
        encoder.vpx.bitrate = bitrate;
    }
    if let Some(interval) = args.vpx_keyframe_interval {
        encoder.vpx.keyframe_interval = interval;
    }
    if args.vpx_decimate.is_some() {
        encoder.vpx.decimate = args.vpx_decimate;
    }
    if let Some(min_q) = args.vpx_min_q {
        encoder.vpx.min_quantizer = min_q;
    }
    if let Some(max_q) = args.vpx_max_q {
        encoder.vpx.max_quantizer = max_q;
    }
    if args.vpx_speed.is_some() {
        encoder.vpx.speed = args.vpx_speed;
    }
    if args.vpx_static_threshold.is_some() {
        encoder.vpx.static_threshold = args.vpx_static_threshold;
    }
    if args.vpx_threads.is_some() {
        encoder.vpx.thread_count = args.vpx_threads;
    }
    if args.vpx_token_partitions.is_some() {
        encoder.vpx.token_partitions = args.vpx_token_partitions;
    }
    if args.vpx_undershoot.is_some() {
        encoder.vpx.undershoot = args.vpx_undershoot;
    }
    if args.vpx_overshoot.is_some() {
        encoder.vpx.overshoot = args.vpx_overshoot;
    }
    if args.vpx_noise_sensitivity.is_some() {
        encoder.vpx.noise_sensitivity = args.vpx_noise_sensitivity;
    }
    if args.vpx_max_buffer.is_some() {
        encoder.vpx.total_buffer_time = args.vpx_max_buffer;
    }
    if args.vpx_init_buffer.is_some() {
        encoder.vpx.initial_buffer_time = args.vpx_init_buffer;
    }
    if args.vpx_opt_buffer.is_some() {
        encoder.vpx.optimal_buffer_time = args.vpx_opt_buffer;
    }
    if args.vpx_max_kf_bitrate.is_some() {
        encoder.vpx.max_keyframe_bitrate = args.vpx_max_kf_bitrate;
    }
    if args.vpx_sharpness.is_some() {
        encoder.vpx.sharpness = args.vpx_sharpness;
    }
    encoder.vpx.error_resilient |= args.vpx_error_resilient;
    if args.vpx_gf_cbr_boost.is_some() {
        encoder.vpx.goldenframe_cbr_boost = args.vpx_gf_cbr_boost;
    }
    if args.vpx_aq_mode.is_some() {
        encoder.vpx.adaptive_quantization_mode = args.vpx_aq_mode;
    }
    if args.vpx_tile_cols.is_some() {
        encoder.vpx.tile_columns = args.vpx_tile_cols;
    }
    encoder.vpx.disable_frame_parallel |= args.vpx_disable_fpd;

    encoder.dash_encode |= args.dash;
    if let Some(dash_dir) = &args.dash_dir {
        encoder.dash_dir = dash_dir.clone();
    }
    if let Some(dash_name) = &args.dash_name {
        encoder.dash_name = dash_name.clone();
    }
    if let Some(start_number) = &args.dash_start_number {
        encoder.dash_start_number = start_number.clone();
    }
}

/// Builds the reconstructed upload URL per the ingestion convention: when the
/// target has no query string, `?ns=<name>&id=<id>&agent=p&itag=43` is
/// appended. The first upload additionally carries `&metadata=1`.
fn build_target_urls(target_url: &str, stream_name: &str, stream_id: &str) -> (String, String) {
    let base_url = if target_url.contains('?') {
        target_url.to_string()
    } else {
        format!(
            "{}?ns={}&id={}{}{}",
            target_url, stream_name, stream_id, AGENT_QUERY_FRAGMENT, WEBM_ITAG_QUERY_FRAGMENT
        )
    };
    let metadata_url = format!("{}{}", base_url, METADATA_QUERY_FRAGMENT);
    (metadata_url, base_url)
}

fn run_encoder(
    app_config: AppConfig,
    target_url: String,
    stream_id: String,
    stream_name: String,
) -> Result<()> {
    let headers = parse_name_value_pairs(&app_config.headers)?;
    let form_variables = parse_name_value_pairs(&app_config.form_variables)?;

    let uploader_settings = UploaderSettings {
        target_url: target_url.clone(),
        post_mode: if app_config.form_post { PostMode::FormPost } else { PostMode::Post },
        headers,
        form_variables,
        local_file: app_config.local_file.clone().unwrap_or_else(|| {
            let name = if stream_name.is_empty() { "live" } else { stream_name.as_str() };
            format!("{name}.webm")
        }),
    };
    let mut uploader = HttpUploader::init(uploader_settings).context("uploader init failed")?;
    let (metadata_url, base_url) = build_target_urls(&target_url, &stream_name, &stream_id);
    log::info!("upload target: {}", base_url);
    uploader.enqueue_target_url(metadata_url);
    uploader.enqueue_target_url(base_url);

    let mut sinks = SinkSet::new();
    sinks.add_sink(Box::new(uploader.sink()));
    if app_config.encoder.dash_encode {
        let writer = FileWriter::init(true, app_config.encoder.dash_dir.clone())
            .context("DASH file writer init failed")?;
        sinks.add_sink(Box::new(writer));
    }
    if let Some(record_dir) = &app_config.record_dir {
        let writer =
            FileWriter::init(false, record_dir.clone()).context("file writer init failed")?;
        sinks.add_sink(Box::new(writer));
    }

    let encoder_config: EncoderConfig = app_config.encoder;
    let audio_backend = if encoder_config.disable_audio {
        None
    } else {
        Some(system_vorbis_analyzer().context(
            "no Vorbis backend; rebuild with --features codecs to encode audio",
        )?)
    };
    let video_backend = if encoder_config.disable_video {
        None
    } else {
        Some(system_vpx_codec().context(
            "no VPx backend; rebuild with --features codecs to encode video",
        )?)
    };

    let source = Box::new(webmcast_capture::CaptureSource::new());
    let mut encoder =
        WebmEncoder::init(encoder_config, source, sinks, audio_backend, video_backend)
            .context("encoder init failed")?;

    uploader.run();
    encoder.run().context("encoder run failed")?;

    // Any key press (or Ctrl-C) terminates.
    std::thread::spawn(|| {
        let mut byte = [0u8; 1];
        let _ = std::io::stdin().read(&mut byte);
        STOP_REQUESTED.store(true, Ordering::SeqCst);
    });
    println!("Press any key to quit...");

    let mut failed = false;
    while !STOP_REQUESTED.load(Ordering::SeqCst) {
        if let Some(err) = encoder.take_error() {
            log::error!("encoder failed: {}", err);
            failed = true;
            break;
        }
        let stats = uploader.stats();
        print!(
            "\rencoded duration: {:7.3} seconds, uploaded: {} @ {} kBps, dropped frames: {}   ",
            encoder.encoded_duration() as f64 / 1000.0,
            stats.bytes_sent_current + stats.total_bytes_uploaded,
            (stats.bytes_per_second / 1000.0) as u64,
            encoder.dropped_video_frames(),
        );
        let _ = std::io::stdout().flush();
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    log::info!("stopping encoder...");
    encoder.stop();
    if let Some(err) = encoder.take_error() {
        log::error!("encoder reported: {}", err);
        failed = true;
    }
    log::info!("stopping uploader...");
    uploader.stop();

    if failed {
        bail!("encoder terminated with an error");
    }
    Ok(())
}

#[cfg(unix)]
fn install_sigint_handler() {
    unsafe extern "C" fn handle_sigint(_signal: libc::c_int) {
        STOP_REQUESTED.store(true, Ordering::SeqCst);
    }
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
    }
}

#[cfg(not(unix))]
fn install_sigint_handler() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_reconstruction_without_query() {
        let (metadata, base) = build_target_urls("http://ingest/upload", "show", "42");
        assert_eq!(base, "http://ingest/upload?ns=show&id=42&agent=p&itag=43");
        assert_eq!(metadata, format!("{}&metadata=1", base));
    }

    #[test]
    fn url_with_query_left_untouched() {
        let (metadata, base) = build_target_urls("http://ingest/upload?key=abc", "", "");
        assert_eq!(base, "http://ingest/upload?key=abc");
        assert_eq!(metadata, "http://ingest/upload?key=abc&metadata=1");
    }
}
