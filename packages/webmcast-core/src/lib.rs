//! webmcast-core - live WebM encoding, chunking, and delivery.
//!
//! This crate implements the pipeline that sits between local capture devices
//! and an HTTP ingestion endpoint: raw audio and video buffers are handed from
//! capture threads to a single encoder thread through bounded buffer pools,
//! compressed with Vorbis and VPx, muxed into a live-mode WebM stream, and
//! shipped as cluster-aligned chunks to every registered data sink.
//!
//! # Architecture
//!
//! - [`pool`]: lock-protected free/active buffer pools for cross-thread handoff
//! - [`media`]: owned audio/video buffer value types and pixel format conversion
//! - [`codec`]: Vorbis and VPx encoder front-ends over pluggable backends
//! - [`ebml`] / [`mkv`]: live-mode WebM segment writing (unknown element sizes)
//! - [`mux`]: the chunk-producing muxer adapter and its byte sink
//! - [`sink`]: data sink fanout, HTTP uploader, and file writer
//! - [`dash`]: MPD manifest emission for DASH output mode
//! - [`encoder`]: the orchestrator owning the encoder thread and stop protocol
//! - [`source`]: the capture seam (implemented by `webmcast-capture` or tests)
//!
//! The capture backend, the codec libraries, and the HTTP server on the far
//! end are collaborators; everything they need to know about is defined by the
//! traits in [`source`], [`codec`], and [`sink`].

pub mod codec;
pub mod config;
pub mod dash;
pub mod ebml;
pub mod encoder;
pub mod error;
pub mod media;
pub mod mkv;
pub mod mux;
pub mod pool;
pub mod sink;
pub mod source;
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{
    AudioConfig, AudioFormat, EncoderConfig, PixelFormat, VideoConfig, VorbisConfig, VpxCodecId,
    VpxConfig,
};
pub use encoder::WebmEncoder;
pub use error::{
    CodecError, EncoderError, EncoderResult, MuxerError, PoolError, SourceError, UploadError,
};
pub use media::{AudioBuffer, VideoFrame};
pub use mux::{ChunkWriter, LiveWebmMuxer, VorbisPrivate};
pub use sink::file::FileWriter;
pub use sink::http::{HttpUploader, PostMode, UploadStats, UploaderSettings, UploaderSink};
pub use sink::{DataSink, SinkChunk, SinkSet};
pub use source::{AudioSamplesCallback, CaptureStatus, MediaSource, SourceOptions, VideoFrameCallback};

/// Timebase shared by both codecs and the muxer: all timestamps are expressed
/// in milliseconds.
pub const TIMEBASE_MS: i32 = 1000;
