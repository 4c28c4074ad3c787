//! Centralized error types for the webmcast core library.
//!
//! Each pipeline subsystem has its own `thiserror` enum; everything converges
//! into [`EncoderError`] at the orchestrator boundary.

use thiserror::Error;

/// Errors produced by [`crate::pool::BufferPool`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// `init` called on a pool that already has slots.
    #[error("buffer pool already initialized")]
    AlreadyInitialized,

    /// `commit` found no free slot and growth is disabled.
    ///
    /// Non-fatal: the video path reports this back to capture as a dropped
    /// frame.
    #[error("buffer pool full")]
    Full,

    /// `decommit` / `active_timestamp` found no active buffer.
    #[error("buffer pool empty")]
    Empty,
}

/// Errors produced by the muxer layer ([`crate::mux`] and [`crate::mkv`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MuxerError {
    /// Cluster duration must be at least one millisecond.
    #[error("invalid cluster duration: {0} ms")]
    InvalidClusterDuration(i64),

    /// `read_chunk` called while no complete chunk is buffered.
    #[error("no chunk ready")]
    NoChunkReady,

    /// Caller's buffer cannot hold the buffered chunk.
    #[error("user buffer too small: chunk is {chunk_length} bytes, capacity is {capacity}")]
    UserBufferTooSmall { chunk_length: usize, capacity: usize },

    /// A second audio track was requested.
    #[error("audio track already exists")]
    AudioTrackExists,

    /// A second video track was requested.
    #[error("video track already exists")]
    VideoTrackExists,

    /// Frame write without the matching track.
    #[error("no audio track")]
    NoAudioTrack,

    /// Frame write without the matching track.
    #[error("no video track")]
    NoVideoTrack,

    /// Frame write addressed to a track number never added.
    #[error("unknown track number {0}")]
    UnknownTrack(u64),

    /// Track additions are only valid before the first frame write.
    #[error("tracks are frozen once frame writing has started")]
    TracksFrozen,

    /// Any write attempted after `finalize`.
    #[error("muxer already finalized")]
    Finalized,

    /// Buffer contents do not match the track codec (e.g. raw frame handed to
    /// the video track).
    #[error("unsupported buffer format: {0}")]
    UnsupportedFormat(&'static str),

    /// Empty payload handed to a frame write.
    #[error("empty buffer")]
    EmptyBuffer,

    /// A block timecode fell outside the signed 16-bit cluster-relative range.
    #[error("block timecode {0} ms does not fit the open cluster")]
    TimecodeOutOfRange(i64),

    /// Timestamps handed to one track must be non-decreasing.
    #[error("non-monotonic timestamp: {current} ms after {previous} ms")]
    NonMonotonicTimestamp { previous: i64, current: i64 },
}

/// Errors produced by the codec front-ends and their backends.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input format the codec cannot accept.
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Polling found no compressed data. Not fatal; try again after feeding
    /// more input.
    #[error("no compressed samples available")]
    NoSamples,

    /// The crate was built without the matching codec feature.
    #[error("codec backend unavailable: rebuild with the `{0}` feature")]
    BackendUnavailable(&'static str),

    /// The underlying codec library reported a failure.
    #[error("codec library error: {0}")]
    Library(String),

    /// Empty or malformed buffer handed to an encode call.
    #[error("invalid codec input: {0}")]
    InvalidInput(&'static str),
}

/// Errors produced by capture sources behind the [`crate::source::MediaSource`]
/// seam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The named device was not found.
    #[error("capture device not found: {0}")]
    NoDevice(String),

    /// The device rejected the requested format.
    #[error("capture format rejected: {0}")]
    FormatRejected(String),

    /// The source stopped on its own or entered a bad state.
    #[error("capture source failed: {0}")]
    Failed(String),
}

/// Errors produced by [`crate::sink::http::HttpUploader`].
#[derive(Debug, Error)]
pub enum UploadError {
    /// Uploader configured with an empty target URL.
    #[error("empty target URL")]
    EmptyTargetUrl,

    /// HTTP client construction or request failure.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Top-level error type for the encoder orchestrator.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Rejected configuration (e.g. both streams disabled).
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization failure outside the more specific categories.
    #[error("encoder init failed: {0}")]
    InitFailed(String),

    #[error("audio codec error: {0}")]
    AudioCodec(CodecError),

    #[error("video codec error: {0}")]
    VideoCodec(CodecError),

    #[error("muxer error: {0}")]
    Muxer(#[from] MuxerError),

    #[error("buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("capture source error: {0}")]
    Source(#[from] SourceError),
}

/// Convenient Result alias for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_full_is_distinguishable() {
        let err = PoolError::Full;
        assert_eq!(err, PoolError::Full);
        assert_ne!(err, PoolError::Empty);
    }

    #[test]
    fn muxer_error_display_includes_sizes() {
        let err = MuxerError::UserBufferTooSmall { chunk_length: 2048, capacity: 1024 };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn encoder_error_from_pool_error() {
        let err: EncoderError = PoolError::Empty.into();
        assert!(matches!(err, EncoderError::Pool(PoolError::Empty)));
    }
}
