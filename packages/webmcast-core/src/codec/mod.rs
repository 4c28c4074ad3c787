//! Codec front-ends.
//!
//! The external Vorbis and VPx libraries are collaborators reached through
//! the [`vorbis::VorbisAnalyzer`] and [`vpx::VpxCodec`] backend traits. The
//! front-end types own every pipeline-visible behavior: format validation,
//! bitrate unit conversion, optional-control suppression, header management,
//! timestamp bookkeeping, decimation, and keyframe forcing.
//!
//! Production backends binding the system libraries are provided behind the
//! `libvorbis` and `libvpx` cargo features.

pub mod vorbis;
pub mod vpx;

#[cfg(feature = "libvorbis")]
mod vorbis_sys;
#[cfg(feature = "libvpx")]
mod vpx_sys;

use crate::error::CodecError;

/// Returns the libvorbis-backed analyzer when the crate was built with the
/// `libvorbis` feature.
#[cfg(feature = "libvorbis")]
pub fn system_vorbis_analyzer() -> Result<Box<dyn vorbis::VorbisAnalyzer>, CodecError> {
    Ok(Box::new(vorbis_sys::LibVorbisAnalyzer::new()))
}

/// Without the `libvorbis` feature there is no production Vorbis backend.
#[cfg(not(feature = "libvorbis"))]
pub fn system_vorbis_analyzer() -> Result<Box<dyn vorbis::VorbisAnalyzer>, CodecError> {
    Err(CodecError::BackendUnavailable("libvorbis"))
}

/// Returns the libvpx-backed codec when the crate was built with the `libvpx`
/// feature.
#[cfg(feature = "libvpx")]
pub fn system_vpx_codec() -> Result<Box<dyn vpx::VpxCodec>, CodecError> {
    Ok(Box::new(vpx_sys::LibVpxCodec::new()))
}

/// Without the `libvpx` feature there is no production VPx backend.
#[cfg(not(feature = "libvpx"))]
pub fn system_vpx_codec() -> Result<Box<dyn vpx::VpxCodec>, CodecError> {
    Err(CodecError::BackendUnavailable("libvpx"))
}
