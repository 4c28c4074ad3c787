//! libvorbis / libvorbisenc backend.
//!
//! Bindings are generated at build time against the system headers (see
//! `build.rs`); this module is only compiled with the `libvorbis` feature.

#![allow(clippy::missing_safety_doc)]

use std::ffi::CString;
use std::os::raw::{c_int, c_long};

use crate::codec::vorbis::{VorbisAnalyzer, VorbisPacket, VorbisSetup};
use crate::error::CodecError;
use crate::mux::VorbisPrivate;

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
#[allow(dead_code)]
mod ffi {
    include!(concat!(env!("OUT_DIR"), "/vorbis_bindings.rs"));
}

fn library_error(call: &str, status: c_int) -> CodecError {
    CodecError::Library(format!("{call} failed: {status}"))
}

/// Analyzer backed by the system libvorbis.
pub struct LibVorbisAnalyzer {
    info: ffi::vorbis_info,
    dsp: ffi::vorbis_dsp_state,
    block: ffi::vorbis_block,
    channels: usize,
    initialized: bool,
}

// The raw library structs hold heap pointers owned exclusively by this
// wrapper; the analyzer is only ever driven from one thread at a time.
unsafe impl Send for LibVorbisAnalyzer {}

impl LibVorbisAnalyzer {
    pub fn new() -> Self {
        Self {
            info: unsafe { std::mem::zeroed() },
            dsp: unsafe { std::mem::zeroed() },
            block: unsafe { std::mem::zeroed() },
            channels: 0,
            initialized: false,
        }
    }

    unsafe fn control_f64(&mut self, request: c_int, value: f64) -> Result<(), CodecError> {
        let mut value = value;
        let status = ffi::vorbis_encode_ctl(
            &mut self.info,
            request,
            std::ptr::addr_of_mut!(value).cast(),
        );
        if status != 0 {
            return Err(library_error("vorbis_encode_ctl", status));
        }
        Ok(())
    }

    unsafe fn store_packet(packet: &ffi::ogg_packet) -> Vec<u8> {
        std::slice::from_raw_parts(packet.packet, packet.bytes as usize).to_vec()
    }
}

impl Default for LibVorbisAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl VorbisAnalyzer for LibVorbisAnalyzer {
    fn init(&mut self, setup: &VorbisSetup) -> Result<VorbisPrivate, CodecError> {
        unsafe {
            ffi::vorbis_info_init(&mut self.info);

            let status = ffi::vorbis_encode_setup_managed(
                &mut self.info,
                c_long::from(setup.channels),
                setup.sample_rate as c_long,
                setup.maximum_bitrate.map_or(-1, c_long::from),
                c_long::from(setup.average_bitrate),
                setup.minimum_bitrate.map_or(-1, c_long::from),
            );
            if status != 0 {
                return Err(library_error("vorbis_encode_setup_managed", status));
            }

            if setup.quality_mode {
                // Disabling rate management needs a NULL argument.
                let status = ffi::vorbis_encode_ctl(
                    &mut self.info,
                    ffi::OV_ECTL_RATEMANAGE2_SET as c_int,
                    std::ptr::null_mut(),
                );
                if status != 0 {
                    return Err(library_error("vorbis_encode_ctl(ratemanage)", status));
                }
            }
            if setup.channel_coupling {
                let mut enable: c_int = 1;
                let status = ffi::vorbis_encode_ctl(
                    &mut self.info,
                    ffi::OV_ECTL_COUPLING_SET as c_int,
                    std::ptr::addr_of_mut!(enable).cast(),
                );
                if status != 0 {
                    return Err(library_error("vorbis_encode_ctl(coupling)", status));
                }
            }
            if let Some(bias) = setup.impulse_block_bias {
                self.control_f64(ffi::OV_ECTL_IBLOCK_SET as c_int, bias)?;
            }
            if let Some(frequency) = setup.lowpass_frequency {
                self.control_f64(ffi::OV_ECTL_LOWPASS_SET as c_int, frequency)?;
            }

            let status = ffi::vorbis_encode_setup_init(&mut self.info);
            if status != 0 {
                return Err(library_error("vorbis_encode_setup_init", status));
            }
            let status = ffi::vorbis_analysis_init(&mut self.dsp, &mut self.info);
            if status != 0 {
                return Err(library_error("vorbis_analysis_init", status));
            }
            let status = ffi::vorbis_block_init(&mut self.dsp, &mut self.block);
            if status != 0 {
                return Err(library_error("vorbis_block_init", status));
            }
            self.channels = usize::from(setup.channels);
            self.initialized = true;

            let mut comments: ffi::vorbis_comment = std::mem::zeroed();
            ffi::vorbis_comment_init(&mut comments);
            for (tag, value) in &setup.comment_tags {
                let tag = CString::new(tag.as_str())
                    .map_err(|_| CodecError::InvalidInput("comment tag contains NUL"))?;
                let value = CString::new(value.as_str())
                    .map_err(|_| CodecError::InvalidInput("comment value contains NUL"))?;
                ffi::vorbis_comment_add_tag(&mut comments, tag.as_ptr(), value.as_ptr());
            }

            let mut ident: ffi::ogg_packet = std::mem::zeroed();
            let mut comment_packet: ffi::ogg_packet = std::mem::zeroed();
            let mut setup_packet: ffi::ogg_packet = std::mem::zeroed();
            let status = ffi::vorbis_analysis_headerout(
                &mut self.dsp,
                &mut comments,
                &mut ident,
                &mut comment_packet,
                &mut setup_packet,
            );
            if status != 0 {
                ffi::vorbis_comment_clear(&mut comments);
                return Err(library_error("vorbis_analysis_headerout", status));
            }
            let private = VorbisPrivate {
                ident: Self::store_packet(&ident),
                comments: Self::store_packet(&comment_packet),
                setup: Self::store_packet(&setup_packet),
            };
            ffi::vorbis_comment_clear(&mut comments);
            Ok(private)
        }
    }

    fn submit(&mut self, planes: &[Vec<f32>]) -> Result<(), CodecError> {
        if !self.initialized {
            return Err(CodecError::Library("submit before init".into()));
        }
        let frames = planes.first().map_or(0, Vec::len);
        if frames == 0 {
            return Ok(());
        }
        unsafe {
            let analysis = ffi::vorbis_analysis_buffer(&mut self.dsp, frames as c_int);
            if analysis.is_null() {
                return Err(CodecError::Library("vorbis_analysis_buffer returned NULL".into()));
            }
            for (channel, plane) in planes.iter().enumerate().take(self.channels) {
                let target = *analysis.add(channel);
                std::ptr::copy_nonoverlapping(plane.as_ptr(), target, frames);
            }
            let status = ffi::vorbis_analysis_wrote(&mut self.dsp, frames as c_int);
            if status != 0 {
                return Err(library_error("vorbis_analysis_wrote", status));
            }
        }
        Ok(())
    }

    fn next_packet(&mut self) -> Result<Option<VorbisPacket>, CodecError> {
        if !self.initialized {
            return Ok(None);
        }
        unsafe {
            let mut packet: ffi::ogg_packet = std::mem::zeroed();
            loop {
                match ffi::vorbis_bitrate_flushpacket(&mut self.dsp, &mut packet) {
                    1 => {
                        return Ok(Some(VorbisPacket {
                            data: Self::store_packet(&packet),
                            granulepos: packet.granulepos,
                        }))
                    }
                    0 => match ffi::vorbis_analysis_blockout(&mut self.dsp, &mut self.block) {
                        1 => {
                            let status =
                                ffi::vorbis_analysis(&mut self.block, std::ptr::null_mut());
                            if status != 0 {
                                return Err(library_error("vorbis_analysis", status));
                            }
                            let status = ffi::vorbis_bitrate_addblock(&mut self.block);
                            if status != 0 {
                                return Err(library_error("vorbis_bitrate_addblock", status));
                            }
                        }
                        0 => return Ok(None),
                        status => {
                            return Err(library_error("vorbis_analysis_blockout", status))
                        }
                    },
                    status => return Err(library_error("vorbis_bitrate_flushpacket", status)),
                }
            }
        }
    }
}

impl Drop for LibVorbisAnalyzer {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                ffi::vorbis_block_clear(&mut self.block);
                ffi::vorbis_dsp_clear(&mut self.dsp);
                ffi::vorbis_info_clear(&mut self.info);
            }
        }
    }
}
