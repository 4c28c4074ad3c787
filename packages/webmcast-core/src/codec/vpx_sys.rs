//! libvpx backend.
//!
//! Bindings are generated at build time against the system headers (see
//! `build.rs`); this module is only compiled with the `libvpx` feature.

#![allow(clippy::missing_safety_doc)]

use std::os::raw::{c_int, c_long, c_uint, c_ulong};

use crate::codec::vpx::{VpxCodec, VpxPacket, VpxSetup};
use crate::config::VpxCodecId;
use crate::error::CodecError;
use crate::media::VideoFrame;

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
#[allow(dead_code)]
mod ffi {
    include!(concat!(env!("OUT_DIR"), "/vpx_bindings.rs"));
}

fn library_error(call: &str, status: ffi::vpx_codec_err_t) -> CodecError {
    CodecError::Library(format!("{call} failed: {}", status as i32))
}

/// Codec backed by the system libvpx.
pub struct LibVpxCodec {
    context: ffi::vpx_codec_ctx_t,
    packets: std::collections::VecDeque<VpxPacket>,
    initialized: bool,
}

// The codec context is owned exclusively by this wrapper and driven from a
// single thread.
unsafe impl Send for LibVpxCodec {}

impl LibVpxCodec {
    pub fn new() -> Self {
        Self {
            context: unsafe { std::mem::zeroed() },
            packets: std::collections::VecDeque::new(),
            initialized: false,
        }
    }

    unsafe fn control(&mut self, id: c_int, value: c_int) -> Result<(), CodecError> {
        let status = ffi::vpx_codec_control_(&mut self.context, id, value);
        if status != ffi::VPX_CODEC_OK {
            return Err(library_error("vpx_codec_control_", status));
        }
        Ok(())
    }

    unsafe fn optional_control(
        &mut self,
        id: c_int,
        value: Option<impl Into<i64>>,
    ) -> Result<(), CodecError> {
        if let Some(value) = value {
            self.control(id, value.into() as c_int)?;
        }
        Ok(())
    }
}

impl Default for LibVpxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VpxCodec for LibVpxCodec {
    fn init(&mut self, setup: &VpxSetup) -> Result<(), CodecError> {
        let tuning = &setup.config;
        unsafe {
            let interface = match tuning.codec {
                VpxCodecId::Vp8 => ffi::vpx_codec_vp8_cx(),
                VpxCodecId::Vp9 => ffi::vpx_codec_vp9_cx(),
            };

            let mut config: ffi::vpx_codec_enc_cfg_t = std::mem::zeroed();
            let status = ffi::vpx_codec_enc_config_default(interface, &mut config, 0);
            if status != ffi::VPX_CODEC_OK {
                return Err(library_error("vpx_codec_enc_config_default", status));
            }

            config.g_pass = ffi::VPX_RC_ONE_PASS;
            config.g_timebase.num = 1;
            config.g_timebase.den = crate::TIMEBASE_MS;
            config.rc_end_usage = ffi::VPX_CBR;
            config.g_w = setup.width as c_uint;
            config.g_h = setup.height as c_uint;
            config.rc_target_bitrate = tuning.bitrate as c_uint;
            config.rc_min_quantizer = tuning.min_quantizer as c_uint;
            config.rc_max_quantizer = tuning.max_quantizer as c_uint;
            if let Some(threads) = tuning.thread_count {
                config.g_threads = threads as c_uint;
            }
            if let Some(undershoot) = tuning.undershoot {
                config.rc_undershoot_pct = undershoot as c_uint;
            }
            if let Some(overshoot) = tuning.overshoot {
                config.rc_overshoot_pct = overshoot as c_uint;
            }
            if let Some(total) = tuning.total_buffer_time {
                config.rc_buf_sz = total as c_uint;
            }
            if let Some(initial) = tuning.initial_buffer_time {
                config.rc_buf_initial_sz = initial as c_uint;
            }
            if let Some(optimal) = tuning.optimal_buffer_time {
                config.rc_buf_optimal_sz = optimal as c_uint;
            }
            if tuning.error_resilient {
                config.g_error_resilient = ffi::VPX_ERROR_RESILIENT_DEFAULT as c_uint;
            }

            let status = ffi::vpx_codec_enc_init_ver(
                &mut self.context,
                interface,
                &config,
                0,
                ffi::VPX_ENCODER_ABI_VERSION as c_int,
            );
            if status != ffi::VPX_CODEC_OK {
                return Err(library_error("vpx_codec_enc_init_ver", status));
            }
            self.initialized = true;

            self.optional_control(ffi::VP8E_SET_CPUUSED as c_int, tuning.speed)?;
            self.optional_control(
                ffi::VP8E_SET_STATIC_THRESHOLD as c_int,
                tuning.static_threshold,
            )?;
            self.optional_control(
                ffi::VP8E_SET_TOKEN_PARTITIONS as c_int,
                tuning.token_partitions,
            )?;
            self.optional_control(
                ffi::VP8E_SET_NOISE_SENSITIVITY as c_int,
                tuning.noise_sensitivity,
            )?;
            self.optional_control(
                ffi::VP8E_SET_MAX_INTRA_BITRATE_PCT as c_int,
                tuning.max_keyframe_bitrate,
            )?;
            self.optional_control(ffi::VP8E_SET_SHARPNESS as c_int, tuning.sharpness)?;
            if tuning.codec == VpxCodecId::Vp9 {
                self.optional_control(
                    ffi::VP9E_SET_GF_CBR_BOOST_PCT as c_int,
                    tuning.goldenframe_cbr_boost,
                )?;
                self.optional_control(
                    ffi::VP9E_SET_AQ_MODE as c_int,
                    tuning.adaptive_quantization_mode,
                )?;
                self.optional_control(ffi::VP9E_SET_TILE_COLUMNS as c_int, tuning.tile_columns)?;
                if tuning.disable_frame_parallel {
                    self.control(ffi::VP9E_SET_FRAME_PARALLEL_DECODING as c_int, 0)?;
                }
            }
        }
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        timestamp_ms: i64,
        duration_ms: i64,
        force_keyframe: bool,
    ) -> Result<(), CodecError> {
        if !self.initialized {
            return Err(CodecError::Library("encode before init".into()));
        }
        let Some(config) = frame.config() else {
            return Err(CodecError::InvalidInput("uninitialized frame"));
        };
        let image_format = match config.format {
            crate::config::PixelFormat::I420 => ffi::VPX_IMG_FMT_I420,
            crate::config::PixelFormat::Yv12 => ffi::VPX_IMG_FMT_YV12,
            _ => return Err(CodecError::InvalidInput("frame is not I420/YV12")),
        };

        unsafe {
            let mut image: ffi::vpx_image_t = std::mem::zeroed();
            let wrapped = ffi::vpx_img_wrap(
                &mut image,
                image_format,
                config.width as c_uint,
                config.height as c_uint,
                1,
                frame.data().as_ptr() as *mut u8,
            );
            if wrapped.is_null() {
                return Err(CodecError::Library("vpx_img_wrap failed".into()));
            }

            let flags: ffi::vpx_enc_frame_flags_t = if force_keyframe {
                ffi::VPX_EFLAG_FORCE_KF as ffi::vpx_enc_frame_flags_t
            } else {
                0
            };
            let status = ffi::vpx_codec_encode(
                &mut self.context,
                &image,
                timestamp_ms as ffi::vpx_codec_pts_t,
                duration_ms.max(0) as c_ulong,
                flags as c_long,
                ffi::VPX_DL_REALTIME as c_ulong,
            );
            if status != ffi::VPX_CODEC_OK {
                return Err(library_error("vpx_codec_encode", status));
            }

            // Drain output; the library may emit stats packets alongside the
            // compressed frame.
            let mut iter: ffi::vpx_codec_iter_t = std::ptr::null();
            loop {
                let packet = ffi::vpx_codec_get_cx_data(&mut self.context, &mut iter);
                if packet.is_null() {
                    break;
                }
                if (*packet).kind != ffi::VPX_CODEC_CX_FRAME_PKT {
                    continue;
                }
                let frame_data = &(*packet).data.frame;
                let data =
                    std::slice::from_raw_parts(frame_data.buf as *const u8, frame_data.sz)
                        .to_vec();
                let keyframe = frame_data.flags & ffi::VPX_FRAME_IS_KEY != 0;
                self.packets.push_back(VpxPacket { data, keyframe });
            }
        }
        Ok(())
    }

    fn next_packet(&mut self) -> Result<Option<VpxPacket>, CodecError> {
        Ok(self.packets.pop_front())
    }
}

impl Drop for LibVpxCodec {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                ffi::vpx_codec_destroy(&mut self.context);
            }
        }
    }
}
