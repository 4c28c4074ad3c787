//! EBML primitives for WebM emission.
//!
//! Element IDs are stored in their wire form (class bits included) and
//! written out as-is; sizes use the standard variable-length encoding with
//! the all-ones value reserved for "unknown".

use bytes::{BufMut, BytesMut};

/// WebM/Matroska element IDs used by the live segment writer.
pub mod ids {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const SEGMENT: u32 = 0x1853_8067;

    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const CHANNELS: u32 = 0x9F;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
}

/// Track type values for the TrackType element.
pub const TRACK_TYPE_VIDEO: u64 = 1;
pub const TRACK_TYPE_AUDIO: u64 = 2;

/// Number of wire bytes in an element ID (IDs carry their own length class).
pub fn id_length(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Appends an element ID in wire form.
pub fn write_id(buf: &mut BytesMut, id: u32) {
    let len = id_length(id);
    for i in (0..len).rev() {
        buf.put_u8((id >> (8 * i)) as u8);
    }
}

/// Appends a size as a variable-length integer (shortest encoding that can
/// hold `value` without colliding with the unknown-size pattern).
pub fn write_size(buf: &mut BytesMut, value: u64) {
    let mut length = 1;
    while length < 8 && value >= (1u64 << (7 * length)) - 1 {
        length += 1;
    }
    let marker = 1u64 << (7 * length);
    let encoded = marker | value;
    for i in (0..length).rev() {
        buf.put_u8((encoded >> (8 * i)) as u8);
    }
}

/// Appends the 8-byte "unknown size" marker used for live-mode Segment and
/// Cluster elements.
pub fn write_unknown_size(buf: &mut BytesMut) {
    buf.put_u8(0x01);
    buf.put_slice(&[0xFF; 7]);
}

/// Appends an unsigned integer element using the minimal payload width.
pub fn write_uint(buf: &mut BytesMut, id: u32, value: u64) {
    let mut width = 1;
    while width < 8 && value >= (1u64 << (8 * width)) {
        width += 1;
    }
    write_id(buf, id);
    write_size(buf, width as u64);
    for i in (0..width).rev() {
        buf.put_u8((value >> (8 * i)) as u8);
    }
}

/// Appends an 8-byte IEEE 754 float element.
pub fn write_float(buf: &mut BytesMut, id: u32, value: f64) {
    write_id(buf, id);
    write_size(buf, 8);
    buf.put_f64(value);
}

/// Appends a string element.
pub fn write_string(buf: &mut BytesMut, id: u32, value: &str) {
    write_binary(buf, id, value.as_bytes());
}

/// Appends a binary element.
pub fn write_binary(buf: &mut BytesMut, id: u32, value: &[u8]) {
    write_id(buf, id);
    write_size(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Appends a master element with a known size and the given child payload.
pub fn write_master(buf: &mut BytesMut, id: u32, payload: &[u8]) {
    write_id(buf, id);
    write_size(buf, payload.len() as u64);
    buf.put_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(f: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut buf = BytesMut::new();
        f(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn id_lengths_follow_wire_form() {
        assert_eq!(id_length(ids::TRACK_ENTRY), 1);
        assert_eq!(id_length(ids::DOC_TYPE), 2);
        assert_eq!(id_length(ids::TIMECODE_SCALE), 3);
        assert_eq!(id_length(ids::SEGMENT), 4);
    }

    #[test]
    fn ids_written_verbatim() {
        assert_eq!(emitted(|b| write_id(b, ids::EBML)), vec![0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(emitted(|b| write_id(b, ids::SIMPLE_BLOCK)), vec![0xA3]);
    }

    #[test]
    fn size_encoding_boundaries() {
        assert_eq!(emitted(|b| write_size(b, 0)), vec![0x80]);
        assert_eq!(emitted(|b| write_size(b, 126)), vec![0xFE]);
        // 127 collides with the 1-byte unknown pattern, so two bytes.
        assert_eq!(emitted(|b| write_size(b, 127)), vec![0x40, 0x7F]);
        assert_eq!(emitted(|b| write_size(b, 0x3FFE)), vec![0x7F, 0xFE]);
        assert_eq!(emitted(|b| write_size(b, 0x3FFF)), vec![0x20, 0x3F, 0xFF]);
    }

    #[test]
    fn unknown_size_marker() {
        let bytes = emitted(write_unknown_size);
        assert_eq!(bytes, vec![0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn uint_uses_minimal_width() {
        assert_eq!(emitted(|b| write_uint(b, ids::TRACK_NUMBER, 1)), vec![0xD7, 0x81, 0x01]);
        assert_eq!(
            emitted(|b| write_uint(b, ids::TIMECODE, 0x1234)),
            vec![0xE7, 0x82, 0x12, 0x34]
        );
        assert_eq!(
            emitted(|b| write_uint(b, ids::TIMECODE_SCALE, 1_000_000)),
            vec![0x2A, 0xD7, 0xB1, 0x83, 0x0F, 0x42, 0x40]
        );
    }

    #[test]
    fn float_is_eight_bytes_big_endian() {
        let bytes = emitted(|b| write_float(b, ids::SAMPLING_FREQUENCY, 44_100.0));
        assert_eq!(bytes[0], 0xB5);
        assert_eq!(bytes[1], 0x88);
        assert_eq!(bytes.len(), 2 + 8);
        assert_eq!(f64::from_be_bytes(bytes[2..10].try_into().unwrap()), 44_100.0);
    }

    #[test]
    fn master_wraps_payload_with_known_size() {
        let bytes = emitted(|b| write_master(b, ids::INFO, &[0xAA, 0xBB]));
        assert_eq!(bytes, vec![0x15, 0x49, 0xA9, 0x66, 0x82, 0xAA, 0xBB]);
    }
}
