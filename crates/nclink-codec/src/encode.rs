//! TLV element encoding.
//!
//! Wire format of one element:
//! ```text
//! ┌──────────┬──────────┬────────────┬──────────────┬────────────┐
//! │ Type (1) │ Flags (1)│ Length     │ Payload      │ Zero pad   │
//! │          │ pad count│ (2B BE)    │ (Length B)   │ (0-3 B)    │
//! └──────────┴──────────┴────────────┴──────────────┴────────────┘
//! ```
//! The flags byte carries the pad count in its low two bits so a decoder
//! can stride to the next element without re-deriving the alignment.

use bytes::{BufMut, BytesMut};

use crate::types::{is_fract_value, pad_len, FractInt, TlvType};

fn put_header(dst: &mut BytesMut, typ: TlvType, len: usize) {
    let pad = pad_len(len);
    dst.put_u8(typ as u8);
    dst.put_u8(pad as u8);
    dst.put_u16(len as u16);
}

fn put_padding(dst: &mut BytesMut, len: usize) {
    for _ in 0..pad_len(len) {
        dst.put_u8(0);
    }
}

/// Append an integer element of `width` bytes, big-endian.
fn put_int(dst: &mut BytesMut, typ: TlvType, value: u64, width: usize) -> usize {
    put_header(dst, typ, width);
    let be = value.to_be_bytes();
    dst.put_slice(&be[8 - width..]);
    put_padding(dst, width);
    4 + width + pad_len(width)
}

pub fn put_u8(dst: &mut BytesMut, value: u8) -> usize {
    put_int(dst, TlvType::IntegerUnsigned, u64::from(value), 1)
}

pub fn put_u16(dst: &mut BytesMut, value: u16) -> usize {
    put_int(dst, TlvType::IntegerUnsigned, u64::from(value), 2)
}

pub fn put_u32(dst: &mut BytesMut, value: u32) -> usize {
    put_int(dst, TlvType::IntegerUnsigned, u64::from(value), 4)
}

pub fn put_i8(dst: &mut BytesMut, value: i8) -> usize {
    put_int(dst, TlvType::Integer, value as u8 as u64, 1)
}

pub fn put_i16(dst: &mut BytesMut, value: i16) -> usize {
    put_int(dst, TlvType::Integer, value as u16 as u64, 2)
}

pub fn put_i32(dst: &mut BytesMut, value: i32) -> usize {
    put_int(dst, TlvType::Integer, value as u32 as u64, 4)
}

/// Append a packed fractional integer element.
pub fn put_fract(dst: &mut BytesMut, value: FractInt) -> usize {
    put_int(dst, TlvType::IntegerFrac, u64::from(value.pack()), 4)
}

/// Append a 32-bit value, classifying it as fractional or plain unsigned
/// by the upper-halfword heuristic.
pub fn put_uint_auto(dst: &mut BytesMut, value: u32) -> usize {
    if is_fract_value(value) {
        put_int(dst, TlvType::IntegerFrac, u64::from(value), 4)
    } else {
        put_int(dst, TlvType::IntegerUnsigned, u64::from(value), 4)
    }
}

/// Append a string or opaque element, copied verbatim.
pub fn put_bytes(dst: &mut BytesMut, typ: TlvType, data: &[u8]) -> usize {
    put_header(dst, typ, data.len());
    dst.put_slice(data);
    put_padding(dst, data.len());
    4 + data.len() + pad_len(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_is_big_endian_and_aligned() {
        let mut buf = BytesMut::new();
        let n = put_u32(&mut buf, 0x1122_3344);
        assert_eq!(n, 8);
        assert_eq!(
            buf.as_ref(),
            &[0x02, 0x00, 0x00, 0x04, 0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn test_u8_padded_to_boundary() {
        let mut buf = BytesMut::new();
        let n = put_u8(&mut buf, 0x7f);
        assert_eq!(n, 8);
        assert_eq!(
            buf.as_ref(),
            &[0x02, 0x03, 0x00, 0x01, 0x7f, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_string_carries_pad_count() {
        let mut buf = BytesMut::new();
        let n = put_bytes(&mut buf, TlvType::String, b"abcde");
        assert_eq!(n, 12);
        assert_eq!(buf[0], TlvType::String as u8);
        assert_eq!(buf[1], 3);
        assert_eq!(&buf[2..4], &[0x00, 0x05]);
        assert_eq!(&buf[4..9], b"abcde");
        assert_eq!(&buf[9..12], &[0, 0, 0]);
    }

    #[test]
    fn test_auto_type_selection() {
        let mut buf = BytesMut::new();
        put_uint_auto(&mut buf, 0x0001_ffff);
        assert_eq!(buf[0], TlvType::IntegerUnsigned as u8);

        let mut buf = BytesMut::new();
        put_uint_auto(&mut buf, 0x0002_0000);
        assert_eq!(buf[0], TlvType::IntegerFrac as u8);
    }

    #[test]
    fn test_negative_integer_payload() {
        let mut buf = BytesMut::new();
        put_i16(&mut buf, -2);
        assert_eq!(buf[0], TlvType::Integer as u8);
        assert_eq!(&buf[4..6], &[0xff, 0xfe]);
    }
}
