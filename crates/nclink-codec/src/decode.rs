//! TLV element decoding.

use bytes::Bytes;

use crate::error::{CodecError, Result};
use crate::types::{FractInt, TlvType, TLV_HEADER_SIZE};

/// A decoded parameter element from a command response or event.
///
/// Holds a cheap slice of the receive buffer; conversion to host types is
/// deferred until the consumer knows what it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamElem {
    pub typ: TlvType,
    pub data: Bytes,
}

impl ParamElem {
    pub fn new(typ: TlvType, data: impl Into<Bytes>) -> Self {
        Self {
            typ,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode an integer element into a `width`-byte destination.
    ///
    /// The wire value is big-endian at its natural width; narrower wire
    /// values are extended to `width`, with 0xff fill when the element is
    /// signed and negative. An element wider than the destination is an
    /// error rather than a silent truncation.
    fn read_int(&self, width: usize) -> Result<u64> {
        if !self.typ.is_integral() {
            return Err(CodecError::TypeMismatch { found: self.typ });
        }
        if self.data.is_empty() {
            return Err(CodecError::Truncated { need: 1, have: 0 });
        }
        if self.data.len() > width {
            return Err(CodecError::IntegerOverflow {
                size: self.data.len(),
                dst: width,
            });
        }

        let negative = TlvType::Integer == self.typ && (self.data[0] & 0x80) != 0;
        let mut value: u64 = if negative { u64::MAX } else { 0 };
        for byte in self.data.iter() {
            value = (value << 8) | u64::from(*byte);
        }
        if width < 8 {
            value &= (1u64 << (width * 8)) - 1;
        }
        Ok(value)
    }

    pub fn read_u8(&self) -> Result<u8> {
        Ok(self.read_int(1)? as u8)
    }

    pub fn read_u16(&self) -> Result<u16> {
        Ok(self.read_int(2)? as u16)
    }

    pub fn read_u32(&self) -> Result<u32> {
        Ok(self.read_int(4)? as u32)
    }

    pub fn read_u64(&self) -> Result<u64> {
        self.read_int(8)
    }

    pub fn read_i8(&self) -> Result<i8> {
        Ok(self.read_int(1)? as u8 as i8)
    }

    pub fn read_i16(&self) -> Result<i16> {
        Ok(self.read_int(2)? as u16 as i16)
    }

    pub fn read_i32(&self) -> Result<i32> {
        Ok(self.read_int(4)? as u32 as i32)
    }

    /// Decode a fractional element; a plain integer decodes with a zero
    /// fraction part.
    pub fn read_fract(&self) -> Result<FractInt> {
        match self.typ {
            TlvType::IntegerFrac => Ok(FractInt::unpack(self.read_int(4)? as u32)),
            TlvType::Integer | TlvType::IntegerUnsigned => Ok(FractInt {
                i: self.read_int(2)? as u16,
                f: 0,
            }),
            other => Err(CodecError::TypeMismatch { found: other }),
        }
    }

    /// Copy a string or opaque element into `dst`, returning the copied
    /// length. Fails if the destination cannot hold the whole element.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<usize> {
        if self.data.len() > dst.len() {
            return Err(CodecError::DestinationTooSmall {
                size: self.data.len(),
                dst: dst.len(),
            });
        }
        dst[..self.data.len()].copy_from_slice(&self.data);
        Ok(self.data.len())
    }

    /// View a string element as UTF-8 text.
    pub fn as_str(&self) -> Result<&str> {
        if TlvType::String != self.typ {
            return Err(CodecError::TypeMismatch { found: self.typ });
        }
        std::str::from_utf8(&self.data).map_err(|_| CodecError::TypeMismatch { found: self.typ })
    }
}

/// Unpack `count` TLV elements from `src`.
///
/// Elements stride by header + length + pad count (taken from the flags
/// byte); the returned elements share the source buffer.
pub fn unpack_elements(count: usize, src: &Bytes) -> Result<Vec<ParamElem>> {
    let mut elems = Vec::with_capacity(count);
    let mut offset = 0usize;

    for _ in 0..count {
        if src.len() < offset + TLV_HEADER_SIZE {
            return Err(CodecError::Truncated {
                need: offset + TLV_HEADER_SIZE,
                have: src.len(),
            });
        }

        let typ = TlvType::from_u8(src[offset])?;
        let pad = usize::from(src[offset + 1] & 0x03);
        let len = usize::from(u16::from_be_bytes([src[offset + 2], src[offset + 3]]));

        let start = offset + TLV_HEADER_SIZE;
        if src.len() < start + len {
            return Err(CodecError::Truncated {
                need: start + len,
                have: src.len(),
            });
        }

        elems.push(ParamElem {
            typ,
            data: src.slice(start..start + len),
        });

        offset = start + len + pad;
    }

    Ok(elems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{put_bytes, put_i16, put_i8, put_u16, put_u32, put_u8, put_uint_auto};
    use bytes::BytesMut;

    fn elems_from(buf: BytesMut, count: usize) -> Vec<ParamElem> {
        unpack_elements(count, &buf.freeze()).unwrap()
    }

    #[test]
    fn test_unsigned_round_trip() {
        let mut buf = BytesMut::new();
        put_u8(&mut buf, 0xab);
        put_u16(&mut buf, 0xcdef);
        put_u32(&mut buf, 0x1234_5678);
        let elems = elems_from(buf, 3);

        assert_eq!(elems[0].read_u8().unwrap(), 0xab);
        assert_eq!(elems[1].read_u16().unwrap(), 0xcdef);
        assert_eq!(elems[2].read_u32().unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_sign_extension_into_wider_destination() {
        let mut buf = BytesMut::new();
        put_i8(&mut buf, -5);
        put_i16(&mut buf, -300);
        let elems = elems_from(buf, 2);

        assert_eq!(elems[0].read_i32().unwrap(), -5);
        assert_eq!(elems[0].read_i16().unwrap(), -5);
        assert_eq!(elems[1].read_i32().unwrap(), -300);
    }

    #[test]
    fn test_narrow_unsigned_zero_extends() {
        let mut buf = BytesMut::new();
        put_u8(&mut buf, 0xff);
        let elems = elems_from(buf, 1);
        assert_eq!(elems[0].read_u32().unwrap(), 0xff);
    }

    #[test]
    fn test_integer_overflow_rejected() {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, 0x0001_0000);
        let elems = elems_from(buf, 1);
        assert!(matches!(
            elems[0].read_u16(),
            Err(CodecError::IntegerOverflow { .. })
        ));
    }

    #[test]
    fn test_fract_round_trip_via_auto() {
        let mut buf = BytesMut::new();
        put_uint_auto(&mut buf, FractInt::new(25, 7).pack());
        let elems = elems_from(buf, 1);
        assert_eq!(elems[0].typ, TlvType::IntegerFrac);
        assert_eq!(elems[0].read_fract().unwrap(), FractInt::new(25, 7));
    }

    #[test]
    fn test_string_copy_and_undersized_destination() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, TlvType::String, b"example");
        let elems = elems_from(buf, 1);

        let mut dst = [0u8; 16];
        assert_eq!(elems[0].copy_to(&mut dst).unwrap(), 7);
        assert_eq!(&dst[..7], b"example");
        assert_eq!(elems[0].as_str().unwrap(), "example");

        let mut small = [0u8; 3];
        assert!(matches!(
            elems[0].copy_to(&mut small),
            Err(CodecError::DestinationTooSmall { .. })
        ));
    }

    #[test]
    fn test_stride_with_mixed_padding() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, TlvType::Bytes, b"abc");
        put_u8(&mut buf, 9);
        put_bytes(&mut buf, TlvType::String, b"xyzw");
        let elems = elems_from(buf, 3);

        assert_eq!(elems[0].data.as_ref(), b"abc");
        assert_eq!(elems[1].read_u8().unwrap(), 9);
        assert_eq!(elems[2].data.as_ref(), b"xyzw");
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, 1);
        let mut short = buf.freeze();
        let short = short.split_to(6);
        assert!(matches!(
            unpack_elements(1, &short),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_empty_element_rejected_as_integer() {
        let elem = ParamElem::new(TlvType::IntegerUnsigned, Bytes::new());
        assert!(matches!(
            elem.read_u32(),
            Err(CodecError::Truncated { .. })
        ));
    }
}
