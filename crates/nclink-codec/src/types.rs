use crate::error::{CodecError, Result};

/// TLV element header: type (1) + flags (1) + length (2, big-endian) = 4 bytes.
pub const TLV_HEADER_SIZE: usize = 4;

/// Wire type tag of a TLV element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvType {
    /// Placeholder for an absent or unrecognised element.
    Invalid = 0,
    /// Signed integer, 1/2/4/8 bytes, big-endian.
    Integer = 1,
    /// Unsigned integer, 1/2/4/8 bytes, big-endian.
    IntegerUnsigned = 2,
    /// 16.16 fractional integer packed into 4 bytes.
    IntegerFrac = 3,
    /// UTF-8/ASCII text, copied verbatim.
    String = 4,
    /// Opaque byte data, copied verbatim.
    Bytes = 5,
}

impl TlvType {
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(TlvType::Invalid),
            1 => Ok(TlvType::Integer),
            2 => Ok(TlvType::IntegerUnsigned),
            3 => Ok(TlvType::IntegerFrac),
            4 => Ok(TlvType::String),
            5 => Ok(TlvType::Bytes),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    /// True for the integer family (plain, unsigned and fractional).
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            TlvType::Integer | TlvType::IntegerUnsigned | TlvType::IntegerFrac
        )
    }
}

/// A 16-bit integer part paired with a 16-bit fraction part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FractInt {
    pub i: u16,
    pub f: i16,
}

impl FractInt {
    pub fn new(i: u16, f: i16) -> Self {
        Self { i, f }
    }

    /// Pack into the 32-bit wire form: integer part in the upper half.
    pub fn pack(self) -> u32 {
        (u32::from(self.i) << 16) | u32::from(self.f as u16)
    }

    /// Unpack from the 32-bit wire form.
    pub fn unpack(value: u32) -> Self {
        Self {
            i: (value >> 16) as u16,
            f: (value & 0xffff) as i16,
        }
    }
}

/// Classify a 32-bit value as a packed fractional integer.
///
/// The peer firmware encodes against this exact rule: a value whose upper
/// 16 bits exceed 1 is fractional, anything else is a plain unsigned
/// integer. Values 0x10000..=0x1FFFF are therefore treated as plain
/// integers even though a fraction with integer part 1 packs into the
/// same range.
pub fn is_fract_value(value: u32) -> bool {
    (value >> 16) > 1
}

/// Pad count needed to bring `len` payload bytes to a 4-byte boundary.
pub fn pad_len(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fract_pack_unpack() {
        let v = FractInt::new(0x1234, -5);
        assert_eq!(FractInt::unpack(v.pack()), v);
        assert_eq!(FractInt::new(2, 0).pack(), 0x0002_0000);
    }

    #[test]
    fn test_fract_heuristic_boundaries() {
        assert!(!is_fract_value(0));
        assert!(!is_fract_value(0xffff));
        assert!(!is_fract_value(0x10000));
        assert!(!is_fract_value(0x1ffff));
        assert!(is_fract_value(0x20000));
        assert!(is_fract_value(0xffff_ffff));
    }

    #[test]
    fn test_pad_len() {
        assert_eq!(pad_len(0), 0);
        assert_eq!(pad_len(1), 3);
        assert_eq!(pad_len(2), 2);
        assert_eq!(pad_len(3), 1);
        assert_eq!(pad_len(4), 0);
        assert_eq!(pad_len(5), 3);
    }

    #[test]
    fn test_type_tag_round_trip() {
        for tag in 0..=5u8 {
            let typ = TlvType::from_u8(tag).unwrap();
            assert_eq!(typ as u8, tag);
        }
        assert!(TlvType::from_u8(6).is_err());
    }
}
