/// Errors that can occur during TLV encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The element payload is absent or shorter than the header claims.
    #[error("truncated element (need {need} bytes, have {have})")]
    Truncated { need: usize, have: usize },

    /// An integer element is wider than the requested destination.
    #[error("integer too wide ({size} bytes into {dst}-byte destination)")]
    IntegerOverflow { size: usize, dst: usize },

    /// A string or opaque element does not fit the destination buffer.
    #[error("destination too small ({size} bytes into {dst}-byte buffer)")]
    DestinationTooSmall { size: usize, dst: usize },

    /// The element type tag does not permit the requested conversion.
    #[error("type mismatch (element is {found:?})")]
    TypeMismatch { found: crate::types::TlvType },

    /// The type tag byte is not a known element type.
    #[error("unknown type tag 0x{0:02x}")]
    UnknownType(u8),
}

pub type Result<T> = std::result::Result<T, CodecError>;
