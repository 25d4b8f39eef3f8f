//! Typed TLV parameter codec shared by every command, response and event
//! on the coprocessor wire protocol.
//!
//! Every parameter is framed as:
//! - A 1-byte type tag
//! - A 1-byte flags field whose low two bits carry the pad count
//! - A 2-byte big-endian payload length
//! - The payload, zero-padded to a 4-byte boundary
//!
//! Integers are canonicalized big-endian on the wire regardless of host
//! endianness; strings and opaque data are copied verbatim.

pub mod decode;
pub mod encode;
pub mod error;
pub mod types;

pub use decode::{unpack_elements, ParamElem};
pub use encode::{put_bytes, put_i16, put_i32, put_i8, put_u16, put_u32, put_u8, put_uint_auto};
pub use error::{CodecError, Result};
pub use types::{is_fract_value, FractInt, TlvType, TLV_HEADER_SIZE};
