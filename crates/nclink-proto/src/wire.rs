//! Message envelope and identifier tables.
//!
//! Every message on the link starts with the same 8-byte header:
//! ```text
//! ┌──────────┬──────────────┬──────────────┬──────────────┬───────────┐
//! │ Kind (1) │ Id (2B BE)   │ Seq (2B BE)  │ Arg (2B BE)  │ Count (1) │
//! └──────────┴──────────────┴──────────────┴──────────────┴───────────┘
//! ```
//! `Arg` is the TLV payload length for requests, the status code for
//! status replies, and the originating command id for responses. `Count`
//! is the parameter/element count. Requests and their replies share the
//! byte offsets of `Id` and `Seq`, so correlation is a comparison of
//! header bytes 1..5.

use crate::error::{ProtoError, Result};

/// Fixed size of the message envelope header.
pub const MSG_HEADER_SIZE: usize = 8;

/// Message envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgKind {
    /// Host to device command request.
    Req = 0x01,
    /// Device to host terminal status for a request.
    Status = 0x02,
    /// Device to host data response for a request.
    Rsp = 0x03,
    /// Device to host unsolicited event.
    Event = 0x04,
}

impl MsgKind {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(MsgKind::Req),
            0x02 => Ok(MsgKind::Status),
            0x03 => Ok(MsgKind::Rsp),
            0x04 => Ok(MsgKind::Event),
            _ => Err(ProtoError::BadHeader("unknown message kind")),
        }
    }
}

/// Decoded message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub kind: MsgKind,
    pub id: u16,
    pub seq: u16,
    pub arg: u16,
    pub count: u8,
}

impl MsgHeader {
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < MSG_HEADER_SIZE {
            return Err(ProtoError::BadHeader("short header"));
        }
        Ok(Self {
            kind: MsgKind::from_u8(src[0])?,
            id: u16::from_be_bytes([src[1], src[2]]),
            seq: u16::from_be_bytes([src[3], src[4]]),
            arg: u16::from_be_bytes([src[5], src[6]]),
            count: src[7],
        })
    }

    pub fn encode(&self, dst: &mut [u8]) {
        dst[0] = self.kind as u8;
        dst[1..3].copy_from_slice(&self.id.to_be_bytes());
        dst[3..5].copy_from_slice(&self.seq.to_be_bytes());
        dst[5..7].copy_from_slice(&self.arg.to_be_bytes());
        dst[7] = self.count;
    }
}

/// 16-bit command identifier: `(module << 8) | ordinal`.
///
/// The module byte groups commands by coprocessor firmware module and
/// feeds the per-module in-flight counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CmdId(pub u16);

impl CmdId {
    // System module.
    pub const GMI: CmdId = CmdId(0x0101);
    pub const GMM: CmdId = CmdId(0x0102);
    pub const GMR: CmdId = CmdId(0x0103);
    pub const RST: CmdId = CmdId(0x0104);
    pub const CFG: CmdId = CmdId(0x0105);
    pub const DI: CmdId = CmdId(0x0106);
    pub const TIME: CmdId = CmdId(0x0107);

    // Socket module.
    pub const SOCK_OPEN: CmdId = CmdId(0x0901);
    pub const SOCK_BIND_LOCAL: CmdId = CmdId(0x0902);
    pub const SOCK_BIND_REMOTE: CmdId = CmdId(0x0903);
    pub const SOCK_BIND_MCAST: CmdId = CmdId(0x0904);
    pub const SOCK_TLS: CmdId = CmdId(0x0905);
    pub const SOCK_WRITE: CmdId = CmdId(0x0906);
    pub const SOCK_WRITE_TO: CmdId = CmdId(0x0907);
    pub const SOCK_READ: CmdId = CmdId(0x0908);
    pub const SOCK_READ_BUF: CmdId = CmdId(0x0909);
    pub const SOCK_CLOSE: CmdId = CmdId(0x090a);
    pub const SOCK_LIST: CmdId = CmdId(0x090b);
    pub const SOCK_CONFIG: CmdId = CmdId(0x090c);

    // DNS module.
    pub const DNS_RESOLVE: CmdId = CmdId(0x0a01);

    /// Firmware module byte.
    pub fn module(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CmdId::GMI => "GMI",
            CmdId::GMM => "GMM",
            CmdId::GMR => "GMR",
            CmdId::RST => "RST",
            CmdId::CFG => "CFG",
            CmdId::DI => "DI",
            CmdId::TIME => "TIME",
            CmdId::SOCK_OPEN => "SOCKO",
            CmdId::SOCK_BIND_LOCAL => "SOCKBL",
            CmdId::SOCK_BIND_REMOTE => "SOCKBR",
            CmdId::SOCK_BIND_MCAST => "SOCKBM",
            CmdId::SOCK_TLS => "SOCKTLS",
            CmdId::SOCK_WRITE => "SOCKWR",
            CmdId::SOCK_WRITE_TO => "SOCKWRTO",
            CmdId::SOCK_READ => "SOCKRD",
            CmdId::SOCK_READ_BUF => "SOCKRDBUF",
            CmdId::SOCK_CLOSE => "SOCKCL",
            CmdId::SOCK_LIST => "SOCKLST",
            CmdId::SOCK_CONFIG => "SOCKC",
            CmdId::DNS_RESOLVE => "DNSRESOLV",
            _ => "?",
        }
    }

    /// The full catalogue, for diagnostic listings.
    pub fn all() -> &'static [CmdId] {
        &[
            CmdId::GMI,
            CmdId::GMM,
            CmdId::GMR,
            CmdId::RST,
            CmdId::CFG,
            CmdId::DI,
            CmdId::TIME,
            CmdId::SOCK_OPEN,
            CmdId::SOCK_BIND_LOCAL,
            CmdId::SOCK_BIND_REMOTE,
            CmdId::SOCK_BIND_MCAST,
            CmdId::SOCK_TLS,
            CmdId::SOCK_WRITE,
            CmdId::SOCK_WRITE_TO,
            CmdId::SOCK_READ,
            CmdId::SOCK_READ_BUF,
            CmdId::SOCK_CLOSE,
            CmdId::SOCK_LIST,
            CmdId::SOCK_CONFIG,
            CmdId::DNS_RESOLVE,
        ]
    }
}

/// 16-bit unsolicited event identifier, same module scheme as [`CmdId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u16);

impl EventId {
    pub const BOOT: EventId = EventId(0x0181);
    pub const SOCK_IND: EventId = EventId(0x0981);
    pub const SOCK_RX_TCP: EventId = EventId(0x0982);
    pub const SOCK_RX_UDP: EventId = EventId(0x0983);
    pub const SOCK_CLOSED: EventId = EventId(0x0984);
    pub const SOCK_TLS: EventId = EventId(0x0985);
    pub const SOCK_ERROR: EventId = EventId(0x0986);
    pub const DNS_RESOLVED: EventId = EventId(0x0a81);
    pub const DNS_ERROR: EventId = EventId(0x0a82);

    pub fn module(self) -> u8 {
        (self.0 >> 8) as u8
    }
}

/// Terminal status code carried by a status reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u16);

impl Status {
    pub const OK: Status = Status(0);
    pub const ERROR: Status = Status(1);
    pub const INVALID_CMD: Status = Status(2);
    pub const UNKNOWN_CMD: Status = Status(3);
    pub const INVALID_PARAMETER: Status = Status(4);
    pub const INCORRECT_NUM_PARAMS: Status = Status(5);
    pub const TIMEOUT: Status = Status(8);
    pub const NETWORK_ERROR: Status = Status(13);
    pub const DNS_TYPE_NOT_SUPPORTED: Status = Status(16);
    pub const DNS_TIMEOUT: Status = Status(17);
    pub const DNS_ERROR: Status = Status(18);
    pub const SOCKET_ID_NOT_FOUND: Status = Status(40);
    pub const LENGTH_MISMATCH: Status = Status(41);
    pub const NO_FREE_SOCKETS: Status = Status(42);
    pub const SOCKET_INVALID_PROTOCOL: Status = Status(43);
    pub const SOCKET_CLOSE_FAILED: Status = Status(44);
    pub const SOCKET_BIND_FAILED: Status = Status(45);
    pub const SOCKET_TLS_FAILED: Status = Status(46);
    pub const SOCKET_CONNECT_FAILED: Status = Status(47);
    pub const SOCKET_SEND_FAILED: Status = Status(48);
    pub const SOCKET_SET_OPT_FAILED: Status = Status(49);
    pub const SOCKET_REMOTE_NOT_SET: Status = Status(50);
    pub const MULTICAST_ERROR: Status = Status(51);
    pub const SOCKET_NOT_READY: Status = Status(52);
    pub const SOCKET_SEQUENCE_ERROR: Status = Status(53);

    pub fn is_ok(self) -> bool {
        Status::OK == self
    }

    /// Write statuses the device reports while it cannot yet accept the
    /// chunk; the same chunk is re-issued rather than failed.
    pub fn is_transient_write_status(self) -> bool {
        matches!(
            self,
            Status::SOCKET_NOT_READY | Status::SOCKET_SEQUENCE_ERROR
        )
    }

    /// The full status table, for diagnostic listings.
    pub fn all() -> &'static [Status] {
        &[
            Status::OK,
            Status::ERROR,
            Status::INVALID_CMD,
            Status::UNKNOWN_CMD,
            Status::INVALID_PARAMETER,
            Status::INCORRECT_NUM_PARAMS,
            Status::TIMEOUT,
            Status::NETWORK_ERROR,
            Status::DNS_TYPE_NOT_SUPPORTED,
            Status::DNS_TIMEOUT,
            Status::DNS_ERROR,
            Status::SOCKET_ID_NOT_FOUND,
            Status::LENGTH_MISMATCH,
            Status::NO_FREE_SOCKETS,
            Status::SOCKET_INVALID_PROTOCOL,
            Status::SOCKET_CLOSE_FAILED,
            Status::SOCKET_BIND_FAILED,
            Status::SOCKET_TLS_FAILED,
            Status::SOCKET_CONNECT_FAILED,
            Status::SOCKET_SEND_FAILED,
            Status::SOCKET_SET_OPT_FAILED,
            Status::SOCKET_REMOTE_NOT_SET,
            Status::MULTICAST_ERROR,
            Status::SOCKET_NOT_READY,
            Status::SOCKET_SEQUENCE_ERROR,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::OK => "OK",
            Status::ERROR => "General Error",
            Status::INVALID_CMD => "Invalid Command",
            Status::UNKNOWN_CMD => "Unknown Command",
            Status::INVALID_PARAMETER => "Invalid Parameter",
            Status::INCORRECT_NUM_PARAMS => "Incorrect Number of Parameters",
            Status::TIMEOUT => "Command Timed Out",
            Status::NETWORK_ERROR => "Network Error",
            Status::DNS_TYPE_NOT_SUPPORTED => "DNS Type Not Supported",
            Status::DNS_TIMEOUT => "DNS Query Timeout",
            Status::DNS_ERROR => "DNS Error",
            Status::SOCKET_ID_NOT_FOUND => "Socket ID Not Found",
            Status::LENGTH_MISMATCH => "Length Mismatch",
            Status::NO_FREE_SOCKETS => "No Free Sockets",
            Status::SOCKET_INVALID_PROTOCOL => "Invalid Socket Protocol",
            Status::SOCKET_CLOSE_FAILED => "Socket Close Failed",
            Status::SOCKET_BIND_FAILED => "Socket Bind Failed",
            Status::SOCKET_TLS_FAILED => "Socket TLS Failed",
            Status::SOCKET_CONNECT_FAILED => "Socket Connect Failed",
            Status::SOCKET_SEND_FAILED => "Socket Send Failed",
            Status::SOCKET_SET_OPT_FAILED => "Socket Set Option Failed",
            Status::SOCKET_REMOTE_NOT_SET => "Socket Destination Not Set",
            Status::MULTICAST_ERROR => "Multicast Error",
            Status::SOCKET_NOT_READY => "Socket Not Ready",
            Status::SOCKET_SEQUENCE_ERROR => "Socket Sequence Error",
            _ => "?",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let hdr = MsgHeader {
            kind: MsgKind::Req,
            id: CmdId::SOCK_WRITE.0,
            seq: 0x1234,
            arg: 24,
            count: 3,
        };
        let mut buf = [0u8; MSG_HEADER_SIZE];
        hdr.encode(&mut buf);
        assert_eq!(MsgHeader::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn test_id_and_seq_share_offsets_across_kinds() {
        let req = MsgHeader {
            kind: MsgKind::Req,
            id: 0x0906,
            seq: 7,
            arg: 100,
            count: 2,
        };
        let status = MsgHeader {
            kind: MsgKind::Status,
            id: 0x0906,
            seq: 7,
            arg: Status::OK.0,
            count: 0,
        };
        let mut a = [0u8; MSG_HEADER_SIZE];
        let mut b = [0u8; MSG_HEADER_SIZE];
        req.encode(&mut a);
        status.encode(&mut b);
        assert_eq!(&a[1..5], &b[1..5]);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let buf = [0x7f, 0, 0, 0, 0, 0, 0, 0];
        assert!(MsgHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_module_extraction() {
        assert_eq!(CmdId::SOCK_READ.module(), 0x09);
        assert_eq!(CmdId::RST.module(), 0x01);
        assert_eq!(EventId::DNS_RESOLVED.module(), 0x0a);
    }

    #[test]
    fn test_transient_write_statuses() {
        assert!(Status::SOCKET_NOT_READY.is_transient_write_status());
        assert!(Status::SOCKET_SEQUENCE_ERROR.is_transient_write_status());
        assert!(!Status::ERROR.is_transient_write_status());
        assert!(!Status::OK.is_transient_write_status());
    }
}
