//! Typed command constructors.
//!
//! One method per catalogued command, validating arguments against the
//! ranges the device firmware accepts before any arena bytes are
//! written. Optional parameters are simply omitted from the wire when
//! absent; the device applies its defaults.

use bytes::Bytes;

use crate::burst::CommandBurst;
use crate::error::{ProtoError, Result};
use crate::wire::CmdId;

/// Largest payload a single socket write request may carry. Sized to
/// the biggest datagram a socket accepts, a full IPv4 UDP payload.
pub const MAX_WRITE_CHUNK: usize = 1472;

fn check_addr(addr: &[u8]) -> Result<()> {
    if addr.len() != 4 && addr.len() != 16 {
        return Err(ProtoError::InvalidArgument("address must be 4 or 16 bytes"));
    }
    Ok(())
}

impl CommandBurst {
    /// Firmware identity string query.
    pub fn cmd_gmi(&mut self) -> Result<()> {
        self.start(CmdId::GMI)?;
        self.commit()
    }

    /// Module description query.
    pub fn cmd_gmm(&mut self) -> Result<()> {
        self.start(CmdId::GMM)?;
        self.commit()
    }

    /// Firmware revision query.
    pub fn cmd_gmr(&mut self) -> Result<()> {
        self.start(CmdId::GMR)?;
        self.commit()
    }

    /// Soft reset of the coprocessor.
    pub fn cmd_rst(&mut self) -> Result<()> {
        self.start(CmdId::RST)?;
        self.commit()
    }

    /// Set a system configuration option. The value's wire type is chosen
    /// by the upper-halfword heuristic.
    pub fn cmd_cfg(&mut self, opt_id: u32, value: u32) -> Result<()> {
        self.start(CmdId::CFG)?;
        self.param_u32(opt_id)?;
        self.param_auto_u32(value)?;
        self.commit()
    }

    /// Set a string-valued system configuration option.
    pub fn cmd_cfg_str(&mut self, opt_id: u32, value: &str) -> Result<()> {
        self.start(CmdId::CFG)?;
        self.param_u32(opt_id)?;
        self.param_str(value)?;
        self.commit()
    }

    /// Device information query, optionally narrowed to one element.
    pub fn cmd_di(&mut self, opt_id: Option<u32>) -> Result<()> {
        self.start(CmdId::DI)?;
        if let Some(id) = opt_id {
            self.param_u32(id)?;
        }
        self.commit()
    }

    /// System time query. `format` 1..=3 selects the reply representation.
    pub fn cmd_time(&mut self, opt_format: Option<u8>) -> Result<()> {
        if let Some(fmt) = opt_format {
            if fmt < 1 || fmt > 3 {
                return Err(ProtoError::InvalidArgument("time format must be 1..=3"));
            }
        }
        self.start(CmdId::TIME)?;
        if let Some(fmt) = opt_format {
            self.param_u8(fmt)?;
        }
        self.commit()
    }

    /// Set the system time from a UTC seconds count.
    pub fn cmd_time_utc(&mut self, format: u8, utc_sec: u32) -> Result<()> {
        if format < 1 || format > 3 {
            return Err(ProtoError::InvalidArgument("time format must be 1..=3"));
        }
        self.start(CmdId::TIME)?;
        self.param_u8(format)?;
        self.param_u32(utc_sec)?;
        self.commit()
    }

    /// Resolve a domain name. `record_type` is the DNS record type.
    pub fn cmd_dns_resolve(&mut self, record_type: u8, domain: &str) -> Result<()> {
        if domain.is_empty() {
            return Err(ProtoError::InvalidArgument("empty domain name"));
        }
        self.start(CmdId::DNS_RESOLVE)?;
        self.param_u8(record_type)?;
        self.param_str(domain)?;
        self.commit()
    }

    /// Open a socket. `protocol` is 1 (UDP) or 2 (TCP); `opt_version`
    /// pins the IP version to 4 or 6.
    pub fn cmd_sock_open(&mut self, protocol: u8, opt_version: Option<u8>) -> Result<()> {
        if protocol < 1 || protocol > 2 {
            return Err(ProtoError::InvalidArgument("protocol must be 1 or 2"));
        }
        if let Some(v) = opt_version {
            if v != 4 && v != 6 {
                return Err(ProtoError::InvalidArgument("IP version must be 4 or 6"));
            }
        }
        self.start(CmdId::SOCK_OPEN)?;
        self.param_u8(protocol)?;
        if let Some(v) = opt_version {
            self.param_u8(v)?;
        }
        self.commit()
    }

    /// Bind to a local port. `opt_pending` sets the TCP listen backlog.
    pub fn cmd_sock_bind_local(
        &mut self,
        sock_id: u16,
        port: u16,
        opt_pending: Option<u8>,
    ) -> Result<()> {
        if let Some(p) = opt_pending {
            if p > 5 {
                return Err(ProtoError::InvalidArgument("backlog must be <= 5"));
            }
        }
        self.start(CmdId::SOCK_BIND_LOCAL)?;
        self.param_u16(sock_id)?;
        self.param_u16(port)?;
        if let Some(p) = opt_pending {
            self.param_u8(p)?;
        }
        self.commit()
    }

    /// Bind to a remote peer (TCP connect / UDP default destination).
    pub fn cmd_sock_bind_remote(&mut self, sock_id: u16, addr: &[u8], port: u16) -> Result<()> {
        check_addr(addr)?;
        self.start(CmdId::SOCK_BIND_REMOTE)?;
        self.param_u16(sock_id)?;
        self.param_bytes(addr)?;
        self.param_u16(port)?;
        self.commit()
    }

    /// Join a multicast group.
    pub fn cmd_sock_bind_mcast(&mut self, sock_id: u16, addr: &[u8], port: u16) -> Result<()> {
        check_addr(addr)?;
        self.start(CmdId::SOCK_BIND_MCAST)?;
        self.param_u16(sock_id)?;
        self.param_bytes(addr)?;
        self.param_u16(port)?;
        self.commit()
    }

    /// Start TLS on a connected socket using configuration `tls_conf`.
    pub fn cmd_sock_tls(&mut self, sock_id: u16, tls_conf: u8) -> Result<()> {
        self.start(CmdId::SOCK_TLS)?;
        self.param_u16(sock_id)?;
        self.param_u8(tls_conf)?;
        self.commit()
    }

    /// Write a payload chunk. `opt_seq` is the stream offset for paced
    /// writes; the payload rides as an external fragment without a copy.
    pub fn cmd_sock_write(
        &mut self,
        sock_id: u16,
        opt_seq: Option<u32>,
        data: Bytes,
    ) -> Result<()> {
        if data.is_empty() || data.len() > MAX_WRITE_CHUNK {
            return Err(ProtoError::InvalidArgument("bad write payload length"));
        }
        self.start(CmdId::SOCK_WRITE)?;
        self.param_u16(sock_id)?;
        self.param_u16(data.len() as u16)?;
        if let Some(seq) = opt_seq {
            self.param_u32(seq)?;
        }
        self.param_data(data)?;
        self.commit()
    }

    /// Write a datagram to an explicit destination.
    pub fn cmd_sock_write_to(
        &mut self,
        sock_id: u16,
        addr: &[u8],
        port: u16,
        opt_seq: Option<u32>,
        data: Bytes,
    ) -> Result<()> {
        check_addr(addr)?;
        if data.is_empty() || data.len() > MAX_WRITE_CHUNK {
            return Err(ProtoError::InvalidArgument("bad write payload length"));
        }
        self.start(CmdId::SOCK_WRITE_TO)?;
        self.param_u16(sock_id)?;
        self.param_bytes(addr)?;
        self.param_u16(port)?;
        self.param_u16(data.len() as u16)?;
        if let Some(seq) = opt_seq {
            self.param_u32(seq)?;
        }
        self.param_data(data)?;
        self.commit()
    }

    /// Request pending receive data. `output_mode` 1..=3 selects how the
    /// device returns the bytes; negative `length` means "all pending".
    pub fn cmd_sock_read(&mut self, sock_id: u16, output_mode: u8, length: i32) -> Result<()> {
        if output_mode < 1 || output_mode > 3 {
            return Err(ProtoError::InvalidArgument("output mode must be 1..=3"));
        }
        self.start(CmdId::SOCK_READ)?;
        self.param_u16(sock_id)?;
        self.param_u8(output_mode)?;
        self.param_i32(length)?;
        self.commit()
    }

    /// Like [`cmd_sock_read`] but the device replies from its buffered
    /// copy rather than the live stream.
    pub fn cmd_sock_read_buf(&mut self, sock_id: u16, output_mode: u8, length: i32) -> Result<()> {
        if output_mode < 1 || output_mode > 3 {
            return Err(ProtoError::InvalidArgument("output mode must be 1..=3"));
        }
        self.start(CmdId::SOCK_READ_BUF)?;
        self.param_u16(sock_id)?;
        self.param_u8(output_mode)?;
        self.param_i32(length)?;
        self.commit()
    }

    /// Close a socket.
    pub fn cmd_sock_close(&mut self, sock_id: u16) -> Result<()> {
        self.start(CmdId::SOCK_CLOSE)?;
        self.param_u16(sock_id)?;
        self.commit()
    }

    /// List open sockets, optionally narrowed to one.
    pub fn cmd_sock_list(&mut self, opt_sock_id: Option<u16>) -> Result<()> {
        self.start(CmdId::SOCK_LIST)?;
        if let Some(id) = opt_sock_id {
            self.param_u16(id)?;
        }
        self.commit()
    }

    /// Set a socket option. The value's wire type is chosen by the
    /// upper-halfword heuristic.
    pub fn cmd_sock_config(&mut self, sock_id: u16, opt_id: u32, value: u32) -> Result<()> {
        self.start(CmdId::SOCK_CONFIG)?;
        self.param_u16(sock_id)?;
        self.param_u32(opt_id)?;
        self.param_auto_u32(value)?;
        self.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MsgHeader, MsgKind};

    #[test]
    fn test_optional_params_omitted() {
        let mut burst = CommandBurst::new(2);
        burst.cmd_sock_open(2, None).unwrap();
        burst.cmd_sock_open(1, Some(6)).unwrap();

        let hdr0 = MsgHeader::decode(burst.fragment_payload(0)).unwrap();
        let hdr1 = MsgHeader::decode(burst.fragment_payload(1)).unwrap();
        assert_eq!(hdr0.count, 1);
        assert_eq!(hdr1.count, 2);
        assert_eq!(hdr0.kind, MsgKind::Req);
    }

    #[test]
    fn test_argument_validation_precedes_build() {
        let mut burst = CommandBurst::new(1);
        assert!(matches!(
            burst.cmd_sock_open(3, None),
            Err(ProtoError::InvalidArgument(_))
        ));
        assert!(matches!(
            burst.cmd_sock_read(0, 4, -1),
            Err(ProtoError::InvalidArgument(_))
        ));
        assert!(matches!(
            burst.cmd_sock_bind_local(0, 80, Some(6)),
            Err(ProtoError::InvalidArgument(_))
        ));
        // A rejected command leaves the burst reusable.
        assert_eq!(burst.num_cmds(), 0);
        burst.cmd_rst().unwrap();
        assert_eq!(burst.num_cmds(), 1);
    }

    #[test]
    fn test_write_payload_bounds() {
        let mut burst = CommandBurst::new(1);
        assert!(burst
            .cmd_sock_write(0, None, Bytes::new())
            .is_err());
        let big = Bytes::from(vec![0u8; MAX_WRITE_CHUNK + 1]);
        assert!(burst.cmd_sock_write(0, None, big).is_err());
        let ok = Bytes::from(vec![0u8; MAX_WRITE_CHUNK]);
        burst.cmd_sock_write(0, Some(0), ok).unwrap();
    }

    #[test]
    fn test_write_params_decode() {
        let payload = Bytes::from_static(&[1, 2, 3, 4, 5, 6]);
        let mut burst = CommandBurst::new(1);
        burst.cmd_sock_write(3, Some(100), payload.clone()).unwrap();

        let params = burst.params(0).unwrap();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0].read_u16().unwrap(), 3);
        assert_eq!(params[1].read_u16().unwrap(), 6);
        assert_eq!(params[2].read_u32().unwrap(), 100);
        assert_eq!(params[3].data.as_ref(), payload.as_ref());
    }

    #[test]
    fn test_dns_resolve_shape() {
        let mut burst = CommandBurst::new(1);
        burst.cmd_dns_resolve(1, "example.com").unwrap();
        let params = burst.params(0).unwrap();
        assert_eq!(params[0].read_u8().unwrap(), 1);
        assert_eq!(params[1].as_str().unwrap(), "example.com");
    }
}
