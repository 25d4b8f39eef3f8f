//! Berkeley-style socket surface over the device engine.
//!
//! Each socket owns a receive and a transmit ring in the slab arena.
//! API calls queue data and issue device commands; outcomes arrive as
//! [`SocketEvent`]s drained through [`SocketStack::poll`]. Nothing here
//! blocks: an empty receive ring is `WouldBlock`, a connect in flight is
//! `InProgress`, and the caller polls until the matching event shows up.
//!
//! Flow control follows the device's sequence pacing. Transmit chunks
//! carry a stream sequence number; an acknowledged chunk is dropped from
//! the ring and a transiently refused chunk rewinds `outstanding` so the
//! same bytes go out again. On the receive side the device announces
//! pending byte counts and the stack requests as much as fits in the
//! ring, acknowledging each delivery.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use nclink_bus::Link;
use nclink_codec::ParamElem;
use nclink_dev::{BurstId, Device, DeviceEvent};
use nclink_proto::{CommandBurst, EventId, Status};

use crate::buffer::SockBuffer;
use crate::error::{Result, SockError};
use crate::slab::SlabArena;
use crate::state::{ReadMode, SocketState};

/// Socket slots the device firmware supports.
pub const NUM_SOCKETS: usize = 10;

/// Largest payload of a single receive/transmit chunk, per protocol and
/// IP version (link MTU minus the respective headers).
pub const MAX_TCP_V4_PAYLOAD: usize = 1460;
pub const MAX_TCP_V6_PAYLOAD: usize = 1440;
pub const MAX_UDP_V4_PAYLOAD: usize = 1472;
pub const MAX_UDP_V6_PAYLOAD: usize = 1452;
pub const MAX_PAYLOAD: usize = MAX_UDP_V4_PAYLOAD;

// Socket option identifiers of the SOCKC command.
const CFG_IP_TOS: u32 = 1;
const CFG_SO_SNDBUF: u32 = 7;
const CFG_SO_RCVBUF: u32 = 8;
const CFG_SO_KEEPALIVE: u32 = 9;
const CFG_SO_LINGER: u32 = 13;
const CFG_TCP_NODELAY: u32 = 14;

const DNS_TYPE_A: u8 = 1;
const DNS_TYPE_AAAA: u8 = 28;

/// Caller-facing socket handle; stays valid until the socket is shut
/// down or torn down by a failed open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockHandle(usize);

impl SockHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrFamily {
    #[default]
    V4,
    V6,
}

impl AddrFamily {
    pub fn wire(self) -> u8 {
        match self {
            AddrFamily::V4 => 4,
            AddrFamily::V6 => 6,
        }
    }

    pub fn of(addr: &SocketAddr) -> Self {
        if addr.is_ipv6() {
            AddrFamily::V6
        } else {
            AddrFamily::V4
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SockKind {
    #[default]
    Stream,
    Dgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SockProtocol {
    #[default]
    Tcp,
    Udp,
    Tls,
}

impl SockProtocol {
    fn wire(self) -> u8 {
        match self {
            SockProtocol::Udp => 1,
            SockProtocol::Tcp | SockProtocol::Tls => 2,
        }
    }
}

/// Options accepted by [`SocketStack::set_option`].
#[derive(Debug, Clone, Copy)]
pub enum SockOption {
    Tos(u8),
    JoinMulticast(IpAddr),
    SendBufferSize(u32),
    RecvBufferSize(u32),
    KeepAlive(bool),
    Linger(u32),
    NoDelay(bool),
    /// Start TLS using the numbered device-side TLS configuration.
    TlsConfig(u8),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecvFlags {
    /// Leave the data queued.
    pub peek: bool,
    /// Report the full datagram length even when the destination buffer
    /// truncates it.
    pub truncate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEventKind {
    Open,
    Listen,
    /// An inbound connection is waiting on a listening socket.
    ConnectReq,
    Connect,
    Send,
    Recv,
    Close,
    TlsConnect,
    Error,
}

/// Completion notice drained through [`SocketStack::poll`].
#[derive(Debug, Clone, Copy)]
pub struct SocketEvent {
    pub handle: SockHandle,
    pub kind: SocketEventKind,
    pub ok: bool,
}

/// Arena and ring geometry.
#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    pub slab_size: usize,
    pub num_slabs: usize,
    pub recv_buffer: usize,
    pub send_buffer: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            slab_size: MAX_PAYLOAD,
            num_slabs: NUM_SOCKETS * 10,
            recv_buffer: MAX_PAYLOAD * 5,
            send_buffer: MAX_PAYLOAD * 5,
        }
    }
}

/// Who an in-flight command belongs to.
#[derive(Debug, Clone, Copy)]
enum Owner {
    Socket(usize),
    Dns,
}

/// What an in-flight command is doing, with the context its completion
/// handler needs.
#[derive(Debug, Clone, Copy)]
enum Op {
    Open,
    Bind,
    Connect,
    Multicast,
    Close,
    Config,
    Tls,
    Write { len: u16, seq: u16 },
    Read,
    Dns,
}

#[derive(Debug)]
struct DnsQuery {
    host: String,
    port: u16,
    results: Vec<SocketAddr>,
    failed: bool,
    pending: bool,
}

#[derive(Debug, Default)]
struct SockCtx {
    state: SocketState,
    read_mode: ReadMode,
    /// Device-assigned identifier, known once the open response lands.
    sock_id: Option<u16>,
    kind: SockKind,
    protocol: SockProtocol,
    family: AddrFamily,
    local_port: u16,
    remote: Option<SocketAddr>,
    /// Receive bytes the device reports as waiting.
    pending_recv: u16,
    /// Stream sequence of the oldest unacknowledged transmit byte.
    unacked_seq: u16,
    /// Datagram descriptors already handed to the device.
    udp_unacked: u8,
    recv: SockBuffer,
    send: SockBuffer,
}

/// The socket layer over a [`Device`].
pub struct SocketStack<L> {
    dev: Device<L>,
    arena: SlabArena,
    sockets: Vec<SockCtx>,
    // The bool records whether any status message arrived for the
    // burst; a completion without one means the engine flushed it.
    inflight: HashMap<BurstId, (Owner, Op, bool)>,
    dns: Option<DnsQuery>,
    events: VecDeque<SocketEvent>,
    cfg: StackConfig,
}

fn build(f: impl FnOnce(&mut CommandBurst) -> nclink_proto::Result<()>) -> Result<CommandBurst> {
    let mut burst = CommandBurst::new(1);
    f(&mut burst)?;
    Ok(burst)
}

fn ip_octets(ip: IpAddr, buf: &mut [u8; 16]) -> &[u8] {
    match ip {
        IpAddr::V4(a) => {
            buf[..4].copy_from_slice(&a.octets());
            &buf[..4]
        }
        IpAddr::V6(a) => {
            buf.copy_from_slice(&a.octets());
            &buf[..]
        }
    }
}

fn ip_from_bytes(data: &[u8]) -> Option<IpAddr> {
    match data.len() {
        4 => Some(IpAddr::from(<[u8; 4]>::try_from(data).ok()?)),
        16 => Some(IpAddr::from(<[u8; 16]>::try_from(data).ok()?)),
        _ => None,
    }
}

impl<L: Link> SocketStack<L> {
    pub fn new(link: L) -> Self {
        Self::with_config(link, StackConfig::default())
    }

    pub fn with_config(link: L, cfg: StackConfig) -> Self {
        let mut dev = Device::new(link);
        for module in [
            EventId::BOOT.module(),
            EventId::SOCK_IND.module(),
            EventId::DNS_RESOLVED.module(),
        ] {
            // A fresh listener table always has room for these three.
            let registered = dev.register_listener(module);
            debug_assert!(registered.is_ok());
        }
        Self {
            dev,
            arena: SlabArena::new(cfg.slab_size, cfg.num_slabs),
            sockets: (0..NUM_SOCKETS).map(|_| SockCtx::default()).collect(),
            inflight: HashMap::new(),
            dns: None,
            events: VecDeque::new(),
            cfg,
        }
    }

    pub fn device_mut(&mut self) -> &mut Device<L> {
        &mut self.dev
    }

    pub fn is_connected(&self, handle: SockHandle) -> bool {
        self.sockets
            .get(handle.0)
            .is_some_and(|s| s.state.is_connected())
    }

    pub fn local_port(&self, handle: SockHandle) -> Option<u16> {
        let ctx = self.sockets.get(handle.0)?;
        (ctx.state.is_in_use() && ctx.local_port != 0).then_some(ctx.local_port)
    }

    pub fn remote_addr(&self, handle: SockHandle) -> Option<SocketAddr> {
        self.sockets.get(handle.0).and_then(|s| s.remote)
    }

    /// Run the engine until it goes quiet, route its events, and hand
    /// back the next socket event.
    pub fn poll(&mut self) -> Result<Option<SocketEvent>> {
        if !self.dev.is_faulted() {
            while self.dev.step()? {}
        }
        while let Some(ev) = self.dev.poll() {
            self.dispatch(ev)?;
        }
        Ok(self.events.pop_front())
    }

    /// Open a socket of the given family/kind/protocol. Completion is
    /// signalled by an `Open` event.
    pub fn socket(
        &mut self,
        family: AddrFamily,
        kind: SockKind,
        protocol: SockProtocol,
    ) -> Result<SockHandle> {
        match (kind, protocol) {
            (SockKind::Stream, SockProtocol::Tcp | SockProtocol::Tls) => {}
            (SockKind::Dgram, SockProtocol::Udp) => {}
            _ => return Err(SockError::Unsupported("kind/protocol combination")),
        }
        let Some(idx) = self.sockets.iter().position(|s| !s.state.is_in_use()) else {
            return Err(SockError::NoFreeSockets);
        };

        let burst = build(|b| b.cmd_sock_open(protocol.wire(), Some(family.wire())))?;
        self.sockets[idx] = SockCtx {
            state: SocketState::opening(),
            kind,
            protocol,
            family,
            ..SockCtx::default()
        };
        if let Err(e) = self.issue(burst, Owner::Socket(idx), Op::Open) {
            self.sockets[idx].state.close();
            return Err(e);
        }
        Ok(SockHandle(idx))
    }

    /// Bind to a local port. A datagram socket gets its rings here so
    /// data can arrive as soon as the bind completes.
    pub fn bind(&mut self, handle: SockHandle, port: u16) -> Result<()> {
        let idx = self.check(handle)?;
        let sock_id = self.sockets[idx].sock_id.ok_or(SockError::NotOpen)?;
        if matches!(self.sockets[idx].kind, SockKind::Dgram) {
            self.alloc_buffers(idx)?;
        }
        let burst = build(|b| b.cmd_sock_bind_local(sock_id, port, None))?;
        self.sockets[idx].local_port = port;
        self.issue(burst, Owner::Socket(idx), Op::Bind)
    }

    /// Start accepting connections on a bound stream socket. Local-only;
    /// the device already queues connections for any bound TCP port.
    pub fn listen(&mut self, handle: SockHandle) -> Result<()> {
        let idx = self.check(handle)?;
        let ctx = &mut self.sockets[idx];
        if !matches!(ctx.kind, SockKind::Stream) {
            return Err(SockError::Unsupported("listen on datagram socket"));
        }
        if ctx.sock_id.is_none() || ctx.local_port == 0 {
            return Err(SockError::NotOpen);
        }
        ctx.state.set_listening();
        Ok(())
    }

    /// Take the next waiting inbound connection on a listening socket.
    pub fn accept(&mut self, handle: SockHandle) -> Result<(SockHandle, SocketAddr)> {
        let idx = self.check(handle)?;
        if !self.sockets[idx].state.is_listening() {
            return Err(SockError::Unsupported("accept on non-listening socket"));
        }
        let port = self.sockets[idx].local_port;
        let Some(child) = self.sockets.iter().position(|s| {
            s.state.is_in_use()
                && s.state.is_connected()
                && !s.state.is_accepted()
                && !s.state.is_listening()
                && matches!(s.kind, SockKind::Stream)
                && s.local_port == port
                && s.sock_id.is_some()
        }) else {
            return Err(SockError::WouldBlock);
        };

        self.alloc_buffers(child)?;
        self.sockets[child].state.mark_accepted();
        let remote = self.sockets[child].remote.ok_or(SockError::NotConnected)?;
        Ok((SockHandle(child), remote))
    }

    /// Connect to a remote endpoint. Always returns `InProgress`; the
    /// `Connect` event reports the outcome.
    pub fn connect(&mut self, handle: SockHandle, addr: SocketAddr) -> Result<()> {
        let idx = self.check(handle)?;
        let sock_id = self.sockets[idx].sock_id.ok_or(SockError::NotOpen)?;
        self.sockets[idx].remote = Some(addr);
        self.alloc_buffers(idx)?;

        let mut ip = [0u8; 16];
        let octets = ip_octets(addr.ip(), &mut ip);
        let burst = build(|b| b.cmd_sock_bind_remote(sock_id, octets, addr.port()))?;
        self.issue(burst, Owner::Socket(idx), Op::Connect)?;
        Err(SockError::InProgress)
    }

    /// Close the socket on the device. The slot is reclaimed when the
    /// close status arrives.
    pub fn shutdown(&mut self, handle: SockHandle) -> Result<()> {
        let idx = self.check(handle)?;
        let Some(sock_id) = self.sockets[idx].sock_id else {
            // Never opened on the device; tear down locally.
            self.destroy_socket(idx);
            return Ok(());
        };
        let burst = build(|b| b.cmd_sock_close(sock_id))?;
        self.issue(burst, Owner::Socket(idx), Op::Close)
    }

    pub fn send(&mut self, handle: SockHandle, data: &[u8]) -> Result<usize> {
        self.send_to(handle, data, None)
    }

    /// Queue data for transmission. Streams accept a partial write up to
    /// the ring space; datagrams are all-or-nothing.
    pub fn send_to(
        &mut self,
        handle: SockHandle,
        data: &[u8],
        dest: Option<SocketAddr>,
    ) -> Result<usize> {
        let idx = self.check(handle)?;
        self.sockets[idx].sock_id.ok_or(SockError::NotOpen)?;

        match self.sockets[idx].kind {
            SockKind::Dgram => {
                if let (Some(d), None) = (dest, self.sockets[idx].remote) {
                    self.sockets[idx].remote = Some(d);
                }
                let endpoint = dest
                    .or(self.sockets[idx].remote)
                    .ok_or(SockError::DestinationRequired)?;
                self.alloc_buffers(idx)?;

                let max = if endpoint.is_ipv6() {
                    MAX_UDP_V6_PAYLOAD
                } else {
                    MAX_UDP_V4_PAYLOAD
                };
                if data.len() > max {
                    return Err(SockError::MessageSize);
                }
                if self.sockets[idx].send.dgram_slots_full() {
                    return Err(SockError::WouldBlock);
                }
                if !self.sockets[idx]
                    .send
                    .write(&mut self.arena, data, Some(endpoint), false)
                {
                    return Err(SockError::WouldBlock);
                }
                self.sock_write(idx)?;
                Ok(data.len())
            }
            SockKind::Stream => {
                if !self.sockets[idx].state.is_connected() {
                    return Err(SockError::NotConnected);
                }
                let space =
                    usize::from(self.sockets[idx].send.total() - self.sockets[idx].send.len());
                let n = data.len().min(space);
                if n == 0 {
                    return Err(SockError::WouldBlock);
                }
                if !self.sockets[idx]
                    .send
                    .write(&mut self.arena, &data[..n], None, true)
                {
                    return Err(SockError::WouldBlock);
                }
                self.sock_write(idx)?;
                Ok(n)
            }
        }
    }

    pub fn recv(&mut self, handle: SockHandle, buf: &mut [u8], flags: RecvFlags) -> Result<usize> {
        self.recv_from(handle, buf, flags).map(|(n, _)| n)
    }

    /// Read buffered data. An empty ring triggers a device read request
    /// and returns `WouldBlock`; a disconnected stream with nothing
    /// buffered reads as end-of-stream.
    pub fn recv_from(
        &mut self,
        handle: SockHandle,
        buf: &mut [u8],
        flags: RecvFlags,
    ) -> Result<(usize, Option<SocketAddr>)> {
        let idx = self.check(handle)?;
        let ctx = &self.sockets[idx];
        let empty = match ctx.kind {
            SockKind::Dgram => ctx.recv.dgram_depth() == 0,
            SockKind::Stream => ctx.recv.is_empty(),
        };
        if empty {
            if matches!(ctx.kind, SockKind::Stream) && !ctx.state.is_connected() {
                return Ok((0, None));
            }
            self.sock_read(idx)?;
            return Err(SockError::WouldBlock);
        }

        let is_dgram = matches!(self.sockets[idx].kind, SockKind::Dgram);
        let want = buf.len();
        let outcome = self.sockets[idx]
            .recv
            .read(&self.arena, Some(buf), want, flags.peek);
        // Freed ring space may admit more pending data.
        self.sock_read(idx)?;

        let n = if flags.truncate && is_dgram {
            outcome.read + outcome.remain
        } else {
            outcome.read
        };
        Ok((n, outcome.endpoint))
    }

    pub fn set_option(&mut self, handle: SockHandle, option: SockOption) -> Result<()> {
        let idx = self.check(handle)?;
        let sock_id = self.sockets[idx].sock_id.ok_or(SockError::NotOpen)?;

        let (opt_id, value) = match option {
            SockOption::JoinMulticast(group) => {
                let ctx = &self.sockets[idx];
                if !matches!(ctx.kind, SockKind::Dgram) {
                    return Err(SockError::Unsupported("multicast on stream socket"));
                }
                if ctx.local_port == 0 {
                    return Err(SockError::NotOpen);
                }
                let port = ctx.local_port;
                self.sockets[idx].remote = Some(SocketAddr::new(group, port));
                self.alloc_buffers(idx)?;

                let mut ip = [0u8; 16];
                let octets = ip_octets(group, &mut ip);
                let burst = build(|b| b.cmd_sock_bind_mcast(sock_id, octets, port))?;
                return self.issue(burst, Owner::Socket(idx), Op::Multicast);
            }
            SockOption::TlsConfig(conf) => {
                let ctx = &self.sockets[idx];
                if !matches!((ctx.kind, ctx.protocol), (SockKind::Stream, SockProtocol::Tls)) {
                    return Err(SockError::Unsupported("TLS on a non-TLS socket"));
                }
                let burst = build(|b| b.cmd_sock_tls(sock_id, conf))?;
                return self.issue(burst, Owner::Socket(idx), Op::Tls);
            }
            SockOption::Tos(v) => (CFG_IP_TOS, u32::from(v)),
            SockOption::SendBufferSize(v) => (CFG_SO_SNDBUF, v),
            SockOption::RecvBufferSize(v) => (CFG_SO_RCVBUF, v),
            SockOption::KeepAlive(v) => (CFG_SO_KEEPALIVE, u32::from(v)),
            SockOption::Linger(v) => (CFG_SO_LINGER, v),
            SockOption::NoDelay(v) => {
                if !matches!(self.sockets[idx].kind, SockKind::Stream) {
                    return Err(SockError::Unsupported("TCP_NODELAY on datagram socket"));
                }
                (CFG_TCP_NODELAY, u32::from(v))
            }
        };

        let burst = build(|b| b.cmd_sock_config(sock_id, opt_id, value))?;
        self.issue(burst, Owner::Socket(idx), Op::Config)
    }

    /// Resolve a host name. The first call starts the query and returns
    /// `DnsPending`; once the device answers, the same call hands back
    /// the results with `port` applied.
    pub fn resolve(
        &mut self,
        host: &str,
        port: u16,
        family: AddrFamily,
    ) -> Result<Vec<SocketAddr>> {
        if host.is_empty() {
            return Err(SockError::DnsName);
        }
        if self.dns.as_ref().is_some_and(|q| q.host == host) {
            if let Some(q) = self.dns.take_if(|q| !q.pending) {
                if q.failed || q.results.is_empty() {
                    return Err(SockError::DnsFailed);
                }
                return Ok(q.results);
            }
            return Err(SockError::DnsPending);
        }
        if self.dns.as_ref().is_some_and(|q| q.pending) {
            // A different query is still on the wire; the device
            // answers one at a time.
            return Err(SockError::DnsPending);
        }

        let record_type = match family {
            AddrFamily::V4 => DNS_TYPE_A,
            AddrFamily::V6 => DNS_TYPE_AAAA,
        };
        let burst = build(|b| b.cmd_dns_resolve(record_type, host))?;
        self.dns = Some(DnsQuery {
            host: host.to_string(),
            port,
            results: Vec::new(),
            failed: false,
            pending: true,
        });
        self.issue(burst, Owner::Dns, Op::Dns)?;
        Err(SockError::DnsPending)
    }

    fn check(&self, handle: SockHandle) -> Result<usize> {
        let idx = handle.0;
        if idx >= self.sockets.len() || !self.sockets[idx].state.is_in_use() {
            return Err(SockError::BadHandle);
        }
        Ok(idx)
    }

    fn issue(&mut self, burst: CommandBurst, owner: Owner, op: Op) -> Result<()> {
        let id = self.dev.submit(burst)?;
        self.inflight.insert(id, (owner, op, false));
        Ok(())
    }

    fn push_event(&mut self, idx: usize, kind: SocketEventKind, ok: bool) {
        debug!(socket = idx, ?kind, ok, "socket event");
        self.events.push_back(SocketEvent {
            handle: SockHandle(idx),
            kind,
            ok,
        });
    }

    fn find_by_sock_id(&self, sock_id: u16) -> Option<usize> {
        self.sockets
            .iter()
            .position(|s| s.state.is_in_use() && s.sock_id == Some(sock_id))
    }

    fn alloc_buffers(&mut self, idx: usize) -> Result<()> {
        let dgram = matches!(self.sockets[idx].kind, SockKind::Dgram);
        if !self.sockets[idx].recv.is_attached() {
            let region = self
                .arena
                .alloc(self.cfg.recv_buffer)
                .ok_or(SockError::NoBufferSpace)?;
            self.sockets[idx].recv.attach(region);
            if dgram {
                self.sockets[idx].recv.enable_dgrams();
            }
        }
        if !self.sockets[idx].send.is_attached() {
            let Some(region) = self.arena.alloc(self.cfg.send_buffer) else {
                if let Some(old) = self.sockets[idx].recv.detach() {
                    self.arena.free(old);
                }
                return Err(SockError::NoBufferSpace);
            };
            self.sockets[idx].send.attach(region);
            if dgram {
                self.sockets[idx].send.enable_dgrams();
            }
        }
        Ok(())
    }

    fn destroy_socket(&mut self, idx: usize) {
        if let Some(region) = self.sockets[idx].recv.detach() {
            self.arena.free(region);
        }
        if let Some(region) = self.sockets[idx].send.detach() {
            self.arena.free(region);
        }
        self.sockets[idx] = SockCtx::default();
    }

    /// Request pending receive data, bounded by ring space, the family
    /// payload limit and what is already on order.
    fn sock_read(&mut self, idx: usize) -> Result<()> {
        let ctx = &mut self.sockets[idx];
        ctx.state.set_new_recv_data(false);
        let Some(sock_id) = ctx.sock_id else {
            return Ok(());
        };
        if !ctx.recv.is_attached() {
            return Ok(());
        }
        let outstanding = ctx.recv.outstanding();
        if ctx.pending_recv <= outstanding {
            return Ok(());
        }
        let space = ctx.recv.total().saturating_sub(ctx.recv.len() + outstanding);
        let fam_max = match (ctx.kind, ctx.family) {
            (SockKind::Dgram, AddrFamily::V4) => MAX_UDP_V4_PAYLOAD,
            (SockKind::Dgram, AddrFamily::V6) => MAX_UDP_V6_PAYLOAD,
            (SockKind::Stream, AddrFamily::V4) => MAX_TCP_V4_PAYLOAD,
            (SockKind::Stream, AddrFamily::V6) => MAX_TCP_V6_PAYLOAD,
        } as u16;
        let want = (ctx.pending_recv - outstanding).min(space).min(fam_max);
        if want == 0 {
            return Ok(());
        }

        ctx.recv.add_outstanding(want);
        if matches!(ctx.kind, SockKind::Dgram) {
            // A datagram is delivered whole; anything past the request
            // is dropped by the device.
            ctx.pending_recv = want;
        }
        let mode = ctx.read_mode.wire() as u8;
        let burst = build(|b| b.cmd_sock_read(sock_id, mode, i32::from(want)))?;
        self.issue(burst, Owner::Socket(idx), Op::Read)
    }

    /// Hand the device the next queued transmit unit.
    fn sock_write(&mut self, idx: usize) -> Result<()> {
        let Some(sock_id) = self.sockets[idx].sock_id else {
            return Ok(());
        };
        if !self.sockets[idx].send.is_attached() {
            return Ok(());
        }
        match self.sockets[idx].kind {
            SockKind::Dgram => self.dgram_write(idx, sock_id),
            SockKind::Stream => self.stream_write(idx, sock_id),
        }
    }

    fn dgram_write(&mut self, idx: usize, sock_id: u16) -> Result<()> {
        loop {
            let ctx = &mut self.sockets[idx];
            let Some(desc) = ctx.send.dgram_ahead(ctx.udp_unacked) else {
                return Ok(());
            };
            let Some(dest) = desc.endpoint else {
                // Padding descriptor; it retires with the datagram it
                // realigned for.
                ctx.udp_unacked += 1;
                continue;
            };

            let seq = ctx.unacked_seq.wrapping_add(ctx.send.outstanding());
            let data =
                Bytes::copy_from_slice(ctx.send.slice_at(&self.arena, desc.offset, desc.len));
            let mut ip = [0u8; 16];
            let octets = ip_octets(dest.ip(), &mut ip);
            let burst = build(|b| {
                b.cmd_sock_write_to(sock_id, octets, dest.port(), Some(u32::from(seq)), data)
            })?;
            ctx.send.add_outstanding(desc.len);
            ctx.udp_unacked += 1;
            let len = desc.len;
            return self.issue(burst, Owner::Socket(idx), Op::Write { len, seq });
        }
    }

    fn stream_write(&mut self, idx: usize, sock_id: u16) -> Result<()> {
        let ctx = &mut self.sockets[idx];
        if !ctx.state.is_connected() {
            return Ok(());
        }
        let outstanding = ctx.send.outstanding();
        let queued = ctx.send.len().saturating_sub(outstanding);
        if queued == 0 {
            return Ok(());
        }
        let max = match ctx.remote {
            Some(a) if a.is_ipv6() => MAX_TCP_V6_PAYLOAD,
            _ => MAX_TCP_V4_PAYLOAD,
        } as u16;
        let total = ctx.send.total();
        let mut off = ctx.send.out_off() + outstanding;
        if off >= total {
            off -= total;
        }
        let len = max.min(queued).min(total - off);
        let seq = ctx.unacked_seq.wrapping_add(outstanding);
        let data = Bytes::copy_from_slice(ctx.send.slice_at(&self.arena, off, len));
        let burst = build(|b| b.cmd_sock_write(sock_id, Some(u32::from(seq)), data))?;
        ctx.send.add_outstanding(len);
        self.issue(burst, Owner::Socket(idx), Op::Write { len, seq })
    }

    fn dispatch(&mut self, ev: DeviceEvent) -> Result<()> {
        match ev {
            DeviceEvent::TxComplete { burst } => {
                trace!(?burst, "burst transmitted");
                Ok(())
            }
            DeviceEvent::CmdStatus { burst, status, .. } => {
                let Some(entry) = self.inflight.get_mut(&burst) else {
                    return Ok(());
                };
                entry.2 = true;
                let (owner, op, _) = *entry;
                self.on_status(owner, op, status)
            }
            DeviceEvent::Response { burst, elems, .. } => {
                let Some(&(owner, op, _)) = self.inflight.get(&burst) else {
                    return Ok(());
                };
                self.on_response(owner, op, &elems);
                Ok(())
            }
            DeviceEvent::BurstComplete {
                burst, num_errors, ..
            } => {
                // An engine flush retires failed bursts without any
                // status message; report the error to the owner so the
                // operation doesn't dangle.
                if let Some((owner, op, seen)) = self.inflight.remove(&burst) {
                    if !seen && num_errors > 0 {
                        return self.on_status(owner, op, Status::ERROR);
                    }
                }
                Ok(())
            }
            DeviceEvent::Unsolicited { event, elems } => self.on_unsolicited(event, &elems),
        }
    }

    fn on_status(&mut self, owner: Owner, op: Op, status: Status) -> Result<()> {
        let idx = match owner {
            Owner::Dns => {
                if !status.is_ok() {
                    if let Some(q) = &mut self.dns {
                        q.pending = false;
                        q.failed = true;
                    }
                }
                return Ok(());
            }
            Owner::Socket(idx) => idx,
        };
        if !self.sockets[idx].state.is_in_use() {
            return Ok(());
        }

        match op {
            Op::Open => {
                self.push_event(idx, SocketEventKind::Open, status.is_ok());
                if !status.is_ok() {
                    self.destroy_socket(idx);
                }
                Ok(())
            }
            Op::Bind => {
                self.push_event(idx, SocketEventKind::Listen, status.is_ok());
                Ok(())
            }
            Op::Connect | Op::Multicast => {
                if status.is_ok() {
                    let ctx = &mut self.sockets[idx];
                    // A datagram socket is usable as soon as the remote
                    // binding sticks; a stream waits for the connection
                    // indication.
                    if matches!(ctx.kind, SockKind::Dgram) {
                        ctx.state.set_connected(true);
                        self.push_event(idx, SocketEventKind::Connect, true);
                    }
                } else {
                    self.push_event(idx, SocketEventKind::Connect, false);
                }
                Ok(())
            }
            Op::Close => {
                self.push_event(idx, SocketEventKind::Close, status.is_ok());
                self.destroy_socket(idx);
                Ok(())
            }
            Op::Config => {
                if !status.is_ok() {
                    warn!(status = status.name(), "socket option rejected");
                }
                Ok(())
            }
            Op::Tls => {
                if !status.is_ok() {
                    self.push_event(idx, SocketEventKind::TlsConnect, false);
                }
                Ok(())
            }
            Op::Write { len, seq } => self.on_write_status(idx, status, len, seq),
            Op::Read => self.on_read_status(idx, status),
            Op::Dns => Ok(()),
        }
    }

    /// An acknowledged chunk leaves the ring and advances the sequence;
    /// a transient refusal at the unacknowledged base rewinds so the
    /// same bytes are re-sent.
    fn on_write_status(&mut self, idx: usize, status: Status, len: u16, seq: u16) -> Result<()> {
        if status.is_ok() {
            let ctx = &mut self.sockets[idx];
            let before = ctx.send.dgram_depth();
            ctx.send.consume(&self.arena, usize::from(len));
            let freed = before - ctx.send.dgram_depth();
            ctx.udp_unacked = ctx.udp_unacked.saturating_sub(freed);
            ctx.send.sub_outstanding(len);
            ctx.unacked_seq = seq.wrapping_add(len);
            self.push_event(idx, SocketEventKind::Send, true);
            self.sock_write(idx)
        } else if status.is_transient_write_status() {
            let ctx = &mut self.sockets[idx];
            if seq == ctx.unacked_seq {
                ctx.send.clear_outstanding();
                ctx.udp_unacked = 0;
            }
            self.sock_write(idx)
        } else {
            warn!(status = status.name(), "socket write failed");
            let ctx = &mut self.sockets[idx];
            ctx.send.clear_outstanding();
            ctx.udp_unacked = 0;
            self.push_event(idx, SocketEventKind::Send, false);
            Ok(())
        }
    }

    fn on_read_status(&mut self, idx: usize, status: Status) -> Result<()> {
        let latched = self.sockets[idx].state.has_new_recv_data();
        if latched {
            self.push_event(idx, SocketEventKind::Recv, true);
        }
        if status.is_ok() {
            if self.sockets[idx].state.is_connected() || latched {
                self.sock_read(idx)?;
            }
        } else {
            warn!(status = status.name(), "socket read failed");
            self.sockets[idx].recv.clear_outstanding();
        }
        Ok(())
    }

    fn on_response(&mut self, owner: Owner, op: Op, elems: &[ParamElem]) {
        let Owner::Socket(idx) = owner else {
            return;
        };
        match op {
            Op::Open => {
                if let Some(id) = elems.first().and_then(|e| e.read_u16().ok()) {
                    if self.sockets[idx].sock_id.is_none() {
                        self.sockets[idx].sock_id = Some(id);
                    }
                }
            }
            Op::Read => self.on_read_response(idx, elems),
            _ => {}
        }
    }

    /// A read response carries `[sock_id, length, (pending, ...), data]`
    /// with source address and port in positions 4/5 for datagrams.
    fn on_read_response(&mut self, idx: usize, elems: &[ParamElem]) {
        if elems.len() < 3 {
            warn!(n = elems.len(), "short read response");
            return;
        }
        let ctx = &mut self.sockets[idx];
        let Ok(sock_id) = elems[0].read_u16() else {
            return;
        };
        if ctx.sock_id != Some(sock_id) {
            warn!(sock_id, "read response for unexpected socket id");
            return;
        }
        let length = elems[1].read_u16().unwrap_or(0);

        let mut endpoint = None;
        if elems.len() >= 4 {
            ctx.pending_recv = elems[2].read_u16().unwrap_or(0);
            if elems.len() == 7 {
                let port = elems[5].read_u16().unwrap_or(0);
                if let Some(ip) = ip_from_bytes(&elems[4].data) {
                    endpoint = Some(SocketAddr::new(ip, port));
                }
            }
        } else {
            ctx.pending_recv = ctx.pending_recv.saturating_sub(length);
        }
        if endpoint.is_none() && matches!(ctx.kind, SockKind::Dgram) {
            // A connected-socket read omits the source; a None endpoint
            // would read back as ring padding.
            endpoint = ctx.remote;
        }

        let data = elems[elems.len() - 1].data.clone();
        if length > 0 && !ctx.recv.write(&mut self.arena, &data, endpoint, true) {
            warn!(length, "receive ring overflow, dropping data");
        }
        ctx.recv.sub_outstanding(length);
        ctx.state.set_new_recv_data(true);
    }

    fn on_unsolicited(&mut self, event: EventId, elems: &[ParamElem]) -> Result<()> {
        match event {
            EventId::SOCK_IND => self.on_sock_ind(elems),
            EventId::SOCK_RX_TCP => {
                if elems.len() >= 2 {
                    if let Some(idx) = self.event_socket(elems) {
                        self.sockets[idx].pending_recv = elems[1].read_u16().unwrap_or(0);
                        self.sock_read(idx)?;
                    }
                }
                Ok(())
            }
            EventId::SOCK_RX_UDP => {
                if elems.len() >= 4 {
                    if let Some(idx) = self.event_socket(elems) {
                        self.sockets[idx].pending_recv = elems[3].read_u16().unwrap_or(0);
                        self.sock_read(idx)?;
                    }
                }
                Ok(())
            }
            EventId::SOCK_CLOSED => {
                if let Some(idx) = self.event_socket(elems) {
                    self.sockets[idx].state.set_connected(false);
                    self.push_event(idx, SocketEventKind::Close, true);
                }
                Ok(())
            }
            EventId::SOCK_TLS => {
                if let Some(idx) = self.event_socket(elems) {
                    self.sockets[idx].state.set_connected(true);
                    self.push_event(idx, SocketEventKind::TlsConnect, true);
                }
                Ok(())
            }
            EventId::SOCK_ERROR => {
                if let Some(idx) = self.event_socket(elems) {
                    let code = elems.get(1).and_then(|e| e.read_u16().ok()).unwrap_or(0);
                    warn!(socket = idx, code, "socket error event");
                    self.push_event(idx, SocketEventKind::Error, false);
                }
                Ok(())
            }
            EventId::DNS_RESOLVED => {
                self.on_dns_resolved(elems);
                Ok(())
            }
            EventId::DNS_ERROR => {
                if let Some(q) = &mut self.dns {
                    q.pending = false;
                    q.failed = true;
                }
                Ok(())
            }
            other => {
                trace!(event = other.0, "unhandled device event");
                Ok(())
            }
        }
    }

    fn event_socket(&self, elems: &[ParamElem]) -> Option<usize> {
        let sock_id = elems.first()?.read_u16().ok()?;
        self.find_by_sock_id(sock_id)
    }

    /// Connection indication: completes an outbound stream connect when
    /// the socket id is known, otherwise adopts an inbound connection
    /// into a free slot behind its listening socket.
    fn on_sock_ind(&mut self, elems: &[ParamElem]) -> Result<()> {
        if elems.len() < 5 {
            warn!(n = elems.len(), "short connection indication");
            return Ok(());
        }
        let Ok(sock_id) = elems[0].read_u16() else {
            return Ok(());
        };
        if let Some(idx) = self.find_by_sock_id(sock_id) {
            self.sockets[idx].state.set_connected(true);
            self.push_event(idx, SocketEventKind::Connect, true);
            return Ok(());
        }

        let (Some(_local_ip), Ok(local_port)) = (ip_from_bytes(&elems[1].data), elems[2].read_u16())
        else {
            return Ok(());
        };
        let (Some(remote_ip), Ok(remote_port)) =
            (ip_from_bytes(&elems[3].data), elems[4].read_u16())
        else {
            return Ok(());
        };

        let Some(listener) = self
            .sockets
            .iter()
            .position(|s| s.state.is_listening() && s.local_port == local_port)
        else {
            warn!(local_port, "connection indication without listener");
            return Ok(());
        };
        let Some(child) = self.sockets.iter().position(|s| !s.state.is_in_use()) else {
            warn!("no free socket for inbound connection");
            return Ok(());
        };

        self.sockets[child] = SockCtx {
            state: SocketState::accepted_child(),
            sock_id: Some(sock_id),
            kind: SockKind::Stream,
            protocol: SockProtocol::Tcp,
            family: if remote_ip.is_ipv6() {
                AddrFamily::V6
            } else {
                AddrFamily::V4
            },
            local_port,
            remote: Some(SocketAddr::new(remote_ip, remote_port)),
            ..SockCtx::default()
        };
        self.push_event(listener, SocketEventKind::ConnectReq, true);
        Ok(())
    }

    fn on_dns_resolved(&mut self, elems: &[ParamElem]) {
        if elems.len() < 3 {
            return;
        }
        let Some(q) = &mut self.dns else {
            return;
        };
        let domain = elems[1].as_str().unwrap_or("");
        if domain != q.host {
            trace!(domain, "resolution for a different query");
            return;
        }
        q.pending = false;
        if let Some(ip) = ip_from_bytes(&elems[2].data) {
            q.results.push(SocketAddr::new(ip, q.port));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nclink_bus::Result as BusResult;

    struct NullLink;

    impl Link for NullLink {
        fn reg_read(&mut self, _addr: u32) -> BusResult<u8> {
            Ok(0)
        }
        fn reg_write(&mut self, _addr: u32, _value: u8) -> BusResult<()> {
            Ok(())
        }
        fn mem_read(&mut self, _addr: u32, _buf: &mut [u8]) -> BusResult<()> {
            Ok(())
        }
        fn mem_write(&mut self, _addr: u32, _data: &[u8]) -> BusResult<()> {
            Ok(())
        }
        fn fifo_read(&mut self, _addr: u32, _buf: &mut [u8]) -> BusResult<()> {
            Ok(())
        }
        fn fifo_write(&mut self, _addr: u32, _data: &[u8]) -> BusResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_kind_protocol_combinations() {
        let mut stack = SocketStack::new(NullLink);
        assert!(matches!(
            stack.socket(AddrFamily::V4, SockKind::Stream, SockProtocol::Udp),
            Err(SockError::Unsupported(_))
        ));
        assert!(matches!(
            stack.socket(AddrFamily::V4, SockKind::Dgram, SockProtocol::Tcp),
            Err(SockError::Unsupported(_))
        ));
        assert!(stack
            .socket(AddrFamily::V6, SockKind::Stream, SockProtocol::Tls)
            .is_ok());
    }

    #[test]
    fn test_socket_slots_exhausted() {
        let mut stack = SocketStack::new(NullLink);
        for _ in 0..NUM_SOCKETS {
            stack
                .socket(AddrFamily::V4, SockKind::Stream, SockProtocol::Tcp)
                .unwrap();
        }
        assert!(matches!(
            stack.socket(AddrFamily::V4, SockKind::Stream, SockProtocol::Tcp),
            Err(SockError::NoFreeSockets)
        ));
    }

    #[test]
    fn test_operations_need_open_response() {
        let mut stack = SocketStack::new(NullLink);
        let h = stack
            .socket(AddrFamily::V4, SockKind::Stream, SockProtocol::Tcp)
            .unwrap();
        // No device response yet, so the socket has no id.
        assert!(matches!(stack.bind(h, 80), Err(SockError::NotOpen)));
        assert!(matches!(
            stack.connect(h, "1.2.3.4:80".parse().unwrap()),
            Err(SockError::NotOpen)
        ));
        assert!(matches!(
            stack.send(h, b"x"),
            Err(SockError::NotOpen)
        ));
    }

    #[test]
    fn test_bad_handle_rejected() {
        let mut stack = SocketStack::new(NullLink);
        let mut buf = [0u8; 8];
        assert!(matches!(
            stack.recv(SockHandle(3), &mut buf, RecvFlags::default()),
            Err(SockError::BadHandle)
        ));
    }

    #[test]
    fn test_listen_requires_stream_and_bind() {
        let mut stack = SocketStack::new(NullLink);
        let udp = stack
            .socket(AddrFamily::V4, SockKind::Dgram, SockProtocol::Udp)
            .unwrap();
        assert!(matches!(
            stack.listen(udp),
            Err(SockError::Unsupported(_))
        ));
        let tcp = stack
            .socket(AddrFamily::V4, SockKind::Stream, SockProtocol::Tcp)
            .unwrap();
        assert!(matches!(stack.listen(tcp), Err(SockError::NotOpen)));
    }
}
