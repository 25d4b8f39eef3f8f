//! Per-socket data rings inside the slab arena.
//!
//! A stream socket uses the ring as a plain byte FIFO with `in`/`out`
//! offsets, a fill `length` and an `outstanding` count of bytes already
//! committed to the device but not yet acknowledged. Datagram sockets
//! add a bounded descriptor ring `{endpoint, len, offset}` so datagrams
//! keep their boundaries and source/destination addresses. A datagram
//! must stay contiguous in the ring; when a write would wrap, a
//! zero-endpoint padding descriptor consumes the tail of the ring and
//! realigns the write point to the start.

use std::net::SocketAddr;

use crate::slab::{SlabArena, SlabRegion};

/// Datagram descriptors per direction on a datagram socket.
pub const NUM_DGRAM_SLOTS: usize = 5;

/// One queued datagram. `endpoint == None` marks a padding entry.
#[derive(Debug, Clone, Copy)]
pub struct DgramDesc {
    pub endpoint: Option<SocketAddr>,
    pub len: u16,
    pub offset: u16,
}

const EMPTY_DESC: DgramDesc = DgramDesc {
    endpoint: None,
    len: 0,
    offset: 0,
};

#[derive(Debug)]
struct DgramRing {
    slots: [DgramDesc; NUM_DGRAM_SLOTS],
    depth: u8,
    in_idx: u8,
    out_idx: u8,
}

impl DgramRing {
    fn new() -> Self {
        Self {
            slots: [EMPTY_DESC; NUM_DGRAM_SLOTS],
            depth: 0,
            in_idx: 0,
            out_idx: 0,
        }
    }

    fn push(&mut self, desc: DgramDesc) {
        self.slots[self.in_idx as usize] = desc;
        self.depth += 1;
        self.in_idx = (self.in_idx + 1) % NUM_DGRAM_SLOTS as u8;
    }

    fn pop(&mut self) {
        self.depth -= 1;
        self.out_idx = (self.out_idx + 1) % NUM_DGRAM_SLOTS as u8;
    }

    fn front(&self) -> DgramDesc {
        self.slots[self.out_idx as usize]
    }
}

/// Result of one buffer read.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Bytes copied out.
    pub read: usize,
    /// Stream: bytes still buffered. Datagram: bytes of the current
    /// datagram discarded because the caller's buffer was smaller.
    pub remain: usize,
    /// Source endpoint of the datagram read, when known.
    pub endpoint: Option<SocketAddr>,
}

/// One direction of a socket's buffered data.
#[derive(Debug, Default)]
pub struct SockBuffer {
    region: Option<SlabRegion>,
    total: u16,
    in_off: u16,
    out_off: u16,
    length: u16,
    outstanding: u16,
    dgrams: Option<DgramRing>,
}

impl SockBuffer {
    /// Point the buffer at freshly allocated backing storage, resetting
    /// all ring state. Returns the previous region for the caller to
    /// free.
    pub fn attach(&mut self, region: SlabRegion) -> Option<SlabRegion> {
        let old = self.region.take();
        *self = SockBuffer {
            region: Some(region),
            total: region.len() as u16,
            ..SockBuffer::default()
        };
        old
    }

    /// Drop the backing storage, returning it for the caller to free.
    pub fn detach(&mut self) -> Option<SlabRegion> {
        let old = self.region.take();
        *self = SockBuffer::default();
        old
    }

    pub fn enable_dgrams(&mut self) {
        self.dgrams = Some(DgramRing::new());
    }

    pub fn is_attached(&self) -> bool {
        self.region.is_some()
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    pub fn len(&self) -> u16 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn out_off(&self) -> u16 {
        self.out_off
    }

    pub fn outstanding(&self) -> u16 {
        self.outstanding
    }

    pub fn add_outstanding(&mut self, n: u16) {
        self.outstanding += n;
    }

    pub fn sub_outstanding(&mut self, n: u16) {
        self.outstanding = self.outstanding.saturating_sub(n);
    }

    pub fn clear_outstanding(&mut self) {
        self.outstanding = 0;
    }

    pub fn dgram_depth(&self) -> u8 {
        self.dgrams.as_ref().map_or(0, |r| r.depth)
    }

    pub fn dgram_slots_full(&self) -> bool {
        self.dgram_depth() as usize == NUM_DGRAM_SLOTS
    }

    /// Descriptor `ahead` positions past the ring's read point.
    pub fn dgram_ahead(&self, ahead: u8) -> Option<DgramDesc> {
        let ring = self.dgrams.as_ref()?;
        if ahead >= ring.depth {
            return None;
        }
        let idx = (ring.out_idx + ahead) % NUM_DGRAM_SLOTS as u8;
        Some(ring.slots[idx as usize])
    }

    /// Contiguous view of ring bytes; the caller sizes `len` so the span
    /// does not wrap.
    pub fn slice_at<'a>(&self, arena: &'a SlabArena, offset: u16, len: u16) -> &'a [u8] {
        let region = self.region.expect("buffer not attached");
        &arena.slice(region)[offset as usize..(offset + len) as usize]
    }

    /// Append data, wrapping as needed. For datagram buffers the
    /// endpoint rides in a descriptor; `fragment == false` forces the
    /// datagram contiguous, inserting a padding descriptor when the
    /// write would wrap.
    pub fn write(
        &mut self,
        arena: &mut SlabArena,
        data: &[u8],
        endpoint: Option<SocketAddr>,
        fragment: bool,
    ) -> bool {
        let Some(region) = self.region else {
            return false;
        };
        if data.is_empty() || data.len() > usize::from(self.total - self.length) {
            return false;
        }
        let data_len = data.len() as u16;

        if let Some(ring) = &mut self.dgrams {
            if ring.depth as usize == NUM_DGRAM_SLOTS {
                return false;
            }
            if !fragment && self.out_off <= self.in_off {
                let tail = self.total - self.in_off;
                if data_len > tail {
                    // Not enough room before the end; wrap via a padding
                    // descriptor if both the space and a spare slot exist.
                    if data_len > self.out_off || ring.depth + 2 > NUM_DGRAM_SLOTS as u8 {
                        return false;
                    }
                    ring.push(DgramDesc {
                        endpoint: None,
                        len: tail,
                        offset: self.in_off,
                    });
                    self.length += tail;
                    self.in_off = 0;
                }
            }
            ring.push(DgramDesc {
                endpoint,
                len: data_len,
                offset: self.in_off,
            });
        }

        let buf = arena.slice_mut(region);
        let mut src = data;
        while !src.is_empty() {
            let n = src.len().min(usize::from(self.total - self.in_off));
            buf[usize::from(self.in_off)..][..n].copy_from_slice(&src[..n]);
            self.length += n as u16;
            self.in_off += n as u16;
            src = &src[n..];
            if self.in_off == self.total {
                self.in_off = 0;
            }
        }
        true
    }

    /// Read up to `want` bytes. Datagram reads never cross a datagram
    /// boundary; the unread remainder of the datagram is discarded and
    /// reported in the outcome. A padding descriptor at the ring front
    /// is consumed even under `peek`.
    pub fn read(
        &mut self,
        arena: &SlabArena,
        mut out: Option<&mut [u8]>,
        mut want: usize,
        peek: bool,
    ) -> ReadOutcome {
        let Some(region) = self.region else {
            return ReadOutcome::default();
        };

        let mut discard = 0usize;
        let mut endpoint = None;
        if let Some(ring) = self.dgrams.as_mut() {
            if ring.depth == 0 {
                return ReadOutcome::default();
            }
            let front = ring.front();
            if front.endpoint.is_none() {
                self.length -= front.len;
                self.out_off = 0;
                ring.pop();
                if ring.depth == 0 {
                    return ReadOutcome::default();
                }
            }
            let desc = ring.front();
            endpoint = desc.endpoint;
            if want > usize::from(desc.len) {
                want = usize::from(desc.len);
            } else {
                discard = usize::from(desc.len) - want;
            }
            if !peek {
                ring.pop();
            }
        } else {
            want = want.min(usize::from(self.length));
        }

        let buf = arena.slice(region);
        let mut out_off = self.out_off;
        let mut length = self.length;
        let mut read = 0usize;
        while want > 0 {
            let n = want.min(usize::from(self.total - out_off));
            if let Some(dst) = out.as_deref_mut() {
                dst[read..read + n].copy_from_slice(&buf[usize::from(out_off)..][..n]);
            }
            length -= n as u16;
            out_off += n as u16;
            if out_off >= self.total {
                out_off -= self.total;
            }
            read += n;
            want -= n;
        }

        if discard > 0 {
            out_off = (out_off + discard as u16) % self.total;
            length -= discard as u16;
        }

        if !peek {
            self.out_off = out_off;
            self.length = length;
        }

        let remain = if self.dgrams.is_none() {
            usize::from(self.length)
        } else {
            discard
        };
        ReadOutcome {
            read,
            remain,
            endpoint,
        }
    }

    /// Drop `len` bytes from the read side without copying them out.
    pub fn consume(&mut self, arena: &SlabArena, len: usize) -> ReadOutcome {
        self.read(arena, None, len, false)
    }
}
