//! The command/response engine.
//!
//! Bursts are queued FIFO and announced to the device one at a time
//! through the general-purpose mailbox word; the device answers with
//! transmit-request and receive-request events that the engine services
//! one bus transfer per call, so a single thread can interleave link
//! work with everything else. Outcomes surface as [`DeviceEvent`]s
//! drained through [`Device::poll`].
//!
//! Status replies are matched to the oldest queued burst by comparing
//! the `{id, seq}` header bytes; when every command in that burst has a
//! terminal status the burst is retired and handed back through
//! `BurstComplete`. A failed bus transfer latches a sticky fault: the
//! queue is flushed with synthetic error completions and the engine
//! refuses further work until [`Device::reset`].

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use nclink_bus::{regs, BusError, Link};
use nclink_codec::unpack_elements;
use nclink_proto::{
    CmdId, CommandBurst, EventId, FragSource, MsgHeader, MsgKind, Status, MSG_HEADER_SIZE,
};

use crate::error::{DevError, Result};
use crate::event::{BurstId, DeviceEvent};

// Event types carried in the top byte of the mailbox word.
const EVT_TX_REQ: u8 = 0x01;
const EVT_RX_REQ: u8 = 0x02;

const NUM_MOD_COUNTERS: usize = 15;
const NUM_EVENT_LISTENERS: usize = 4;

struct Pending {
    id: BurstId,
    burst: CommandBurst,
    cursor: usize,
    announced: bool,
    tx_done: bool,
}

enum Pump {
    Idle,
    Tx {
        number: u8,
        length: u16,
    },
    Rx {
        number: u16,
        length: u16,
        lengths: Option<VecDeque<u32>>,
    },
}

/// Device engine over a [`Link`].
pub struct Device<L> {
    link: L,
    fault: bool,
    next_seq: u16,
    next_burst_id: u64,
    queue: VecDeque<Pending>,
    pump: Pump,
    events: VecDeque<DeviceEvent>,
    mod_counts: [(u8, u8); NUM_MOD_COUNTERS],
    listeners: [u8; NUM_EVENT_LISTENERS],
}

impl<L: Link> Device<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            fault: false,
            next_seq: 0,
            next_burst_id: 0,
            queue: VecDeque::new(),
            pump: Pump::Idle,
            events: VecDeque::new(),
            mod_counts: [(0, 0); NUM_MOD_COUNTERS],
            listeners: [0; NUM_EVENT_LISTENERS],
        }
    }

    /// Register interest in unsolicited events from a firmware module.
    /// Events from unregistered modules are dropped with a warning.
    pub fn register_listener(&mut self, module: u8) -> Result<()> {
        if self.listeners.contains(&module) {
            return Ok(());
        }
        match self.listeners.iter_mut().find(|slot| **slot == 0) {
            Some(slot) => {
                *slot = module;
                Ok(())
            }
            None => Err(DevError::ListenerTableFull),
        }
    }

    pub fn deregister_listener(&mut self, module: u8) {
        for slot in self.listeners.iter_mut() {
            if *slot == module {
                *slot = 0;
            }
        }
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn is_faulted(&self) -> bool {
        self.fault
    }

    /// Queued bursts not yet fully acknowledged.
    pub fn pending_bursts(&self) -> usize {
        self.queue.len()
    }

    /// Commands in flight for a firmware module.
    pub fn module_in_flight(&self, module: u8) -> u8 {
        self.mod_counts
            .iter()
            .find(|slot| slot.0 == module)
            .map_or(0, |slot| slot.1)
    }

    /// Drain the next engine event.
    pub fn poll(&mut self) -> Option<DeviceEvent> {
        self.events.pop_front()
    }

    /// Seal a burst, assign sequence numbers, queue it and announce it
    /// to the device if no other burst is mid-transmission.
    pub fn submit(&mut self, mut burst: CommandBurst) -> Result<BurstId> {
        if self.fault {
            return Err(DevError::Faulted);
        }

        self.next_seq = burst.seal(self.next_seq)?;
        for i in 0..burst.num_cmds() {
            let module = burst.cmd_id(i)?.module();
            self.mod_count(module, true);
        }

        let id = BurstId(self.next_burst_id);
        self.next_burst_id += 1;
        debug!(id = id.0, cmds = burst.num_cmds(), "burst submitted");

        let announce_now = !self.queue.iter().any(|p| p.announced && !p.tx_done);
        self.queue.push_back(Pending {
            id,
            burst,
            cursor: 0,
            announced: false,
            tx_done: false,
        });
        if announce_now {
            self.announce(self.queue.len() - 1)?;
        }
        Ok(id)
    }

    /// One engine step: latch a device event if the pump is idle,
    /// otherwise perform the next transfer of the current event.
    /// Returns whether any work happened.
    pub fn step(&mut self) -> Result<bool> {
        if matches!(self.pump, Pump::Idle) {
            self.handle_interrupt()
        } else {
            self.service()
        }
    }

    /// Clear a latched fault and start over. Anything still queued is
    /// flushed with synthetic error completions first.
    pub fn reset(&mut self) {
        self.flush();
        self.fault = false;
    }

    /// Check the interrupt register and latch a pending device event.
    pub fn handle_interrupt(&mut self) -> Result<bool> {
        if self.fault {
            return Err(DevError::Faulted);
        }
        if !matches!(self.pump, Pump::Idle) {
            return Ok(false);
        }

        let int = match self.link.reg_read(regs::FN1_INT_ID_CLR) {
            Ok(v) => v,
            Err(e) => return Err(self.latch_fault(e)),
        };
        if int & regs::FN1_INT_MSG_FROM_ARM == 0 {
            return Ok(false);
        }

        let mut buf = [0u8; 4];
        if let Err(e) = self.link.mem_read(regs::FN1_ARM_GP, &mut buf) {
            return Err(self.latch_fault(e));
        }
        let word = u32::from_le_bytes(buf);
        let typ = (word >> 24) as u8;
        let number = (word >> 16) as u8;
        let length = word as u16;
        trace!(typ, number, length, "device event");

        let mut ack = regs::FN1_INT_MSG_FROM_ARM;
        match typ {
            EVT_TX_REQ => {
                if self.queue.iter().any(|p| p.announced && !p.tx_done) {
                    if int & regs::FN1_INT_ACK_TO_HOST != 0 {
                        ack |= regs::FN1_INT_ACK_TO_HOST;
                    } else {
                        warn!("transmit request without host ack");
                    }
                    self.pump = Pump::Tx { number, length };
                }
            }
            EVT_RX_REQ => {
                self.pump = Pump::Rx {
                    number: u16::from(number),
                    length,
                    lengths: None,
                };
            }
            _ => return Err(DevError::BadEvent(word)),
        }

        if let Err(e) = self.link.reg_write(regs::FN1_INT_ID_CLR, ack) {
            return Err(self.latch_fault(e));
        }
        Ok(true)
    }

    /// Perform the next transfer of the latched event.
    pub fn service(&mut self) -> Result<bool> {
        if self.fault {
            return Err(DevError::Faulted);
        }
        match std::mem::replace(&mut self.pump, Pump::Idle) {
            Pump::Idle => Ok(false),
            Pump::Tx { number, length } => self.service_tx(number, length),
            Pump::Rx {
                number,
                length,
                lengths,
            } => self.service_rx(number, length, lengths),
        }
    }

    fn latch_fault(&mut self, err: BusError) -> DevError {
        warn!(%err, "bus fault");
        self.fault = true;
        self.flush();
        err.into()
    }

    /// Flush the queue with synthetic error completions.
    fn flush(&mut self) {
        self.pump = Pump::Idle;
        while let Some(mut p) = self.queue.pop_front() {
            p.burst.complete_all(Status::ERROR);
            self.events.push_back(DeviceEvent::BurstComplete {
                burst: p.id,
                num_errors: p.burst.num_errors(),
                cmds: p.burst,
            });
        }
        self.mod_counts = [(0, 0); NUM_MOD_COUNTERS];
    }

    /// Tell the device how many commands follow and their sizes: a
    /// multi-command burst publishes its size list through the
    /// content-addressed window first, a single command carries its
    /// size in the mailbox word itself.
    fn announce(&mut self, idx: usize) -> Result<()> {
        let n = self.queue[idx].burst.num_cmds();
        let sizes = self.queue[idx].burst.cmd_sizes_words();
        let mut word = u32::from(EVT_TX_REQ) << 24 | (n as u32) << 16;

        let res = (|| {
            if n > 1 {
                self.link.mem_write(regs::FN0_FBR_FN1_CSA_PTR, &[0, 0, 0])?;
                let mut list = Vec::with_capacity(n * 4);
                for size in &sizes {
                    list.extend_from_slice(&size.to_le_bytes());
                }
                self.link.fifo_write(regs::FN0_FBR_FN1_CSA_DATA, &list)?;
                word |= n as u32;
            } else {
                word |= sizes[0];
            }
            self.link.mem_write(regs::FN1_SD_HOST_GP, &word.to_le_bytes())
        })();

        match res {
            Ok(()) => {
                self.queue[idx].announced = true;
                Ok(())
            }
            Err(e) => Err(self.latch_fault(e)),
        }
    }

    fn announce_next(&mut self) -> Result<()> {
        if let Some(idx) = self.queue.iter().position(|p| !p.announced) {
            self.announce(idx)?;
        }
        Ok(())
    }

    /// Send the next fragment run of the burst under transmission. An
    /// unaligned external payload is sent as an aligned bulk transfer
    /// plus its tail merged with the following arena fragment, so every
    /// bus write stays 32-bit aligned without copying the bulk.
    fn service_tx(&mut self, mut number: u8, mut length: u16) -> Result<bool> {
        if number == 0 || length == 0 {
            return Ok(false);
        }
        let Some(idx) = self.queue.iter().position(|p| p.announced && !p.tx_done) else {
            return Ok(false);
        };

        let outcome = Self::write_fragments(&mut self.link, &self.queue[idx]);
        let (words, consumed) = match outcome {
            Ok(v) => v,
            Err(e) => return Err(self.latch_fault(e)),
        };

        number -= 1;
        length = length.saturating_sub(words);

        let frag_count = self.queue[idx].burst.fragments().len();
        let p = &mut self.queue[idx];
        p.cursor += consumed;

        if p.cursor >= frag_count {
            p.tx_done = true;
            let id = p.id;
            debug!(id = id.0, "burst transmitted");
            self.events.push_back(DeviceEvent::TxComplete { burst: id });
            self.announce_next()?;
        } else if number > 0 {
            self.pump = Pump::Tx { number, length };
        }
        Ok(true)
    }

    fn write_fragments(
        link: &mut L,
        p: &Pending,
    ) -> std::result::Result<(u16, usize), BusError> {
        let frag = &p.burst.fragments()[p.cursor];
        match &frag.source {
            FragSource::Arena { .. } => {
                let data = p.burst.fragment_payload(p.cursor);
                link.fifo_write(regs::FN1_DATA, data)?;
                Ok((((data.len() + 3) >> 2) as u16, 1))
            }
            FragSource::External(data) => {
                let bulk = data.len() & !3;
                if bulk > 0 {
                    link.fifo_write(regs::FN1_DATA, &data[..bulk])?;
                }
                let tail = &data[bulk..];
                if tail.is_empty() {
                    Ok(((bulk >> 2) as u16, 1))
                } else {
                    let next = p.burst.fragment_payload(p.cursor + 1);
                    let mut merged = Vec::with_capacity(tail.len() + next.len());
                    merged.extend_from_slice(tail);
                    merged.extend_from_slice(next);
                    link.fifo_write(regs::FN1_DATA, &merged)?;
                    Ok((((bulk + merged.len()) >> 2) as u16, 2))
                }
            }
        }
    }

    /// Receive the next message of the latched receive event. The first
    /// call of a multi-message event reads the per-message length table.
    fn service_rx(
        &mut self,
        mut number: u16,
        length: u16,
        mut lengths: Option<VecDeque<u32>>,
    ) -> Result<bool> {
        if number == 0 || length == 0 {
            return Ok(false);
        }

        if lengths.is_none() {
            if number > 1 {
                let n = usize::from(length);
                let mut buf = vec![0u8; n * 4];
                if let Err(e) = self.link.fifo_read(regs::FN1_DATA, &mut buf) {
                    warn!(%e, "length table read failed");
                    return Err(self.latch_fault(e));
                }
                let table = buf
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                number = length;
                lengths = Some(table);
            } else {
                lengths = Some(VecDeque::from([u32::from(length)]));
            }
        }

        let mut table = lengths.unwrap_or_default();
        let Some(words) = table.pop_front() else {
            return Ok(false);
        };
        let mut msg = vec![0u8; (words as usize) << 2];
        if let Err(e) = self.link.fifo_read(regs::FN1_DATA, &mut msg) {
            warn!(%e, "message read failed");
            return Err(self.latch_fault(e));
        }
        self.decode_message(&msg);

        number -= 1;
        if number > 0 {
            self.pump = Pump::Rx {
                number,
                length,
                lengths: Some(table),
            };
        }
        Ok(true)
    }

    /// Route one received message: statuses and responses correlate to
    /// the oldest queued burst, events go straight to the poll queue.
    fn decode_message(&mut self, msg: &[u8]) {
        let hdr = match MsgHeader::decode(msg) {
            Ok(hdr) => hdr,
            Err(e) => {
                warn!(%e, "undecodable message");
                return;
            }
        };

        match hdr.kind {
            MsgKind::Status => {
                let Some(front) = self.queue.front_mut() else {
                    return;
                };
                let Some(idx) = front.burst.match_pending(msg) else {
                    trace!(id = hdr.id, seq = hdr.seq, "status matches no pending command");
                    return;
                };
                let status = Status(hdr.arg);
                let burst_id = front.id;
                // match_pending only returns pending slots.
                let _ = front.burst.complete(idx, status);
                self.mod_count((hdr.id >> 8) as u8, false);
                self.events.push_back(DeviceEvent::CmdStatus {
                    burst: burst_id,
                    cmd_idx: idx,
                    cmd_id: CmdId(hdr.id),
                    seq: hdr.seq,
                    status,
                });

                if self.queue.front().is_some_and(|p| p.burst.all_complete()) {
                    if let Some(p) = self.queue.pop_front() {
                        debug!(id = p.id.0, errors = p.burst.num_errors(), "burst retired");
                        self.events.push_back(DeviceEvent::BurstComplete {
                            burst: p.id,
                            num_errors: p.burst.num_errors(),
                            cmds: p.burst,
                        });
                    }
                }
            }
            MsgKind::Rsp => {
                let Some(front) = self.queue.front() else {
                    return;
                };
                let Some(idx) = front.burst.match_pending(msg) else {
                    return;
                };
                let payload = Bytes::copy_from_slice(&msg[MSG_HEADER_SIZE..]);
                match unpack_elements(usize::from(hdr.count), &payload) {
                    Ok(elems) => self.events.push_back(DeviceEvent::Response {
                        burst: front.id,
                        cmd_idx: idx,
                        cmd_id: CmdId(hdr.id),
                        elems,
                    }),
                    Err(e) => warn!(%e, "undecodable response payload"),
                }
            }
            MsgKind::Event => {
                let module = (hdr.id >> 8) as u8;
                if !self.listeners.contains(&module) {
                    warn!(id = hdr.id, "event from module without a listener");
                    return;
                }
                let payload = Bytes::copy_from_slice(&msg[MSG_HEADER_SIZE..]);
                match unpack_elements(usize::from(hdr.count), &payload) {
                    Ok(elems) => self.events.push_back(DeviceEvent::Unsolicited {
                        event: EventId(hdr.id),
                        elems,
                    }),
                    Err(e) => warn!(%e, "undecodable event payload"),
                }
            }
            MsgKind::Req => warn!(id = hdr.id, "request message from device"),
        }
    }

    /// First-fit per-module in-flight counter table.
    fn mod_count(&mut self, module: u8, insert: bool) {
        if module == 0 {
            return;
        }
        let mut empty = None;
        let mut found = None;
        for (i, slot) in self.mod_counts.iter().enumerate() {
            if slot.0 == module {
                found = Some(i);
                break;
            }
            if empty.is_none() && slot.0 == 0 {
                empty = Some(i);
            }
        }
        if insert {
            let Some(i) = found.or(empty) else {
                return;
            };
            self.mod_counts[i].0 = module;
            if self.mod_counts[i].1 < u8::MAX {
                self.mod_counts[i].1 += 1;
            }
        } else if let Some(i) = found {
            self.mod_counts[i].1 = self.mod_counts[i].1.saturating_sub(1);
            if self.mod_counts[i].1 == 0 {
                self.mod_counts[i].0 = 0;
            }
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
    fn test_module_counters_first_fit() {
        let mut dev = Device::new(NullLink);
        dev.mod_count(0x09, true);
        dev.mod_count(0x09, true);
        dev.mod_count(0x01, true);
        assert_eq!(dev.module_in_flight(0x09), 2);
        assert_eq!(dev.module_in_flight(0x01), 1);
        assert_eq!(dev.module_in_flight(0x0a), 0);

        dev.mod_count(0x09, false);
        dev.mod_count(0x09, false);
        assert_eq!(dev.module_in_flight(0x09), 0);
        // The freed slot is reused first.
        dev.mod_count(0x0a, true);
        assert_eq!(dev.mod_counts[0], (0x0a, 1));
    }

    #[test]
    fn test_counter_ignores_module_zero() {
        let mut dev = Device::new(NullLink);
        dev.mod_count(0, true);
        assert_eq!(dev.mod_counts.iter().filter(|s| s.0 != 0).count(), 0);
    }
}
