//! Command-burst construction.
//!
//! A burst is an arena buffer holding one or more command requests that
//! travel to the device as a single transport submission and complete
//! atomically. Each command occupies a run of arena bytes (envelope
//! header plus TLV parameters) described by fragment descriptors; large
//! payloads may ride as external fragments referencing caller memory
//! without a copy.
//!
//! Builder lifecycle: `Idle → Building (per command) → Idle → … → Sealed`.
//! Sequence numbers are assigned only at seal time, so several bursts may
//! be pre-built while only the transport queue head carries live numbers.

use bytes::{Bytes, BytesMut};
use nclink_codec::{encode, types::pad_len, unpack_elements, ParamElem, TlvType};

use crate::error::{ProtoError, Result};
use crate::wire::{CmdId, MsgHeader, MsgKind, Status, MSG_HEADER_SIZE};

/// Default arena capacity, enough for a handful of control commands or a
/// single full-sized socket write with inline payload.
pub const DEFAULT_ARENA_CAPACITY: usize = 2048;

/// Per-command completion record.
///
/// A command starts `Pending` with its running wire size and moves to
/// `Complete` exactly once, when its status reply arrives. The original
/// request bytes stay readable after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdRecord {
    Pending { size: u16 },
    Complete { status: Status },
}

/// Where a fragment's bytes live.
#[derive(Debug, Clone)]
pub enum FragSource {
    /// A range of the burst arena.
    Arena { start: usize, len: usize },
    /// Caller-owned payload attached without copying.
    External(Bytes),
}

/// One transmit unit of a burst.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub source: FragSource,
    /// First fragment of a command (carries the envelope header).
    pub first_of_cmd: bool,
    /// Last fragment of a command.
    pub last_of_cmd: bool,
}

impl Fragment {
    pub fn len(&self) -> usize {
        match &self.source {
            FragSource::Arena { len, .. } => *len,
            FragSource::External(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct CmdSlot {
    id: CmdId,
    hdr_offset: usize,
    params_len: u16,
    num_params: u8,
    seq: Option<u16>,
    record: CmdRecord,
    first_frag: usize,
    num_frags: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Idle,
    Building,
    Sealed,
}

/// A burst of command requests under construction or in flight.
#[derive(Debug)]
pub struct CommandBurst {
    arena: BytesMut,
    capacity: usize,
    max_cmds: usize,
    cmds: Vec<CmdSlot>,
    frags: Vec<Fragment>,
    state: BuildState,
}

impl CommandBurst {
    pub fn new(max_cmds: usize) -> Self {
        Self::with_capacity(max_cmds, DEFAULT_ARENA_CAPACITY)
    }

    pub fn with_capacity(max_cmds: usize, capacity: usize) -> Self {
        Self {
            arena: BytesMut::with_capacity(capacity),
            capacity,
            max_cmds,
            cmds: Vec::with_capacity(max_cmds),
            frags: Vec::new(),
            state: BuildState::Idle,
        }
    }

    fn free(&self) -> usize {
        self.capacity - self.arena.len()
    }

    fn check_space(&self, need: usize) -> Result<()> {
        if need > self.free() {
            return Err(ProtoError::ArenaExhausted {
                need,
                have: self.free(),
            });
        }
        Ok(())
    }

    fn cur_cmd(&mut self) -> Result<&mut CmdSlot> {
        if BuildState::Building != self.state {
            return Err(ProtoError::NoCommand);
        }
        self.cmds.last_mut().ok_or(ProtoError::NoCommand)
    }

    /// Begin a new command. Fails if the burst is full, sealed, mid-build,
    /// or the arena cannot hold another envelope header.
    pub fn start(&mut self, id: CmdId) -> Result<()> {
        match self.state {
            BuildState::Sealed => return Err(ProtoError::Sealed),
            BuildState::Building => return Err(ProtoError::CommandInProgress),
            BuildState::Idle => {}
        }
        if self.cmds.len() >= self.max_cmds {
            return Err(ProtoError::BurstFull { max: self.max_cmds });
        }
        self.check_space(MSG_HEADER_SIZE)?;

        let hdr_offset = self.arena.len();
        let hdr = MsgHeader {
            kind: MsgKind::Req,
            id: id.0,
            seq: 0,
            arg: 0,
            count: 0,
        };
        let mut buf = [0u8; MSG_HEADER_SIZE];
        hdr.encode(&mut buf);
        self.arena.extend_from_slice(&buf);

        let first_frag = self.frags.len();
        self.frags.push(Fragment {
            source: FragSource::Arena {
                start: hdr_offset,
                len: MSG_HEADER_SIZE,
            },
            first_of_cmd: true,
            last_of_cmd: false,
        });

        self.cmds.push(CmdSlot {
            id,
            hdr_offset,
            params_len: 0,
            num_params: 0,
            seq: None,
            record: CmdRecord::Pending {
                size: MSG_HEADER_SIZE as u16,
            },
            first_frag,
            num_frags: 1,
        });

        self.state = BuildState::Building;
        Ok(())
    }

    fn grow_current_fragment(&mut self, by: usize) {
        let frag = self
            .frags
            .last_mut()
            .expect("building command always has a fragment");
        match &mut frag.source {
            FragSource::Arena { len, .. } => *len += by,
            FragSource::External(_) => unreachable!("arena fragment is always current"),
        }
    }

    fn note_param(&mut self, wire_len: usize) -> Result<()> {
        let slot = self.cur_cmd()?;
        slot.params_len += wire_len as u16;
        slot.num_params += 1;
        if let CmdRecord::Pending { size } = &mut slot.record {
            *size += wire_len as u16;
        }
        self.grow_current_fragment(wire_len);
        Ok(())
    }

    pub fn param_u8(&mut self, value: u8) -> Result<()> {
        self.cur_cmd()?;
        self.check_space(8)?;
        let n = encode::put_u8(&mut self.arena, value);
        self.note_param(n)
    }

    pub fn param_u16(&mut self, value: u16) -> Result<()> {
        self.cur_cmd()?;
        self.check_space(8)?;
        let n = encode::put_u16(&mut self.arena, value);
        self.note_param(n)
    }

    pub fn param_u32(&mut self, value: u32) -> Result<()> {
        self.cur_cmd()?;
        self.check_space(8)?;
        let n = encode::put_u32(&mut self.arena, value);
        self.note_param(n)
    }

    pub fn param_i32(&mut self, value: i32) -> Result<()> {
        self.cur_cmd()?;
        self.check_space(8)?;
        let n = encode::put_i32(&mut self.arena, value);
        self.note_param(n)
    }

    /// 32-bit value classified fractional/unsigned by the upper-halfword
    /// heuristic.
    pub fn param_auto_u32(&mut self, value: u32) -> Result<()> {
        self.cur_cmd()?;
        self.check_space(8)?;
        let n = encode::put_uint_auto(&mut self.arena, value);
        self.note_param(n)
    }

    pub fn param_str(&mut self, value: &str) -> Result<()> {
        self.cur_cmd()?;
        self.check_space(4 + value.len() + pad_len(value.len()))?;
        let n = encode::put_bytes(&mut self.arena, TlvType::String, value.as_bytes());
        self.note_param(n)
    }

    pub fn param_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.cur_cmd()?;
        self.check_space(4 + value.len() + pad_len(value.len()))?;
        let n = encode::put_bytes(&mut self.arena, TlvType::Bytes, value);
        self.note_param(n)
    }

    /// Attach a payload as an external fragment. The TLV header and the
    /// trailing pad live in the arena; the payload itself is referenced,
    /// not copied.
    pub fn param_data(&mut self, data: Bytes) -> Result<()> {
        self.cur_cmd()?;
        let pad = pad_len(data.len());
        self.check_space(4 + pad)?;

        // TLV header closes out the current arena fragment.
        self.arena.extend_from_slice(&[
            TlvType::Bytes as u8,
            pad as u8,
            (data.len() >> 8) as u8,
            (data.len() & 0xff) as u8,
        ]);
        self.grow_current_fragment(4);

        let wire_len = 4 + data.len() + pad;
        self.frags.push(Fragment {
            source: FragSource::External(data),
            first_of_cmd: false,
            last_of_cmd: false,
        });

        // Fresh arena fragment carries the pad and any later parameters.
        let start = self.arena.len();
        self.arena.extend_from_slice(&[0u8; 3][..pad]);
        self.frags.push(Fragment {
            source: FragSource::Arena { start, len: pad },
            first_of_cmd: false,
            last_of_cmd: false,
        });

        let slot = self.cur_cmd()?;
        slot.params_len += wire_len as u16;
        slot.num_params += 1;
        slot.num_frags += 2;
        if let CmdRecord::Pending { size } = &mut slot.record {
            *size += wire_len as u16;
        }
        Ok(())
    }

    /// Finish the current command: write the final length and parameter
    /// count into its header and mark its fragment run.
    pub fn commit(&mut self) -> Result<()> {
        let (hdr_offset, params_len, num_params) = {
            let slot = self.cur_cmd()?;
            (slot.hdr_offset, slot.params_len, slot.num_params)
        };

        self.arena[hdr_offset + 5..hdr_offset + 7].copy_from_slice(&params_len.to_be_bytes());
        self.arena[hdr_offset + 7] = num_params;

        // Drop a trailing zero-length pad fragment left by an external
        // payload that needed no realignment.
        let slot_frags = self.cmds.last().ok_or(ProtoError::NoCommand)?.num_frags;
        if slot_frags > 1 && self.frags.last().map(Fragment::is_empty) == Some(true) {
            self.frags.pop();
            self.cmds.last_mut().ok_or(ProtoError::NoCommand)?.num_frags -= 1;
        }

        let slot = self.cmds.last().ok_or(ProtoError::NoCommand)?;
        let last = slot.first_frag + slot.num_frags - 1;
        self.frags[last].last_of_cmd = true;

        self.state = BuildState::Idle;
        Ok(())
    }

    /// Number of committed commands.
    pub fn num_cmds(&self) -> usize {
        match self.state {
            BuildState::Building => self.cmds.len() - 1,
            _ => self.cmds.len(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        BuildState::Sealed == self.state
    }

    /// Assign ascending sequence numbers and seal the burst for
    /// transmission. Returns the next unused sequence number.
    pub fn seal(&mut self, first_seq: u16) -> Result<u16> {
        match self.state {
            BuildState::Building => return Err(ProtoError::CommandInProgress),
            BuildState::Sealed => return Err(ProtoError::Sealed),
            BuildState::Idle => {}
        }
        if self.cmds.is_empty() {
            return Err(ProtoError::NoCommand);
        }

        let mut seq = first_seq;
        for slot in &mut self.cmds {
            slot.seq = Some(seq);
            self.arena[slot.hdr_offset + 3..slot.hdr_offset + 5]
                .copy_from_slice(&seq.to_be_bytes());
            seq = seq.wrapping_add(1);
        }
        self.state = BuildState::Sealed;
        Ok(seq)
    }

    /// Match a status/response header against the pending commands by
    /// byte-comparing the shared `{id, seq}` region.
    pub fn match_pending(&self, msg: &[u8]) -> Option<usize> {
        if msg.len() < MSG_HEADER_SIZE {
            return None;
        }
        self.cmds.iter().position(|slot| {
            matches!(slot.record, CmdRecord::Pending { .. })
                && self.arena[slot.hdr_offset + 1..slot.hdr_offset + 5] == msg[1..5]
        })
    }

    /// Record the terminal status for command `idx`.
    pub fn complete(&mut self, idx: usize, status: Status) -> Result<()> {
        let slot = self
            .cmds
            .get_mut(idx)
            .ok_or(ProtoError::BadCommandIndex(idx))?;
        match slot.record {
            CmdRecord::Complete { .. } => Err(ProtoError::AlreadyComplete(idx)),
            CmdRecord::Pending { .. } => {
                slot.record = CmdRecord::Complete { status };
                Ok(())
            }
        }
    }

    pub fn record(&self, idx: usize) -> Result<CmdRecord> {
        self.cmds
            .get(idx)
            .map(|slot| slot.record)
            .ok_or(ProtoError::BadCommandIndex(idx))
    }

    pub fn cmd_id(&self, idx: usize) -> Result<CmdId> {
        self.cmds
            .get(idx)
            .map(|slot| slot.id)
            .ok_or(ProtoError::BadCommandIndex(idx))
    }

    pub fn cmd_seq(&self, idx: usize) -> Result<Option<u16>> {
        self.cmds
            .get(idx)
            .map(|slot| slot.seq)
            .ok_or(ProtoError::BadCommandIndex(idx))
    }

    /// True once every command carries a terminal status.
    pub fn all_complete(&self) -> bool {
        self.cmds
            .iter()
            .all(|slot| matches!(slot.record, CmdRecord::Complete { .. }))
    }

    /// Commands whose terminal status is not OK.
    pub fn num_errors(&self) -> usize {
        self.cmds
            .iter()
            .filter(|slot| matches!(slot.record, CmdRecord::Complete { status } if !status.is_ok()))
            .count()
    }

    /// Force-complete every pending command with `status`. Used when the
    /// transport flushes a burst after a bus fault.
    pub fn complete_all(&mut self, status: Status) {
        for slot in &mut self.cmds {
            if matches!(slot.record, CmdRecord::Pending { .. }) {
                slot.record = CmdRecord::Complete { status };
            }
        }
    }

    /// Per-command sizes in 32-bit words, as announced to the device.
    pub fn cmd_sizes_words(&self) -> Vec<u32> {
        self.cmds
            .iter()
            .map(|slot| {
                let size = u32::from(MSG_HEADER_SIZE as u16 + slot.params_len);
                (size + 3) >> 2
            })
            .collect()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.frags
    }

    /// The bytes of fragment `idx`.
    pub fn fragment_payload(&self, idx: usize) -> &[u8] {
        match &self.frags[idx].source {
            FragSource::Arena { start, len } => &self.arena[*start..*start + *len],
            FragSource::External(data) => data,
        }
    }

    /// Re-assemble and decode the original parameters of command `idx`.
    /// Works after completion; the request bytes are never overwritten.
    pub fn params(&self, idx: usize) -> Result<Vec<ParamElem>> {
        let slot = self.cmds.get(idx).ok_or(ProtoError::BadCommandIndex(idx))?;
        let mut raw = BytesMut::with_capacity(usize::from(slot.params_len));
        for frag in slot.first_frag..slot.first_frag + slot.num_frags {
            let bytes = self.fragment_payload(frag);
            if frag == slot.first_frag {
                raw.extend_from_slice(&bytes[MSG_HEADER_SIZE..]);
            } else {
                raw.extend_from_slice(bytes);
            }
        }
        Ok(unpack_elements(usize::from(slot.num_params), &raw.freeze())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_command_layout() {
        let mut burst = CommandBurst::new(1);
        burst.start(CmdId::SOCK_OPEN).unwrap();
        burst.param_u8(1).unwrap();
        burst.param_u8(4).unwrap();
        burst.commit().unwrap();

        assert_eq!(burst.num_cmds(), 1);
        let hdr = MsgHeader::decode(burst.fragment_payload(0)).unwrap();
        assert_eq!(hdr.kind, MsgKind::Req);
        assert_eq!(hdr.id, CmdId::SOCK_OPEN.0);
        assert_eq!(hdr.arg, 16); // two padded 1-byte integer elements
        assert_eq!(hdr.count, 2);
        assert_eq!(hdr.seq, 0); // unassigned until seal
    }

    #[test]
    fn test_lazy_sequence_assignment() {
        let mut burst = CommandBurst::new(3);
        for _ in 0..3 {
            burst.start(CmdId::RST).unwrap();
            burst.commit().unwrap();
        }
        assert_eq!(burst.cmd_seq(0).unwrap(), None);

        let next = burst.seal(0xfffe).unwrap();
        assert_eq!(burst.cmd_seq(0).unwrap(), Some(0xfffe));
        assert_eq!(burst.cmd_seq(1).unwrap(), Some(0xffff));
        assert_eq!(burst.cmd_seq(2).unwrap(), Some(0x0000)); // wraps
        assert_eq!(next, 1);
        assert!(burst.is_sealed());
    }

    #[test]
    fn test_burst_full() {
        let mut burst = CommandBurst::new(1);
        burst.start(CmdId::RST).unwrap();
        burst.commit().unwrap();
        assert!(matches!(
            burst.start(CmdId::RST),
            Err(ProtoError::BurstFull { .. })
        ));
    }

    #[test]
    fn test_arena_exhaustion() {
        let mut burst = CommandBurst::with_capacity(1, 12);
        burst.start(CmdId::CFG).unwrap();
        assert!(matches!(
            burst.param_u32(1),
            Err(ProtoError::ArenaExhausted { .. })
        ));
    }

    #[test]
    fn test_start_requires_commit() {
        let mut burst = CommandBurst::new(2);
        burst.start(CmdId::RST).unwrap();
        assert!(matches!(
            burst.start(CmdId::RST),
            Err(ProtoError::CommandInProgress)
        ));
    }

    #[test]
    fn test_external_fragment_stays_uncopied() {
        let payload = Bytes::from_static(b"hello");
        let mut burst = CommandBurst::new(1);
        burst.start(CmdId::SOCK_WRITE).unwrap();
        burst.param_u16(3).unwrap();
        burst.param_data(payload.clone()).unwrap();
        burst.commit().unwrap();

        let frags = burst.fragments();
        assert_eq!(frags.len(), 3); // header+params | payload | pad
        assert!(frags[0].first_of_cmd);
        assert!(frags[2].last_of_cmd);
        assert!(matches!(&frags[1].source, FragSource::External(d) if d == &payload));
        assert_eq!(burst.fragment_payload(2), &[0u8, 0, 0][..]); // 5 bytes pad to 8

        // Parameters reassemble across fragments.
        let params = burst.params(0).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].data.as_ref(), b"hello");
    }

    #[test]
    fn test_status_matching_and_two_state_records() {
        let mut burst = CommandBurst::new(2);
        burst.start(CmdId::SOCK_READ).unwrap();
        burst.param_u16(1).unwrap();
        burst.commit().unwrap();
        burst.start(CmdId::SOCK_READ).unwrap();
        burst.param_u16(2).unwrap();
        burst.commit().unwrap();
        burst.seal(10).unwrap();

        let status = MsgHeader {
            kind: MsgKind::Status,
            id: CmdId::SOCK_READ.0,
            seq: 11,
            arg: Status::OK.0,
            count: 0,
        };
        let mut msg = [0u8; MSG_HEADER_SIZE];
        status.encode(&mut msg);

        let idx = burst.match_pending(&msg).unwrap();
        assert_eq!(idx, 1);
        burst.complete(idx, Status::OK).unwrap();
        assert!(matches!(
            burst.record(1).unwrap(),
            CmdRecord::Complete { status } if status.is_ok()
        ));

        // A second identical status no longer matches anything.
        assert_eq!(burst.match_pending(&msg), None);
        assert!(!burst.all_complete());

        // Parameters remain readable after completion.
        let params = burst.params(1).unwrap();
        assert_eq!(params[0].read_u16().unwrap(), 2);
    }

    #[test]
    fn test_word_sizes() {
        let mut burst = CommandBurst::new(1);
        burst.start(CmdId::DI).unwrap();
        burst.param_u8(1).unwrap();
        burst.commit().unwrap();
        // 8-byte header + 8-byte element = 16 bytes = 4 words.
        assert_eq!(burst.cmd_sizes_words(), vec![4]);
    }

    #[test]
    fn test_flush_completes_everything() {
        let mut burst = CommandBurst::new(2);
        burst.start(CmdId::RST).unwrap();
        burst.commit().unwrap();
        burst.start(CmdId::RST).unwrap();
        burst.commit().unwrap();
        burst.complete_all(Status::ERROR);
        assert!(burst.all_complete());
        assert_eq!(burst.num_errors(), 2);
    }
}
