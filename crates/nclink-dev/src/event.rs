use nclink_codec::ParamElem;
use nclink_proto::{CmdId, CommandBurst, EventId, Status};

/// Handle identifying a submitted burst across its lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BurstId(pub(crate) u64);

/// Engine events, drained with [`crate::Device::poll`].
///
/// A burst produces `TxComplete` once its last fragment reaches the
/// device, one `CmdStatus` per command, and `BurstComplete` when every
/// command has a terminal status; `BurstComplete` hands the burst
/// memory back to the submitter. `Response` and `Unsolicited` carry
/// decoded TLV payloads.
#[derive(Debug)]
pub enum DeviceEvent {
    TxComplete {
        burst: BurstId,
    },
    CmdStatus {
        burst: BurstId,
        cmd_idx: usize,
        cmd_id: CmdId,
        seq: u16,
        status: Status,
    },
    Response {
        burst: BurstId,
        cmd_idx: usize,
        cmd_id: CmdId,
        elems: Vec<ParamElem>,
    },
    BurstComplete {
        burst: BurstId,
        cmds: CommandBurst,
        num_errors: usize,
    },
    Unsolicited {
        event: EventId,
        elems: Vec<ParamElem>,
    },
}
