//! Wire protocol layer for the nclink coprocessor link.
//!
//! Defines the message envelope shared by command requests, status
//! replies, command responses and unsolicited events, the identifier and
//! status tables, and the command-burst builder that assembles one or
//! more requests into a single transport submission.

pub mod burst;
pub mod catalog;
pub mod error;
pub mod wire;

pub use burst::{CmdRecord, CommandBurst, FragSource, Fragment, DEFAULT_ARENA_CAPACITY};
pub use catalog::MAX_WRITE_CHUNK;
pub use error::{ProtoError, Result};
pub use wire::{CmdId, EventId, MsgHeader, MsgKind, Status, MSG_HEADER_SIZE};
