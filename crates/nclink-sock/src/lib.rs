//! Non-blocking socket layer for the network coprocessor.
//!
//! Builds Berkeley-style sockets on top of [`nclink_dev`]: per-socket
//! receive/transmit rings in a slab arena, sequence-paced transmit with
//! retry on transient refusals, demand-driven receive requests, and
//! device event routing (connection indications, data arrival, DNS
//! answers) into per-socket [`SocketEvent`]s.

pub mod buffer;
pub mod error;
pub mod slab;
pub mod stack;
pub mod state;

pub use error::{Result, SockError};
pub use stack::{
    AddrFamily, RecvFlags, SockHandle, SockKind, SockOption, SockProtocol, SocketEvent,
    SocketEventKind, SocketStack, StackConfig, MAX_PAYLOAD, NUM_SOCKETS,
};
pub use state::{ReadMode, SocketState};
