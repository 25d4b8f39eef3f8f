//! Device engine for the nclink coprocessor.
//!
//! Sits between the [`nclink_bus::Link`] transport and the socket
//! layer: [`Device`] queues sealed [`nclink_proto::CommandBurst`]s,
//! announces them through the mailbox word, pumps transmit and receive
//! events one bus transfer at a time, and correlates status and
//! response messages back to the commands that caused them. Callers
//! drive it with [`Device::step`] and drain [`DeviceEvent`]s with
//! [`Device::poll`].

pub mod device;
pub mod error;
pub mod event;

pub use device::Device;
pub use error::{DevError, Result};
pub use event::{BurstId, DeviceEvent};
