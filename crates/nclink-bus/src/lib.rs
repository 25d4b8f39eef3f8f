//! Bus transport for the nclink coprocessor.
//!
//! The coprocessor sits on a SPI port speaking the SDIO card protocol:
//! CMD52 for single-register access, CMD53 for block data, and a small
//! bring-up sequence that resets, negotiates and configures the card.
//! Everything above this crate drives the device through the [`Link`]
//! trait; [`SdioBus`] is its production implementation over any
//! [`BusPort`] SPI seam.

pub mod crc;
pub mod error;
pub mod init;
pub mod port;
pub mod regs;
pub mod sdio;

pub use error::{BusError, Result};
pub use init::{InitState, InitStatus};
pub use port::{BusPort, Link};
pub use sdio::SdioBus;
