//! Umbrella crate for the nclink coprocessor driver stack.
//!
//! Re-exports the layer crates under one roof so applications can depend
//! on `nclink` alone:
//!
//! - [`codec`] — TLV parameter encode/decode
//! - [`proto`] — wire headers, command catalogue, burst builder
//! - [`bus`] — SDIO-over-SPI transport and link bring-up
//! - [`dev`] — device transport engine (burst queue, event pump)
//! - [`sock`] — non-blocking socket layer and DNS
//!
//! With the `cli` feature the crate also builds the `nclink` diagnostic
//! binary for offline protocol work.

pub mod codec {
    pub use nclink_codec::*;
}

pub mod proto {
    pub use nclink_proto::*;
}

pub mod bus {
    pub use nclink_bus::*;
}

pub mod dev {
    pub use nclink_dev::*;
}

pub mod sock {
    pub use nclink_sock::*;
}
