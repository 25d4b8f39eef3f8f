use crate::error::Result;

/// Full-duplex SPI transfer seam.
///
/// `tx` and `rx` give the transmit and receive sides of one clocked
/// exchange; `None` on either side means "clock 0xff out" or "discard
/// input" respectively. When both are present they cover the same
/// number of clocked bytes.
pub trait BusPort {
    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<()>;
}

/// Byte-addressed register and block access over the running bus.
///
/// The device engine drives the link through this trait; the SDIO
/// implementation lives below it and test doubles stand in for the
/// whole card.
pub trait Link {
    fn reg_read(&mut self, addr: u32) -> Result<u8>;
    fn reg_write(&mut self, addr: u32, value: u8) -> Result<()>;
    /// Incrementing-address transfer, for registers wider than one byte.
    fn mem_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;
    fn mem_write(&mut self, addr: u32, data: &[u8]) -> Result<()>;
    /// Fixed-address transfer through the message FIFO.
    fn fifo_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;
    fn fifo_write(&mut self, addr: u32, data: &[u8]) -> Result<()>;
}
