//! SDIO-over-SPI command framing.
//!
//! The coprocessor presents an SDIO card on a plain SPI port. Command
//! frames are 0xff-filled buffers with the 6-byte command at offset 1
//! and the response sampled at fixed offsets; data moves through CMD53
//! with single-block or multi-block transfers of up to 512 bytes each.

use tracing::trace;

use crate::crc;
use crate::error::{BusError, Result};
use crate::init::InitState;
use crate::port::{BusPort, Link};
use crate::regs;

/// Clocked-byte limit when waiting for busy release or data ready.
const BUSY_POLL_LIMIT: usize = 10_000;

/// SDIO card access over a raw SPI port.
pub struct SdioBus<P> {
    port: P,
    use_crcs: bool,
    pub(crate) state: InitState,
}

impl<P: BusPort> SdioBus<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            use_crcs: false,
            state: InitState::Unknown,
        }
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        InitState::Running == self.state
    }

    fn frame_crc(&self, body: &[u8]) -> u8 {
        if self.use_crcs {
            crc::crc7(body)
        } else {
            0
        }
    }

    fn block_crc(&self, data: &[u8]) -> u16 {
        if self.use_crcs {
            crc::crc16(data)
        } else {
            0
        }
    }

    /// Clock single bytes until the card returns something other than
    /// `skip`, or fail with a timeout.
    fn poll_byte(&mut self, skip: u8) -> Result<u8> {
        let mut byte = [skip];
        for _ in 0..BUSY_POLL_LIMIT {
            self.port.transfer(None, Some(&mut byte))?;
            if byte[0] != skip {
                return Ok(byte[0]);
            }
        }
        Err(BusError::Timeout)
    }

    /// CMD0: software reset. The frame CRC is fixed because the card may
    /// still be in SD mode where CRCs are mandatory.
    pub(crate) fn cmd0(&mut self) -> Result<u8> {
        trace!("cmd0");
        let mut frame = [0xffu8; 9];
        frame[1] = 0x40;
        frame[2..6].fill(0);
        frame[6] = 0x95;
        let mut rsp = [0u8; 9];
        self.port.transfer(Some(&frame), Some(&mut rsp))?;
        Ok(rsp[8])
    }

    /// CMD5: operating-condition negotiation. Returns the R1 response and
    /// the 32-bit R4 operating-condition word.
    pub(crate) fn cmd5(&mut self, ocr: u32) -> Result<(u8, u32)> {
        trace!(ocr, "cmd5");
        let mut frame = [0xffu8; 13];
        frame[1] = 0x40 | 0x05;
        frame[2] = 0x00;
        frame[3] = (ocr >> 16) as u8;
        frame[4] = (ocr >> 8) as u8;
        frame[5] = ocr as u8;
        frame[6] = self.frame_crc(&frame[1..6]) | 0x01;
        let mut rsp = [0u8; 13];
        self.port.transfer(Some(&frame), Some(&mut rsp))?;
        let r4 = u32::from_be_bytes([rsp[9], rsp[10], rsp[11], rsp[12]]);
        Ok((rsp[8], r4))
    }

    /// CMD52: single register read/write. `write` carries the value to
    /// store; with both `write` and `read_back` the card applies
    /// read-after-write. Returns the R5 status byte and data byte.
    pub(crate) fn cmd52(&mut self, addr: u32, write: Option<u8>, read_back: bool) -> Result<(u8, u8)> {
        let mut frame = [0xffu8; 11];
        frame[2] = 0x00;
        match write {
            Some(value) => {
                frame[2] |= 0x80;
                frame[5] = value;
                if read_back {
                    frame[2] |= 0x08;
                }
            }
            None => frame[5] = 0,
        }
        frame[1] = 0x40 | 0x34;
        frame[2] |= ((addr >> 24) & 0x70) as u8 | ((addr >> 15) & 0x03) as u8;
        frame[3] = (addr >> 7) as u8;
        frame[4] = (addr << 1) as u8 & 0xfe;
        frame[6] = self.frame_crc(&frame[1..6]) | 0x01;
        let mut rsp = [0u8; 11];
        self.port.transfer(Some(&frame), Some(&mut rsp))?;
        Ok((rsp[8], rsp[9]))
    }

    /// CMD59: CRC on/off, reflecting the bus's own setting.
    pub(crate) fn cmd59(&mut self) -> Result<u8> {
        trace!(enabled = self.use_crcs, "cmd59");
        let mut frame = [0xffu8; 9];
        frame[1] = 0x40 | 0x3b;
        frame[2] = 0x00;
        frame[4] = 0x00;
        frame[5] = u8::from(self.use_crcs);
        frame[6] = self.frame_crc(&frame[1..6]) | 0x01;
        let mut rsp = [0u8; 9];
        self.port.transfer(Some(&frame), Some(&mut rsp))?;
        Ok(rsp[8])
    }

    fn cmd53_frame(&self, addr: u32, count: usize, write: bool, block_mode: bool, inc_addr: bool) -> [u8; 11] {
        let mut frame = [0xffu8; 11];
        frame[1] = 0x40 | 0x35;
        frame[2] = ((addr >> 24) & 0x70) as u8 | ((addr >> 15) & 0x03) as u8;
        if write {
            frame[2] |= 0x80;
        }
        if block_mode {
            frame[2] |= 0x08;
        }
        if inc_addr {
            frame[2] |= 0x04;
        }
        frame[3] = (addr >> 7) as u8;
        frame[4] = (addr << 1) as u8 & 0xfe | ((count >> 8) & 0x01) as u8;
        frame[5] = count as u8;
        frame[6] = self.frame_crc(&frame[1..6]) | 0x01;
        frame
    }

    /// CMD53 write: move `data` to the card in block-mode runs of 512
    /// bytes plus a byte-mode tail.
    pub(crate) fn cmd53_write(&mut self, addr: u32, data: &[u8], inc_addr: bool) -> Result<()> {
        trace!(addr = format_args!("{addr:#010x}"), len = data.len(), "cmd53 write");
        let mut data = data;
        while !data.is_empty() {
            let block_mode = data.len() > regs::BLOCK_SIZE;
            let (count, transfer_size) = if block_mode {
                (data.len() / regs::BLOCK_SIZE, regs::BLOCK_SIZE)
            } else {
                (data.len() & 511, data.len())
            };

            let frame = self.cmd53_frame(addr, count, true, block_mode, inc_addr);
            let mut rsp = [0u8; 11];
            self.port.transfer(Some(&frame), Some(&mut rsp))?;
            if rsp[8] != regs::R1_OK || rsp[9] != 0 {
                return Err(BusError::CmdFailed {
                    cmd: 53,
                    response: rsp[8],
                });
            }

            loop {
                let token = [0xff, if block_mode { 0xfc } else { 0xfe }];
                self.port.transfer(Some(&token), None)?;

                let chunk = &data[..transfer_size];
                let crc = self.block_crc(chunk);
                self.port.transfer(Some(chunk), None)?;

                let tail = [(crc >> 8) as u8, crc as u8, 0xff, 0xff, 0xff];
                let mut rsp = [0u8; 5];
                self.port.transfer(Some(&tail), Some(&mut rsp))?;

                data = &data[transfer_size..];

                let token = rsp[2] & 0x1f;
                if rsp[4] == 0x00 {
                    // Card holds the line low while programming.
                    self.poll_byte(0x00)?;
                }
                if token != 0x05 {
                    return Err(BusError::DataRejected { token });
                }

                if !(block_mode && data.len() >= regs::BLOCK_SIZE) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// CMD53 read: fill `buf` from the card. Reads from the message FIFO
    /// first wait for and acknowledge the data-ready interrupt.
    pub(crate) fn cmd53_read(&mut self, addr: u32, buf: &mut [u8], inc_addr: bool) -> Result<()> {
        trace!(addr = format_args!("{addr:#010x}"), len = buf.len(), "cmd53 read");
        let mut buf = &mut buf[..];
        while !buf.is_empty() {
            if regs::FN1_DATA == addr {
                self.wait_data_ready()?;
            }

            let block_mode = buf.len() > regs::BLOCK_SIZE;
            let (count, transfer_size) = if block_mode {
                (buf.len() / regs::BLOCK_SIZE, regs::BLOCK_SIZE)
            } else {
                (buf.len() & 511, buf.len())
            };

            let frame = self.cmd53_frame(addr, count, false, block_mode, inc_addr);
            let mut rsp = [0u8; 11];
            self.port.transfer(Some(&frame), Some(&mut rsp))?;
            if rsp[8] != regs::R1_OK || rsp[9] != 0 {
                return Err(BusError::CmdFailed {
                    cmd: 53,
                    response: rsp[8],
                });
            }

            loop {
                // Wait for MISO to rise, then for the start token whose
                // low bit is clear.
                let mut byte = self.poll_byte(0x00)?;
                let mut polls = 0;
                while byte & 0x01 != 0 {
                    let mut one = [0u8];
                    self.port.transfer(None, Some(&mut one))?;
                    byte = one[0];
                    polls += 1;
                    if polls > BUSY_POLL_LIMIT {
                        return Err(BusError::Timeout);
                    }
                }
                if byte != 0xfe {
                    return Err(BusError::BadToken { token: byte });
                }

                let (chunk, rest) = buf.split_at_mut(transfer_size);
                self.port.transfer(None, Some(chunk))?;

                // CRC trailer is clocked out and discarded; the link is
                // validated end to end by the message layer.
                let mut crc = [0u8; 2];
                self.port.transfer(None, Some(&mut crc))?;

                buf = rest;

                if !(block_mode && buf.len() >= regs::BLOCK_SIZE) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Poll the function 1 interrupt register until data-ready is set,
    /// then acknowledge it.
    fn wait_data_ready(&mut self) -> Result<()> {
        for _ in 0..BUSY_POLL_LIMIT {
            let (status, value) = self.cmd52(regs::FN1_INT_ID_CLR, None, false)?;
            if status != regs::R1_OK {
                return Err(BusError::CmdFailed {
                    cmd: 52,
                    response: status,
                });
            }
            if value & regs::FN1_INT_DATA_RDY != 0 {
                let (status, _) = self.cmd52(regs::FN1_INT_ID_CLR, Some(regs::FN1_INT_DATA_RDY), false)?;
                if status != regs::R1_OK {
                    return Err(BusError::CmdFailed {
                        cmd: 52,
                        response: status,
                    });
                }
                return Ok(());
            }
        }
        Err(BusError::Timeout)
    }
}

impl<P: BusPort> Link for SdioBus<P> {
    fn reg_read(&mut self, addr: u32) -> Result<u8> {
        let (status, value) = self.cmd52(addr, None, false)?;
        if status != regs::R1_OK {
            return Err(BusError::CmdFailed {
                cmd: 52,
                response: status,
            });
        }
        Ok(value)
    }

    fn reg_write(&mut self, addr: u32, value: u8) -> Result<()> {
        let (status, _) = self.cmd52(addr, Some(value), false)?;
        if status != regs::R1_OK {
            return Err(BusError::CmdFailed {
                cmd: 52,
                response: status,
            });
        }
        Ok(())
    }

    fn mem_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.cmd53_read(addr, buf, true)
    }

    fn mem_write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.cmd53_write(addr, data, true)
    }

    fn fifo_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.cmd53_read(addr, buf, false)
    }

    fn fifo_write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.cmd53_write(addr, data, false)
    }
}

#[cfg(test)]
impl SdioBus<tests::ScriptPort> {
    pub(crate) fn script(&mut self) -> &mut tests::ScriptPort {
        &mut self.port
    }

    pub(crate) fn frames(&self) -> &[Vec<u8>] {
        &self.port.sent
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted SPI port: records every transmit buffer and answers each
    /// receive with the next queued response, 0xff-filling beyond it.
    pub(crate) struct ScriptPort {
        pub sent: Vec<Vec<u8>>,
        pub responses: VecDeque<Vec<u8>>,
    }

    impl ScriptPort {
        pub fn new() -> Self {
            Self {
                sent: Vec::new(),
                responses: VecDeque::new(),
            }
        }

        pub fn push_response(&mut self, rsp: &[u8]) {
            self.responses.push_back(rsp.to_vec());
        }
    }

    impl BusPort for ScriptPort {
        fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<()> {
            if let Some(tx) = tx {
                self.sent.push(tx.to_vec());
            }
            if let Some(rx) = rx {
                rx.fill(0xff);
                if let Some(rsp) = self.responses.pop_front() {
                    let n = rsp.len().min(rx.len());
                    rx[..n].copy_from_slice(&rsp[..n]);
                }
            }
            Ok(())
        }
    }

    /// An R5 response frame for register commands: R1 at offset 8, data
    /// at offset 9.
    fn r5(status: u8, data: u8) -> Vec<u8> {
        let mut rsp = vec![0xff; 11];
        rsp[8] = status;
        rsp[9] = data;
        rsp
    }

    #[test]
    fn test_cmd0_frame_uses_fixed_crc() {
        let mut port = ScriptPort::new();
        let mut rsp = vec![0xffu8; 9];
        rsp[8] = regs::R1_IDLE;
        port.push_response(&rsp);

        let mut bus = SdioBus::new(port);
        assert_eq!(bus.cmd0().unwrap(), regs::R1_IDLE);

        let frame = &bus.port.sent[0];
        assert_eq!(frame[1], 0x40);
        assert_eq!(&frame[2..6], &[0, 0, 0, 0]);
        assert_eq!(frame[6], 0x95);
    }

    #[test]
    fn test_cmd52_write_frame_packing() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(regs::R1_OK, 0));

        let mut bus = SdioBus::new(port);
        bus.reg_write(regs::FN1_INT_EN, regs::FN1_INT_DATA_RDY).unwrap();

        let frame = &bus.port.sent[0];
        assert_eq!(frame[1], 0x40 | 0x34);
        // Write bit, function 1, address bits 16:15.
        assert_eq!(frame[2], 0x80 | 0x10);
        assert_eq!(frame[3], 0x00);
        // Address bits 6:0 shifted into the top of byte 4.
        assert_eq!(frame[4], 0x12);
        assert_eq!(frame[5], regs::FN1_INT_DATA_RDY);
        // CRCs disabled: only the end bit.
        assert_eq!(frame[6], 0x01);
    }

    #[test]
    fn test_cmd52_read_failure_maps_to_error() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(0x04, 0));
        let mut bus = SdioBus::new(port);
        assert!(matches!(
            bus.reg_read(regs::FN1_ARM_GP),
            Err(BusError::CmdFailed { cmd: 52, .. })
        ));
    }

    #[test]
    fn test_cmd5_parses_ocr() {
        let mut port = ScriptPort::new();
        let mut rsp = vec![0xffu8; 13];
        rsp[8] = regs::R1_OK;
        rsp[9..13].copy_from_slice(&[0x80, 0x20, 0x00, 0x00]);
        port.push_response(&rsp);

        let mut bus = SdioBus::new(port);
        let (r1, ocr) = bus.cmd5(regs::OCR_PROBE).unwrap();
        assert_eq!(r1, regs::R1_OK);
        assert_eq!(ocr, 0x8020_0000);

        let frame = &bus.port.sent[0];
        assert_eq!(frame[1], 0x45);
        assert_eq!(&frame[3..6], &[0x20, 0x00, 0x00]);
    }

    #[test]
    fn test_cmd53_single_block_write() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(regs::R1_OK, 0));
        // Data response: accepted token at offset 2, not busy at 4.
        port.push_response(&[0xff, 0xff, 0x05, 0xff, 0xff]);

        let mut bus = SdioBus::new(port);
        let data = [0xaau8; 16];
        bus.fifo_write(regs::FN1_DATA, &data).unwrap();

        let sent = &bus.port.sent;
        // Command frame, start token, payload, CRC tail.
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0][2], 0x80 | 0x10); // write, function 1, byte mode
        assert_eq!(sent[0][5], 16); // byte count
        assert_eq!(sent[1][1], 0xfe); // single-block token
        assert_eq!(sent[2], data.to_vec());
        assert_eq!(&sent[3][..2], &[0, 0]); // CRC zeros while disabled
    }

    #[test]
    fn test_cmd53_write_rejected_token() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(regs::R1_OK, 0));
        port.push_response(&[0xff, 0xff, 0x0b, 0xff, 0xff]); // CRC error token

        let mut bus = SdioBus::new(port);
        assert!(matches!(
            bus.fifo_write(regs::FN1_DATA, &[0u8; 4]),
            Err(BusError::DataRejected { token: 0x0b })
        ));
    }

    #[test]
    fn test_cmd53_read_waits_for_data_ready() {
        let mut port = ScriptPort::new();
        // Interrupt poll: first not ready, then ready, then the ack.
        port.push_response(&r5(regs::R1_OK, 0));
        port.push_response(&r5(regs::R1_OK, regs::FN1_INT_DATA_RDY));
        port.push_response(&r5(regs::R1_OK, 0));
        // CMD53 response, then the start token and payload.
        port.push_response(&r5(regs::R1_OK, 0));
        port.push_response(&[0xfe]);
        port.push_response(&[1, 2, 3, 4]);
        port.push_response(&[0, 0]); // CRC trailer

        let mut bus = SdioBus::new(port);
        let mut buf = [0u8; 4];
        bus.fifo_read(regs::FN1_DATA, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        // The ack wrote the data-ready bit back.
        let ack = &bus.port.sent[2];
        assert_eq!(ack[2] & 0x80, 0x80);
        assert_eq!(ack[5], regs::FN1_INT_DATA_RDY);
    }
}
