//! Card bring-up state machine.
//!
//! The card is aborted out of any stale transfer, reset to idle,
//! negotiated through CMD5 and then configured for block transfers with
//! the content-addressed window and function 1 interrupts enabled.
//! [`SdioBus::init_step`] performs one pass and reports when the card
//! needs more time; [`SdioBus::init`] loops until the card is running.

use tracing::debug;

use crate::error::{BusError, Result};
use crate::port::BusPort;
use crate::regs;
use crate::sdio::SdioBus;

/// Retries of the stepping machine before blocking bring-up gives up.
const INIT_RETRY_LIMIT: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Unknown,
    Resetting,
    SendOp,
    WaitOp,
    Config,
    Running,
    Error,
}

/// Progress report from one stepping pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    /// The card is configured and running.
    Ok,
    /// Reset issued; the card has not yet reached idle.
    ResetWaiting,
    /// Operating-condition negotiation is still in progress.
    OpWaiting,
}

/// Register writes applied once the card answers CMD5, with the block
/// size, content-addressed window, function enable, bus width,
/// interrupt routing and clock wake-up.
const CONFIG_SEQ: [(u32, u8); 10] = [
    (regs::FN0_FBR_FN1_BLK_SZ_L, (regs::BLOCK_SIZE & 0xff) as u8),
    (regs::FN0_FBR_FN1_BLK_SZ_H, (regs::BLOCK_SIZE >> 8) as u8),
    (regs::FN0_FBR_FN1_CSA_CFG, regs::CSA_CFG_EN),
    (regs::FN0_CCCR_FN0_BLK_SZ_L, (regs::BLOCK_SIZE & 0xff) as u8),
    (regs::FN0_CCCR_FN0_BLK_SZ_H, (regs::BLOCK_SIZE >> 8) as u8),
    (regs::FN0_CCCR_IO_EN, regs::CCCR_FN_IO_1),
    (
        regs::FN0_CCCR_BUS_IF_CTRL,
        regs::CCCR_BUS_IF_CTRL_ECSI | regs::CCCR_BUS_IF_CTRL_BUS_1,
    ),
    (
        regs::FN0_CCCR_INT_EN,
        regs::CCCR_INT_EN_MASTER | regs::CCCR_FN_INT_1,
    ),
    (regs::FN0_CIS_CLOCK_WAKE_UP, 0x01),
    (regs::FN1_INT_EN, regs::FN1_INT_DATA_RDY),
];

impl<P: BusPort> SdioBus<P> {
    /// Advance bring-up by one pass. Waiting statuses mean "call again";
    /// errors leave the machine in the absorbing error state.
    pub fn init_step(&mut self) -> Result<InitStatus> {
        loop {
            match self.state {
                InitState::Unknown => {
                    self.abort_stale()?;
                    self.state = InitState::Resetting;
                }
                InitState::Resetting => {
                    let r1 = self.cmd0()?;
                    // 0x00 can appear before the card's MISO pull-up is
                    // active; treat it like no response and retry.
                    if r1 == regs::R1_FAILED || r1 == regs::R1_OK {
                        return Ok(InitStatus::ResetWaiting);
                    }
                    if r1 != regs::R1_IDLE {
                        self.state = InitState::Error;
                        return Err(BusError::ResetFailed);
                    }
                    self.state = InitState::SendOp;
                }
                InitState::SendOp => {
                    let (r1, _) = self.cmd5(0)?;
                    if r1 != regs::R1_IDLE {
                        self.state = InitState::Error;
                        return Err(BusError::OpFailed);
                    }
                    self.state = InitState::WaitOp;
                }
                InitState::WaitOp => {
                    let (r1, ocr) = self.cmd5(regs::OCR_PROBE)?;
                    if r1 & 0xfe != regs::R1_OK {
                        self.state = InitState::Error;
                        return Err(BusError::OpFailed);
                    }
                    if ocr & regs::OCR_READY == 0 {
                        return Ok(InitStatus::OpWaiting);
                    }
                    self.state = InitState::Config;
                }
                InitState::Config => {
                    self.state = InitState::Error;
                    self.configure()?;
                    self.state = InitState::Running;
                    debug!("bus running");
                    return Ok(InitStatus::Ok);
                }
                InitState::Running => return Ok(InitStatus::Ok),
                InitState::Error => return Err(BusError::NotReady),
            }
        }
    }

    /// Bring the card up, blocking through the waiting states.
    pub fn init(&mut self) -> Result<()> {
        for _ in 0..INIT_RETRY_LIMIT {
            if InitStatus::Ok == self.init_step()? {
                return Ok(());
            }
        }
        Err(BusError::Timeout)
    }

    /// Abort any transfer a previous host session left behind. Only acts
    /// when the card answers from idle.
    fn abort_stale(&mut self) -> Result<()> {
        let (status, value) = self.cmd52(regs::FN0_CCCR_IO_ABORT, None, false)?;
        if status == regs::R1_IDLE {
            let (status, _) = self.cmd52(regs::FN0_CCCR_IO_ABORT, Some(value | 0x08), false)?;
            if status != regs::R1_IDLE {
                self.state = InitState::Error;
                return Err(BusError::AbortFailed);
            }
        }
        Ok(())
    }

    /// CMD59 plus the configuration register sequence, with read-back
    /// verification of the window enable, function ready and interrupt
    /// routing.
    fn configure(&mut self) -> Result<()> {
        if self.cmd59()? != regs::R1_OK {
            return Err(BusError::ConfigFailed);
        }

        for (addr, value) in CONFIG_SEQ {
            let (status, _) = self.cmd52(addr, Some(value), false)?;
            if status != regs::R1_OK {
                return Err(BusError::ConfigFailed);
            }
        }

        let (status, value) = self.cmd52(regs::FN0_FBR_FN1_CSA_CFG, None, false)?;
        if status != regs::R1_OK || value & regs::CSA_CFG_EN == 0 {
            return Err(BusError::ConfigFailed);
        }

        let (status, value) = self.cmd52(regs::FN0_CCCR_IO_RDY, None, false)?;
        if status != regs::R1_OK || value & regs::CCCR_FN_IO_1 != regs::CCCR_FN_IO_1 {
            return Err(BusError::ConfigFailed);
        }

        let int_bits = regs::CCCR_INT_EN_MASTER | regs::CCCR_FN_INT_1;
        let (status, value) = self.cmd52(regs::FN0_CCCR_INT_EN, None, false)?;
        if status != regs::R1_OK || value & int_bits != int_bits {
            return Err(BusError::ConfigFailed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdio::tests::ScriptPort;

    fn r1_frame(len: usize, r1: u8) -> Vec<u8> {
        let mut rsp = vec![0xffu8; len];
        rsp[8] = r1;
        rsp
    }

    fn r5(status: u8, data: u8) -> Vec<u8> {
        let mut rsp = vec![0xff; 11];
        rsp[8] = status;
        rsp[9] = data;
        rsp
    }

    fn cmd5_frame(r1: u8, ocr: u32) -> Vec<u8> {
        let mut rsp = vec![0xffu8; 13];
        rsp[8] = r1;
        rsp[9..13].copy_from_slice(&ocr.to_be_bytes());
        rsp
    }

    fn queue_config_phase(port: &mut ScriptPort) {
        // CMD59, ten register writes, three verification reads.
        port.push_response(&r1_frame(9, regs::R1_OK));
        for _ in 0..CONFIG_SEQ.len() {
            port.push_response(&r5(regs::R1_OK, 0));
        }
        port.push_response(&r5(regs::R1_OK, regs::CSA_CFG_EN));
        port.push_response(&r5(regs::R1_OK, regs::CCCR_FN_IO_1));
        port.push_response(&r5(
            regs::R1_OK,
            regs::CCCR_INT_EN_MASTER | regs::CCCR_FN_INT_1,
        ));
    }

    #[test]
    fn test_full_bring_up() {
        let mut port = ScriptPort::new();
        // Abort probe answers non-idle, so no abort write happens.
        port.push_response(&r5(regs::R1_OK, 0));
        port.push_response(&r1_frame(9, regs::R1_IDLE)); // CMD0
        port.push_response(&cmd5_frame(regs::R1_IDLE, 0)); // CMD5 probe
        port.push_response(&cmd5_frame(regs::R1_OK, regs::OCR_READY | regs::OCR_PROBE));
        queue_config_phase(&mut port);

        let mut bus = SdioBus::new(port);
        bus.init().unwrap();
        assert!(bus.is_running());
    }

    #[test]
    fn test_reset_waiting_reported_per_step() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(regs::R1_OK, 0)); // abort probe
        port.push_response(&r1_frame(9, regs::R1_FAILED)); // no CMD0 answer yet
        port.push_response(&r1_frame(9, regs::R1_OK)); // pull-up not active
        port.push_response(&r1_frame(9, regs::R1_IDLE)); // idle at last

        let mut bus = SdioBus::new(port);
        assert_eq!(bus.init_step().unwrap(), InitStatus::ResetWaiting);
        assert_eq!(bus.state(), InitState::Resetting);
        assert_eq!(bus.init_step().unwrap(), InitStatus::ResetWaiting);
        // The third step passes reset and stops at op negotiation; the
        // empty script answers 0xff which fails CMD5.
        assert!(bus.init_step().is_err());
        assert_eq!(bus.state(), InitState::Error);
    }

    #[test]
    fn test_op_waiting_until_ready_bit() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(regs::R1_OK, 0));
        port.push_response(&r1_frame(9, regs::R1_IDLE));
        port.push_response(&cmd5_frame(regs::R1_IDLE, 0));
        port.push_response(&cmd5_frame(regs::R1_OK, 0)); // not ready yet

        let mut bus = SdioBus::new(port);
        assert_eq!(bus.init_step().unwrap(), InitStatus::OpWaiting);
        assert_eq!(bus.state(), InitState::WaitOp);

        bus.script().push_response(&cmd5_frame(
            regs::R1_OK,
            regs::OCR_READY | regs::OCR_PROBE,
        ));
        queue_config_phase(bus.script());
        assert_eq!(bus.init_step().unwrap(), InitStatus::Ok);
        assert!(bus.is_running());
    }

    #[test]
    fn test_config_verification_failure() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(regs::R1_OK, 0));
        port.push_response(&r1_frame(9, regs::R1_IDLE));
        port.push_response(&cmd5_frame(regs::R1_IDLE, 0));
        port.push_response(&cmd5_frame(regs::R1_OK, regs::OCR_READY));
        // CMD59 ok, register writes ok, but the window enable read-back
        // comes back clear.
        port.push_response(&r1_frame(9, regs::R1_OK));
        for _ in 0..CONFIG_SEQ.len() {
            port.push_response(&r5(regs::R1_OK, 0));
        }
        port.push_response(&r5(regs::R1_OK, 0));

        let mut bus = SdioBus::new(port);
        assert!(matches!(bus.init_step(), Err(BusError::ConfigFailed)));
        assert_eq!(bus.state(), InitState::Error);
        // The machine stays absorbed in the error state.
        assert!(bus.init_step().is_err());
    }

    #[test]
    fn test_stale_abort_written_when_idle() {
        let mut port = ScriptPort::new();
        port.push_response(&r5(regs::R1_IDLE, 0x02)); // abort probe from idle
        port.push_response(&r5(regs::R1_IDLE, 0)); // abort write accepted
        port.push_response(&r1_frame(9, regs::R1_IDLE));

        let mut bus = SdioBus::new(port);
        let _ = bus.init_step();
        let sent = bus.frames();
        // Second frame is the abort write carrying the reset bit.
        assert_eq!(sent[1][5], 0x02 | 0x08);
    }
}
