//! Register map of the coprocessor's SDIO interface.
//!
//! Addresses encode the function number in bits 24+ so the CMD52/CMD53
//! framing can extract it; function 0 holds the standard CCCR/FBR
//! configuration space, function 1 is the message data path.

/// Transfer block size once block mode is configured.
pub const BLOCK_SIZE: usize = 512;

// Function 0: card common control registers.
pub const FN0_CCCR_IO_EN: u32 = 0x0000_0002;
pub const FN0_CCCR_IO_RDY: u32 = 0x0000_0003;
pub const FN0_CCCR_INT_EN: u32 = 0x0000_0004;
pub const FN0_CCCR_IO_ABORT: u32 = 0x0000_0006;
pub const FN0_CCCR_BUS_IF_CTRL: u32 = 0x0000_0007;
pub const FN0_CCCR_FN0_BLK_SZ_L: u32 = 0x0000_0010;
pub const FN0_CCCR_FN0_BLK_SZ_H: u32 = 0x0000_0011;

// Function 0: function 1 basic registers.
pub const FN0_FBR_FN1_CSA_CFG: u32 = 0x0000_0100;
pub const FN0_FBR_FN1_CSA_PTR: u32 = 0x0000_010c;
pub const FN0_FBR_FN1_CSA_DATA: u32 = 0x0000_010f;
pub const FN0_FBR_FN1_BLK_SZ_L: u32 = 0x0000_0110;
pub const FN0_FBR_FN1_BLK_SZ_H: u32 = 0x0000_0111;

pub const FN0_CIS_CLOCK_WAKE_UP: u32 = 0x0001_8000;

// Function 1: message data path.
pub const FN1_DATA: u32 = 0x1000_0000;
pub const FN1_INT_ID_CLR: u32 = 0x1000_0008;
pub const FN1_INT_EN: u32 = 0x1000_0009;
pub const FN1_SD_HOST_GP: u32 = 0x1000_0024;
pub const FN1_ARM_GP: u32 = 0x1000_0028;

// CCCR bit fields.
pub const CCCR_FN_IO_1: u8 = 0x02;
pub const CCCR_INT_EN_MASTER: u8 = 0x01;
pub const CCCR_FN_INT_1: u8 = 0x02;
pub const CCCR_BUS_IF_CTRL_ECSI: u8 = 0x20;
pub const CCCR_BUS_IF_CTRL_BUS_1: u8 = 0x00;
pub const CSA_CFG_EN: u8 = 0x80;

// Function 1 interrupt bits.
pub const FN1_INT_DATA_RDY: u8 = 0x01;
pub const FN1_INT_READ_ERR: u8 = 0x02;
pub const FN1_INT_MSG_FROM_ARM: u8 = 0x04;
pub const FN1_INT_ACK_TO_HOST: u8 = 0x08;

// R1 response codes.
pub const R1_OK: u8 = 0x00;
pub const R1_IDLE: u8 = 0x01;
pub const R1_FAILED: u8 = 0xff;

/// Ready bit of the CMD5 operating-condition response.
pub const OCR_READY: u32 = 0x8000_0000;
/// Operating voltage window offered during initialisation.
pub const OCR_PROBE: u32 = 0x0020_0000;
