//! Mailbox layout, error/status register bits and readable registers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Total message buffers on the controller.
pub const NUM_MESSAGE_BUFFERS: usize = 64;
/// The single transmit mailbox.
pub const TX_SLOT: usize = 1;
/// First receive mailbox; every slot from here up receives. Slot 0 stays
/// inactive for the transmit errata workaround.
pub const FIRST_RX_SLOT: usize = 2;
/// Largest possible receive batch for one interrupt.
pub const RX_SLOT_COUNT: usize = NUM_MESSAGE_BUFFERS - FIRST_RX_SLOT;

// ESR1 bits. Interrupt bits are write-1-to-clear, error bits clear on read.
pub const ESR1_TWRN_INT: u32 = 0x0002_0000;
pub const ESR1_RWRN_INT: u32 = 0x0001_0000;
pub const ESR1_BIT1_ERR: u32 = 0x0000_8000;
pub const ESR1_BIT0_ERR: u32 = 0x0000_4000;
pub const ESR1_ACK_ERR: u32 = 0x0000_2000;
pub const ESR1_CRC_ERR: u32 = 0x0000_1000;
pub const ESR1_FRM_ERR: u32 = 0x0000_0800;
pub const ESR1_STF_ERR: u32 = 0x0000_0400;
pub const ESR1_BOFF_INT: u32 = 0x0000_0004;
pub const ESR1_ERR_INT: u32 = 0x0000_0002;

/// Registers exposed read-only to clients for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "UPPERCASE")]
pub enum Register {
    Mcr,
    Ctrl1,
    Timer,
    Ecr,
    Esr1,
    Imask2,
    Imask1,
    Iflag2,
    Iflag1,
    Ctrl2,
    Esr2,
    Gfwr,
}

impl Register {
    /// Every readable register, in controller address order.
    pub const ALL: [Register; 12] = [
        Register::Mcr,
        Register::Ctrl1,
        Register::Timer,
        Register::Ecr,
        Register::Esr1,
        Register::Imask2,
        Register::Imask1,
        Register::Iflag2,
        Register::Iflag1,
        Register::Ctrl2,
        Register::Esr2,
        Register::Gfwr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Register::Mcr => "MCR",
            Register::Ctrl1 => "CTRL1",
            Register::Timer => "TIMER",
            Register::Ecr => "ECR",
            Register::Esr1 => "ESR1",
            Register::Imask2 => "IMASK2",
            Register::Imask1 => "IMASK1",
            Register::Iflag2 => "IFLAG2",
            Register::Iflag1 => "IFLAG1",
            Register::Ctrl2 => "CTRL2",
            Register::Esr2 => "ESR2",
            Register::Gfwr => "GFWR",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ready-flag word and bit for a slot.
pub fn slot_flag(index: usize) -> (usize, u32) {
    (index / 32, 1u32 << (index % 32))
}
