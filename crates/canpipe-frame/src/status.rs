//! Status-change bits carried in [`StatusRecord::status1`](crate::StatusRecord).
//!
//! The layout matches what applications already decode, one bit per
//! hardware error or state condition.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// First word of every status record. Only uses identifier bits that a valid
/// frame can never carry.
pub const STATUS_CHANGE_FLAG: u32 = 0xE000_0000;

bitflags! {
    /// A set of status bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StatusFlags: u32 {
        /// Transmit error counter crossed the warning level (> 96).
        const TX_WARN = 0x0000_0001;
        /// Receive error counter crossed the warning level (> 96).
        const RX_WARN = 0x0000_0002;
        /// Controller went bus-off.
        const BUS_OFF = 0x0000_0004;
        /// Recessive bit sent, dominant read back.
        const BIT1_ERR = 0x0000_0008;
        /// Dominant bit sent, recessive read back.
        const BIT0_ERR = 0x0000_0010;
        /// Transmission was not acknowledged.
        const ACK_ERR = 0x0000_0020;
        /// Received frame failed CRC.
        const CRC_ERR = 0x0000_0040;
        /// Fixed-form field violation.
        const FORM_ERR = 0x0000_0080;
        /// Bit stuffing violation.
        const STUFF_ERR = 0x0000_0100;
    }
}

/// Name of a single known status bit, `"UNKNOWN"` otherwise.
pub fn status_name(flag: StatusFlags) -> &'static str {
    let mut names = flag.iter_names();
    match (names.next(), names.next()) {
        (Some((name, bit)), None) if bit == flag => name,
        _ => "UNKNOWN",
    }
}

impl StatusFlags {
    /// Names of the known bits that are set, lowest bit first.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        self.iter_names().map(|(name, _)| name)
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for name in self.names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{unknown:#x}")?;
        }
        Ok(())
    }
}
