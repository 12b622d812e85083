//! Hardware accessor layer for FlexCAN-style controllers.
//!
//! The driver core never touches registers directly. It talks to a
//! [`CanController`], which hides mailbox layout, register access and
//! interrupt masking:
//! - 64 message buffers: slot 0 errata, slot 1 transmit, slots 2..63 receive
//! - two 32-bit ready-flag words covering all slots
//! - a 16-bit free-running timer stamped on every received frame
//!
//! [`SimController`] implements the trait in memory for tests and tooling.

pub mod error;
pub mod registers;
pub mod sim;
pub mod traits;

pub use error::{HwError, Result};
pub use registers::{Register, FIRST_RX_SLOT, NUM_MESSAGE_BUFFERS, RX_SLOT_COUNT, TX_SLOT};
pub use sim::SimController;
pub use traits::CanController;
