//! CAN controller driver core.
//!
//! canpipe moves CAN frames between a controller and any number of readers
//! and writers with bounded latency, using a fixed message pool.
//!
//! # Crate Structure
//!
//! - [`frame`]: 20-byte record wire format, status records, record streams
//! - [`hw`]: controller accessor trait, register layout, in-memory controller
//! - [`driver`]: message pool, interrupt dispatch, transmit queue, clients

/// Re-export frame types.
pub mod frame {
    pub use canpipe_frame::*;
}

/// Re-export hardware accessor types.
pub mod hw {
    pub use canpipe_hw::*;
}

/// Re-export driver types.
pub mod driver {
    pub use canpipe_driver::*;
}
