//! Real-time core of a CAN controller driver.
//!
//! A [`Device`] sits between one controller, reached through a
//! [`CanController`](canpipe_hw::CanController), and any number of
//! [`Client`]s:
//! - received frames are drained at interrupt time, put back in arrival
//!   order, and copied into every accepting client's queue
//! - hardware error conditions become counters and status records
//! - written frames go out one at a time through a transmit queue
//!
//! Message storage comes from a fixed [`MessagePool`] sized at start-up, so
//! the interrupt path never allocates.

pub mod client;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod isr;
pub mod pool;
pub mod reorder;
pub mod stats;
pub mod transmit;

pub use client::Client;
pub use config::{DeviceConfig, DEFAULT_DEVICE_NAME, DEFAULT_POOL_CAPACITY, MAX_POOL_CAPACITY};
pub use control::{ControlCommand, ControlReply};
pub use device::Device;
pub use error::{DriverError, PoolError, Result};
pub use isr::DispatchSummary;
pub use pool::{MessageHandle, MessagePool, MessageQueue, PoolStats};
pub use stats::{ClientStats, DeviceStats, DrainStats, ErrorCounters, IsrTime, QueueDepth};
pub use transmit::{Submitted, TransmitOutcome, TransmitState};
