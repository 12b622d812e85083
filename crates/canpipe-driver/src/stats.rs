//! Snapshot types for device, client and interrupt statistics.

use std::time::Duration;

use canpipe_frame::StatusFlags;
use serde::{Deserialize, Serialize};

/// One counter per hardware error or state condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounters {
    pub tx_warn: u64,
    pub rx_warn: u64,
    pub bus_off: u64,
    pub bit1: u64,
    pub bit0: u64,
    pub ack: u64,
    pub crc: u64,
    pub form: u64,
    pub stuff: u64,
}

impl ErrorCounters {
    /// Count one occurrence of every known bit set in `flags`.
    pub(crate) fn record(&mut self, flags: StatusFlags) {
        let counters = [
            (StatusFlags::TX_WARN, &mut self.tx_warn),
            (StatusFlags::RX_WARN, &mut self.rx_warn),
            (StatusFlags::BUS_OFF, &mut self.bus_off),
            (StatusFlags::BIT1_ERR, &mut self.bit1),
            (StatusFlags::BIT0_ERR, &mut self.bit0),
            (StatusFlags::ACK_ERR, &mut self.ack),
            (StatusFlags::CRC_ERR, &mut self.crc),
            (StatusFlags::FORM_ERR, &mut self.form),
            (StatusFlags::STUFF_ERR, &mut self.stuff),
        ];
        for (bit, counter) in counters {
            if flags.contains(bit) {
                *counter += 1;
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.tx_warn
            + self.rx_warn
            + self.bus_off
            + self.bit1
            + self.bit0
            + self.ack
            + self.crc
            + self.form
            + self.stuff
    }
}

/// Interrupt handler run time, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsrTime {
    pub current_ns: u64,
    pub total_ns: u64,
    pub max_ns: u64,
}

impl IsrTime {
    pub(crate) fn record(&mut self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.current_ns = ns;
        self.total_ns = self.total_ns.saturating_add(ns);
        self.max_ns = self.max_ns.max(ns);
    }
}

/// Receive slots drained per interrupt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainStats {
    pub total: u64,
    pub current: usize,
    pub max: usize,
}

impl DrainStats {
    pub(crate) fn record(&mut self, drained: usize) {
        self.total += drained as u64;
        self.current = drained;
        self.max = self.max.max(drained);
    }
}

/// Queue depth with its high-water mark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub current: usize,
    pub max: usize,
}

impl QueueDepth {
    pub(crate) fn update(&mut self, depth: usize) {
        self.current = depth;
        self.max = self.max.max(depth);
    }
}

/// Device-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub isr_count: u64,
    pub errors: ErrorCounters,
    pub isr_time: IsrTime,
    pub drained: DrainStats,
    pub tx_queue: QueueDepth,
    /// Frames handed to the controller, direct or from the pending queue.
    pub transmitted: u64,
    /// Pending transmissions discarded by an acknowledgement-error flush.
    pub tx_flushed: u64,
    /// Client copies lost to pool exhaustion during fan-out.
    pub fanout_dropped: u64,
}

/// Per-client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub read_count: u64,
    pub write_count: u64,
    pub transmits_direct: u64,
    pub transmits_queued: u64,
    pub rx_queue: QueueDepth,
}
