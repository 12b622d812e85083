//! Interrupt-time dispatch.
//!
//! One pass, entirely under the device lock:
//! 1. fold error/status register bits into counters and a status record
//! 2. fan the status record out to every accepting client
//! 3. drain every flagged receive slot into the staging buffer
//! 4. restore arrival order across a timer wrap
//! 5. fan each frame out to every accepting client
//! 6. advance the transmit state machine on transmit-complete
//!
//! Nothing here allocates. The staging buffer is fixed and client queues
//! link through the pool slots they hold.

use std::time::Instant;

use canpipe_frame::{status::status_name, RawRecord, StatusFlags, StatusRecord};
use canpipe_hw::registers::{
    ESR1_ACK_ERR, ESR1_BIT0_ERR, ESR1_BIT1_ERR, ESR1_BOFF_INT, ESR1_CRC_ERR, ESR1_ERR_INT,
    ESR1_FRM_ERR, ESR1_RWRN_INT, ESR1_STF_ERR, ESR1_TWRN_INT,
};
use canpipe_hw::{CanController, FIRST_RX_SLOT, NUM_MESSAGE_BUFFERS, TX_SLOT};
use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};

use crate::device::DeviceState;
use crate::error::PoolError;
use crate::pool::MessagePool;
use crate::reorder::{order_batch, Staged};
use crate::transmit::TransmitOutcome;

/// Error/status register bit and the status bit it raises.
struct ErrorCheck {
    esr1: u32,
    status: StatusFlags,
}

/// Checked on every interrupt.
const STATE_CHECKS: [ErrorCheck; 3] = [
    ErrorCheck {
        esr1: ESR1_TWRN_INT,
        status: StatusFlags::TX_WARN,
    },
    ErrorCheck {
        esr1: ESR1_RWRN_INT,
        status: StatusFlags::RX_WARN,
    },
    ErrorCheck {
        esr1: ESR1_BOFF_INT,
        status: StatusFlags::BUS_OFF,
    },
];

/// Only meaningful when the error interrupt bit is set.
const BUS_ERROR_CHECKS: [ErrorCheck; 6] = [
    ErrorCheck {
        esr1: ESR1_BIT1_ERR,
        status: StatusFlags::BIT1_ERR,
    },
    ErrorCheck {
        esr1: ESR1_BIT0_ERR,
        status: StatusFlags::BIT0_ERR,
    },
    ErrorCheck {
        esr1: ESR1_ACK_ERR,
        status: StatusFlags::ACK_ERR,
    },
    ErrorCheck {
        esr1: ESR1_CRC_ERR,
        status: StatusFlags::CRC_ERR,
    },
    ErrorCheck {
        esr1: ESR1_FRM_ERR,
        status: StatusFlags::FORM_ERR,
    },
    ErrorCheck {
        esr1: ESR1_STF_ERR,
        status: StatusFlags::STUFF_ERR,
    },
];

/// What one interrupt did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Status bits raised and fanned out.
    pub status: StatusFlags,
    /// Receive slots drained.
    pub drained: usize,
    /// Copies appended to client queues, status records included.
    pub delivered: usize,
    /// Copies lost to pool exhaustion.
    pub dropped: usize,
    /// Pending transmissions discarded by an acknowledgement error.
    pub flushed: usize,
    pub transmit: TransmitOutcome,
}

impl<H: CanController> DeviceState<H> {
    pub(crate) fn dispatch(&mut self, pool: &MessagePool) -> DispatchSummary {
        let started = Instant::now();
        let mut summary = DispatchSummary::default();
        self.stats.isr_count += 1;

        let status = self.collect_status(pool, &mut summary);
        summary.status = status;
        let accepting = self.readers.iter().filter(|r| r.accepting).count();

        let mut expected = 0;
        let mut aborted = false;
        if !summary.status.is_empty() {
            expected += accepting;
            let record = StatusRecord::new(summary.status).to_record();
            aborted = !self.fan_out(pool, &record, &mut summary);
        }

        let drained = self.drain_receive();
        summary.drained = drained;
        expected += drained * accepting;
        if !aborted {
            for i in 0..drained {
                let record = self.staging[i].frame.to_record();
                if !self.fan_out(pool, &record, &mut summary) {
                    break;
                }
            }
        }
        summary.dropped = expected - summary.delivered;
        self.stats.fanout_dropped += summary.dropped as u64;

        if self.hw.is_slot_interrupting(TX_SLOT) {
            self.hw.clear_slot_interrupt(TX_SLOT);
            summary.transmit = self.transmit.advance(&mut self.hw, pool);
            if summary.transmit == TransmitOutcome::SentNext {
                self.stats.transmitted += 1;
            }
        }

        self.stats.isr_time.record(started.elapsed());
        if summary.dropped > 0 {
            warn!(device = %self.name, dropped = summary.dropped, "fan-out cut short by pool exhaustion");
        }
        trace!(
            device = %self.name,
            status = %summary.status,
            drained = summary.drained,
            delivered = summary.delivered,
            transmit = ?summary.transmit,
            "interrupt dispatched"
        );
        summary
    }

    /// Fold error/status register bits into counters and status bits.
    ///
    /// Log lines are skipped when the previous interrupt also saw errors;
    /// counters always advance.
    fn collect_status(&mut self, pool: &MessagePool, summary: &mut DispatchSummary) -> StatusFlags {
        let esr1 = self.hw.read_error_status();
        let quiet = self.prior_errors_found;
        let mut flags = StatusFlags::empty();
        let mut handled = 0;

        for check in &STATE_CHECKS {
            if esr1 & check.esr1 != 0 {
                handled |= check.esr1;
                flags.insert(check.status);
                self.stats.errors.record(check.status);
                if !quiet {
                    error!(device = %self.name, condition = status_name(check.status), "controller state change");
                }
            }
        }

        let error_interrupt = esr1 & ESR1_ERR_INT != 0;
        if error_interrupt {
            handled |= ESR1_ERR_INT;
            let mut recognized = false;
            for check in &BUS_ERROR_CHECKS {
                if esr1 & check.esr1 != 0 {
                    recognized = true;
                    handled |= check.esr1;
                    flags.insert(check.status);
                    self.stats.errors.record(check.status);
                    if !quiet {
                        error!(device = %self.name, error = status_name(check.status), "bus error");
                    }
                }
            }
            if !recognized && !quiet {
                error!(device = %self.name, esr1 = format_args!("{esr1:#010x}"), "error interrupt without error bits");
            }
        }

        if handled != 0 {
            self.hw.clear_error_status(handled);
        }

        if flags.contains(StatusFlags::ACK_ERR) {
            let freed = self.transmit.flush(&mut self.hw, pool);
            summary.flushed = freed;
            self.stats.tx_flushed += freed as u64;
            if !quiet {
                error!(device = %self.name, freed, "acknowledgement error, transmit queue flushed");
            }
        }

        self.prior_errors_found = !flags.is_empty() || error_interrupt;
        flags
    }

    /// Drain every flagged receive slot into the staging buffer, ordered.
    fn drain_receive(&mut self) -> usize {
        let (low, high) = self.hw.read_ready_flags();
        let ready = u64::from(high) << 32 | u64::from(low);
        let mut count = 0;
        for index in FIRST_RX_SLOT..NUM_MESSAGE_BUFFERS {
            if ready & (1u64 << index) == 0 {
                continue;
            }
            let (frame, timestamp) = self.hw.drain_receive_slot(index);
            self.staging[count] = Staged::new(frame, timestamp);
            count += 1;
        }
        // Sampled after the drain so every stamp in the batch predates it.
        let now = self.hw.read_timer();
        order_batch(&mut self.staging[..count], now);
        self.stats.drained.record(count);
        count
    }

    /// Deliver one copy of `record` to every accepting client.
    ///
    /// Returns false when the pool ran dry; no copy already queued is
    /// rolled back.
    fn fan_out(&mut self, pool: &MessagePool, record: &RawRecord, summary: &mut DispatchSummary) -> bool {
        for reader in self.readers.iter_mut().filter(|r| r.accepting) {
            let handle = match pool.allocate() {
                Ok(handle) => handle,
                Err(PoolError::Exhausted) => return false,
                Err(err) => {
                    error!(device = %self.name, %err, "fan-out allocation failed");
                    return false;
                }
            };
            if let Err(err) = pool.store(&handle, *record) {
                error!(device = %self.name, %err, "fan-out store failed");
                pool.release(handle);
                return false;
            }
            if let Err(err) = pool.push_back(&mut reader.queue, handle) {
                error!(device = %self.name, %err, "fan-out queueing failed");
                return false;
            }
            reader.stats.rx_queue.update(reader.queue.len());
            reader.wake.notify_one();
            summary.delivered += 1;
        }
        true
    }
}
