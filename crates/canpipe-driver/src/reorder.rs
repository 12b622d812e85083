//! Restores arrival order for one receive drain.
//!
//! Receive slots are drained in index order, not arrival order. Each frame
//! carries the 16-bit free-running timer value captured when it landed. The
//! timer is sampled once more after the drain; every frame in the batch
//! arrived before that sample, so a raw stamp below it belongs to the current
//! timer epoch and one at or above it to the previous one.

use canpipe_frame::CanFrame;

/// Width of one timer epoch.
pub const TIMER_EPOCH: u32 = 0x1_0000;

/// One drained frame awaiting fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Staged {
    pub frame: CanFrame,
    /// Raw 16-bit capture stamp, widened after correction.
    pub timestamp: u32,
}

impl Staged {
    pub fn new(frame: CanFrame, timestamp: u16) -> Self {
        Self {
            frame,
            timestamp: u32::from(timestamp),
        }
    }
}

/// Lift stamps from the current epoch above those from the previous one.
pub fn correct_timestamps(batch: &mut [Staged], now: u16) {
    let now = u32::from(now);
    for staged in batch.iter_mut() {
        if staged.timestamp < now {
            staged.timestamp += TIMER_EPOCH;
        }
    }
}

/// Stable ascending sort by corrected stamp.
///
/// Insertion sort in place; the interrupt path must not allocate.
pub fn sort_by_timestamp(batch: &mut [Staged]) {
    for i in 1..batch.len() {
        let mut j = i;
        while j > 0 && batch[j - 1].timestamp > batch[j].timestamp {
            batch.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Correct and sort a drained batch.
pub fn order_batch(batch: &mut [Staged], now: u16) {
    correct_timestamps(batch, now);
    sort_by_timestamp(batch);
}
