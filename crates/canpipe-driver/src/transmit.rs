//! Single-in-flight transmit state machine.
//!
//! The controller has one transmit slot. While it is busy, written frames
//! wait in a FIFO of pool slots; the transmit-complete interrupt feeds the
//! next one. All methods run with the device lock held.

use canpipe_frame::{decode_message, CanFrame, Message};
use canpipe_hw::{CanController, TX_SLOT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::pool::{MessageHandle, MessagePool, MessageQueue};
use crate::stats::QueueDepth;

/// Whether the transmit slot is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmitState {
    #[default]
    Idle,
    Busy,
}

/// Outcome of a submission.
#[derive(Debug)]
pub enum Submitted {
    /// Sent straight to the controller. The caller frees the slot once the
    /// device lock is released.
    Direct(MessageHandle),
    /// Appended to the pending queue.
    Queued,
}

/// What a transmit-complete interrupt did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmitOutcome {
    /// The transmit slot was not interrupting.
    #[default]
    NotSignalled,
    /// Queue empty; the coordinator went idle.
    WentIdle,
    /// The oldest pending frame was handed to the controller.
    SentNext,
}

pub(crate) struct TransmitCoordinator {
    state: TransmitState,
    pending: MessageQueue,
    depth: QueueDepth,
}

impl TransmitCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            state: TransmitState::Idle,
            pending: MessageQueue::default(),
            depth: QueueDepth::default(),
        }
    }

    pub(crate) fn state(&self) -> TransmitState {
        self.state
    }

    pub(crate) fn depth(&self) -> QueueDepth {
        self.depth
    }

    /// A handle the pool refuses to queue is dropped and reported as queued;
    /// the pool has already logged and retired it.
    pub(crate) fn submit<H: CanController>(
        &mut self,
        hw: &mut H,
        pool: &MessagePool,
        frame: &CanFrame,
        handle: MessageHandle,
    ) -> Submitted {
        match self.state {
            TransmitState::Idle => {
                hw.transmit(frame);
                hw.enable_slot_interrupt(TX_SLOT);
                self.state = TransmitState::Busy;
                trace!(id = frame.id, "transmit: direct");
                Submitted::Direct(handle)
            }
            TransmitState::Busy => {
                if let Err(err) = pool.push_back(&mut self.pending, handle) {
                    error!(id = frame.id, %err, "pending transmit dropped");
                }
                self.depth.update(self.pending.len());
                trace!(id = frame.id, depth = self.pending.len(), "transmit: queued");
                Submitted::Queued
            }
        }
    }

    /// Transmit-complete: send the next pending frame or go idle.
    pub(crate) fn advance<H: CanController>(
        &mut self,
        hw: &mut H,
        pool: &MessagePool,
    ) -> TransmitOutcome {
        while let Some(handle) = pool.pop_front(&mut self.pending) {
            self.depth.update(self.pending.len());
            let frame = match pool.load(&handle).map(|record| decode_message(&record)) {
                Ok(Ok(Message::Frame(frame))) => frame,
                Ok(_) => {
                    error!(index = handle.index(), "pending transmit slot holds no frame");
                    pool.release(handle);
                    continue;
                }
                Err(err) => {
                    // Freeing a corrupt slot retires it.
                    error!(index = handle.index(), %err, "dropping pending transmit");
                    pool.release(handle);
                    continue;
                }
            };
            hw.transmit(&frame);
            pool.release(handle);
            return TransmitOutcome::SentNext;
        }
        self.state = TransmitState::Idle;
        hw.disable_slot_interrupt(TX_SLOT);
        TransmitOutcome::WentIdle
    }

    /// Abort the in-flight frame and drop every pending one.
    ///
    /// Returns the number of pending slots freed.
    pub(crate) fn flush<H: CanController>(&mut self, hw: &mut H, pool: &MessagePool) -> usize {
        hw.abort_transmit();
        let freed = pool.drain(&mut self.pending);
        self.depth.update(0);
        self.state = TransmitState::Idle;
        hw.disable_slot_interrupt(TX_SLOT);
        debug!(freed, "transmit: flushed");
        freed
    }
}

#[cfg(test)]
mod tests {
    use canpipe_hw::SimController;

    use super::*;

    fn queued(pool: &MessagePool, frame: &CanFrame) -> MessageHandle {
        let handle = pool.allocate().unwrap();
        pool.store(&handle, frame.to_record()).unwrap();
        handle
    }

    #[test]
    fn idle_submit_is_direct() {
        let pool = MessagePool::new(4);
        let mut hw = SimController::new();
        let mut tx = TransmitCoordinator::new();
        let frame = CanFrame::standard(0x100, &[1]);

        let handle = queued(&pool, &frame);
        let Submitted::Direct(handle) = tx.submit(&mut hw, &pool, &frame, handle) else {
            panic!("expected direct transmit");
        };
        pool.free(handle).unwrap();

        assert_eq!(tx.state(), TransmitState::Busy);
        assert_eq!(hw.in_flight(), Some(frame));
        assert!(hw.slot_interrupt_enabled(TX_SLOT));
    }

    #[test]
    fn busy_submit_queues_and_advance_drains_fifo() {
        let pool = MessagePool::new(4);
        let mut hw = SimController::new();
        let mut tx = TransmitCoordinator::new();
        let frames = [
            CanFrame::standard(1, &[]),
            CanFrame::standard(2, &[]),
            CanFrame::standard(3, &[]),
        ];

        if let Submitted::Direct(h) = tx.submit(&mut hw, &pool, &frames[0], queued(&pool, &frames[0])) {
            pool.free(h).unwrap();
        }
        assert!(matches!(
            tx.submit(&mut hw, &pool, &frames[1], queued(&pool, &frames[1])),
            Submitted::Queued
        ));
        assert!(matches!(
            tx.submit(&mut hw, &pool, &frames[2], queued(&pool, &frames[2])),
            Submitted::Queued
        ));
        assert_eq!(tx.depth().max, 2);
        assert_eq!(pool.available(), 2);

        assert_eq!(tx.advance(&mut hw, &pool), TransmitOutcome::SentNext);
        assert_eq!(hw.in_flight(), Some(frames[1]));
        assert_eq!(tx.advance(&mut hw, &pool), TransmitOutcome::SentNext);
        assert_eq!(hw.in_flight(), Some(frames[2]));
        assert_eq!(tx.state(), TransmitState::Busy);

        assert_eq!(tx.advance(&mut hw, &pool), TransmitOutcome::WentIdle);
        assert_eq!(tx.state(), TransmitState::Idle);
        assert!(!hw.slot_interrupt_enabled(TX_SLOT));
        assert_eq!(pool.available(), 4);
        assert_eq!(hw.transmitted(), frames.to_vec());
    }

    #[test]
    fn flush_frees_pending_and_goes_idle() {
        let pool = MessagePool::new(8);
        let mut hw = SimController::new();
        let mut tx = TransmitCoordinator::new();
        let frame = CanFrame::standard(0x7FF, &[0xAA]);

        if let Submitted::Direct(h) = tx.submit(&mut hw, &pool, &frame, queued(&pool, &frame)) {
            pool.free(h).unwrap();
        }
        for _ in 0..3 {
            let _ = tx.submit(&mut hw, &pool, &frame, queued(&pool, &frame));
        }
        assert_eq!(pool.available(), 5);

        assert_eq!(tx.flush(&mut hw, &pool), 3);
        assert_eq!(pool.available(), 8);
        assert_eq!(tx.state(), TransmitState::Idle);
        assert_eq!(tx.depth().current, 0);
        assert_eq!(hw.abort_count(), 1);
        assert_eq!(hw.in_flight(), None);
        assert!(!hw.slot_interrupt_enabled(TX_SLOT));
    }

    #[test]
    fn corrupt_pending_slot_is_retired() {
        let pool = MessagePool::new(4);
        let mut hw = SimController::new();
        let mut tx = TransmitCoordinator::new();
        let frames = [
            CanFrame::standard(1, &[]),
            CanFrame::standard(2, &[]),
            CanFrame::standard(3, &[]),
        ];

        if let Submitted::Direct(h) = tx.submit(&mut hw, &pool, &frames[0], queued(&pool, &frames[0])) {
            pool.free(h).unwrap();
        }
        let bad = queued(&pool, &frames[1]);
        let bad_index = bad.index();
        let _ = tx.submit(&mut hw, &pool, &frames[1], bad);
        let _ = tx.submit(&mut hw, &pool, &frames[2], queued(&pool, &frames[2]));
        pool.scribble_tag(bad_index);

        assert_eq!(tx.advance(&mut hw, &pool), TransmitOutcome::SentNext);
        assert_eq!(hw.in_flight(), Some(frames[2]));
        let stats = pool.stats();
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.in_use, 0);
    }
}
