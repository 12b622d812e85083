//! Fixed-capacity message pool.
//!
//! Every slot is carved out when the pool is built; nothing is allocated
//! afterwards. A slot leaves the pool as a [`MessageHandle`], a non-`Clone`
//! token that moves between client queues, the pending-transmit queue and
//! local working sets until it is handed back with [`MessagePool::free`].
//!
//! Queues own no storage. Each slot has one link field, and a
//! [`MessageQueue`] threads its slots through it, so a slot sits in at most
//! one queue and queueing never allocates.
//!
//! Each slot carries an integrity tag checked on every access. A slot whose
//! tag no longer matches is taken out of service (leaked) rather than handed
//! out again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use canpipe_frame::{RawRecord, FRAME_SIZE};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::PoolError;

const SLOT_TAG: u32 = 0xCA4B_F00D;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Token for one allocated slot.
///
/// Dropping a handle without freeing it leaks the slot.
#[must_use = "a dropped handle leaks its pool slot"]
pub struct MessageHandle {
    index: usize,
    pool: u64,
    generation: u32,
}

impl MessageHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandle")
            .field("index", &self.index)
            .field("pool", &self.pool)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub in_use: usize,
    /// Slots taken out of service after failing the integrity check.
    pub leaked: usize,
    /// Fewest free slots ever observed.
    pub low_water: usize,
    pub allocations: u64,
    pub frees: u64,
    pub exhausted_count: u64,
    pub rejected_frees: u64,
}

/// FIFO of pool slots linked through the slots themselves.
///
/// Every operation goes through the [`MessagePool`] that owns the slots.
/// Dropping a non-empty queue leaks its slots; drain it with
/// [`MessagePool::drain`] first.
#[derive(Debug, Default)]
pub struct MessageQueue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl MessageQueue {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct Slot {
    tag: u32,
    generation: u32,
    live: bool,
    next: Option<usize>,
    record: RawRecord,
}

struct PoolInner {
    slots: Vec<Slot>,
    free: Vec<usize>,
    exhausted: bool,
    stats: PoolStats,
}

/// Preallocated message slots behind their own lock.
pub struct MessagePool {
    id: u64,
    inner: Mutex<PoolInner>,
}

impl MessagePool {
    /// Carve `capacity` slots up front.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                tag: SLOT_TAG,
                generation: 0,
                live: false,
                next: None,
                record: [0; FRAME_SIZE],
            })
            .collect();
        // Pop order hands out the lowest index first.
        let free = (0..capacity).rev().collect();
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(PoolInner {
                slots,
                free,
                exhausted: false,
                stats: PoolStats {
                    capacity,
                    available: capacity,
                    low_water: capacity,
                    ..PoolStats::default()
                },
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a zeroed slot.
    pub fn allocate(&self) -> Result<MessageHandle, PoolError> {
        let mut inner = self.lock();
        let Some(index) = inner.free.pop() else {
            if !inner.exhausted {
                error!(capacity = inner.slots.len(), "message pool exhausted");
                inner.exhausted = true;
            }
            inner.stats.exhausted_count += 1;
            return Err(PoolError::Exhausted);
        };

        let slot = &mut inner.slots[index];
        if slot.tag != SLOT_TAG {
            error!(index, tag = slot.tag, "corrupt message slot, leaking it");
            inner.stats.leaked += 1;
            inner.refresh_counts();
            return Err(PoolError::Corrupt { index });
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.live = true;
        slot.next = None;
        slot.record = [0; FRAME_SIZE];
        let generation = slot.generation;

        inner.stats.allocations += 1;
        inner.refresh_counts();
        Ok(MessageHandle {
            index,
            pool: self.id,
            generation,
        })
    }

    /// Return a slot to the free list.
    ///
    /// A handle from another pool, or one that no longer matches its slot,
    /// is rejected without touching pool state. A live slot that fails the
    /// integrity check is taken out of service instead of being reused.
    pub fn free(&self, handle: MessageHandle) -> Result<(), PoolError> {
        let mut inner = self.lock();
        if let Err(err) = inner.check(self.id, &handle) {
            inner.stats.rejected_frees += 1;
            inner.retire(&handle, err);
            warn!(index = handle.index, %err, "rejected message free");
            return Err(err);
        }
        let slot = &mut inner.slots[handle.index];
        slot.live = false;
        slot.next = None;
        inner.free.push(handle.index);
        inner.exhausted = false;
        inner.stats.frees += 1;
        inner.refresh_counts();
        Ok(())
    }

    /// Free a handle, logging instead of returning a failure.
    ///
    /// Returns whether the slot went back on the free list.
    pub fn release(&self, handle: MessageHandle) -> bool {
        let index = handle.index;
        match self.free(handle) {
            Ok(()) => true,
            Err(err) => {
                error!(index, %err, "failed to free message slot");
                false
            }
        }
    }

    /// Append a handle to the tail of `queue`.
    ///
    /// A handle that fails its check is not queued; a corrupt slot is taken
    /// out of service.
    pub fn push_back(&self, queue: &mut MessageQueue, handle: MessageHandle) -> Result<(), PoolError> {
        let mut inner = self.lock();
        if let Err(err) = inner.check(self.id, &handle) {
            inner.retire(&handle, err);
            return Err(err);
        }
        let index = handle.index;
        inner.slots[index].next = None;
        match queue.tail {
            Some(tail) => inner.slots[tail].next = Some(index),
            None => queue.head = Some(index),
        }
        queue.tail = Some(index);
        queue.len += 1;
        Ok(())
    }

    /// Detach the oldest handle from `queue`.
    pub fn pop_front(&self, queue: &mut MessageQueue) -> Option<MessageHandle> {
        let index = queue.head?;
        let mut inner = self.lock();
        let Some(slot) = inner.slots.get_mut(index) else {
            error!(index, "queue links outside the pool, dropping it");
            *queue = MessageQueue::default();
            return None;
        };
        queue.head = slot.next.take();
        if queue.head.is_none() {
            queue.tail = None;
        }
        queue.len -= 1;
        Some(MessageHandle {
            index,
            pool: self.id,
            generation: slot.generation,
        })
    }

    /// Free every handle in `queue`. Returns how many went back on the
    /// free list.
    pub fn drain(&self, queue: &mut MessageQueue) -> usize {
        let mut freed = 0;
        while let Some(handle) = self.pop_front(queue) {
            if self.release(handle) {
                freed += 1;
            }
        }
        freed
    }

    /// Write a record into an allocated slot.
    pub fn store(&self, handle: &MessageHandle, record: RawRecord) -> Result<(), PoolError> {
        let mut inner = self.lock();
        inner.check(self.id, handle)?;
        inner.slots[handle.index].record = record;
        Ok(())
    }

    /// Copy the record out of an allocated slot.
    pub fn load(&self, handle: &MessageHandle) -> Result<RawRecord, PoolError> {
        let inner = self.lock();
        inner.check(self.id, handle)?;
        Ok(inner.slots[handle.index].record)
    }

    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    #[cfg(test)]
    pub(crate) fn scribble_tag(&self, index: usize) {
        self.lock().slots[index].tag = 0;
    }
}

impl PoolInner {
    fn check(&self, pool_id: u64, handle: &MessageHandle) -> Result<(), PoolError> {
        if handle.pool != pool_id {
            return Err(PoolError::ForeignHandle);
        }
        let slot = self
            .slots
            .get(handle.index)
            .ok_or(PoolError::ForeignHandle)?;
        if slot.tag != SLOT_TAG {
            error!(index = handle.index, tag = slot.tag, "corrupt message slot");
            return Err(PoolError::Corrupt {
                index: handle.index,
            });
        }
        if !slot.live || slot.generation != handle.generation {
            return Err(PoolError::ForeignHandle);
        }
        Ok(())
    }

    /// Take a corrupt live slot out of service.
    fn retire(&mut self, handle: &MessageHandle, err: PoolError) {
        if !matches!(err, PoolError::Corrupt { .. }) {
            return;
        }
        let slot = &mut self.slots[handle.index];
        if slot.live {
            slot.live = false;
            slot.next = None;
            self.stats.leaked += 1;
            self.refresh_counts();
        }
    }

    fn refresh_counts(&mut self) {
        let available = self.free.len();
        self.stats.available = available;
        self.stats.in_use = self.slots.len() - available - self.stats.leaked;
        self.stats.low_water = self.stats.low_water.min(available);
    }
}

impl fmt::Debug for MessagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("MessagePool")
            .field("id", &self.id)
            .field("capacity", &stats.capacity)
            .field("available", &stats.available)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn capacity_allocations_succeed_then_exhausted() {
        let pool = MessagePool::new(4);
        let handles: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.allocate().unwrap_err(), PoolError::Exhausted);
        assert_eq!(pool.allocate().unwrap_err(), PoolError::Exhausted);

        let stats = pool.stats();
        assert_eq!(stats.exhausted_count, 2);
        assert_eq!(stats.in_use, 4);

        for handle in handles {
            pool.free(handle).unwrap();
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn free_then_allocate_succeeds() {
        let pool = MessagePool::new(1);
        let handle = pool.allocate().unwrap();
        assert!(pool.allocate().is_err());
        pool.free(handle).unwrap();
        let again = pool.allocate().unwrap();
        assert_eq!(again.index(), 0);
        pool.free(again).unwrap();
    }

    #[test]
    fn live_handles_never_alias() {
        let pool = MessagePool::new(16);
        let mut live = Vec::new();
        for round in 0..5 {
            while let Ok(handle) = pool.allocate() {
                live.push(handle);
            }
            let indices: HashSet<_> = live.iter().map(MessageHandle::index).collect();
            assert_eq!(indices.len(), live.len());
            // Release every other handle and go again.
            let mut keep = Vec::new();
            for (i, handle) in live.drain(..).enumerate() {
                if (i + round) % 2 == 0 {
                    pool.free(handle).unwrap();
                } else {
                    keep.push(handle);
                }
            }
            live = keep;
        }
        for handle in live {
            pool.free(handle).unwrap();
        }
        assert_eq!(pool.available(), 16);
    }

    #[test]
    fn allocated_slot_is_zeroed() {
        let pool = MessagePool::new(1);
        let handle = pool.allocate().unwrap();
        pool.store(&handle, [0xAA; FRAME_SIZE]).unwrap();
        pool.free(handle).unwrap();

        let handle = pool.allocate().unwrap();
        assert_eq!(pool.load(&handle).unwrap(), [0; FRAME_SIZE]);
        pool.free(handle).unwrap();
    }

    #[test]
    fn store_and_load() {
        let pool = MessagePool::new(2);
        let handle = pool.allocate().unwrap();
        let mut record = [0u8; FRAME_SIZE];
        record[0] = 0x42;
        record[19] = 0x99;
        pool.store(&handle, record).unwrap();
        assert_eq!(pool.load(&handle).unwrap(), record);
        pool.free(handle).unwrap();
    }

    #[test]
    fn foreign_handle_rejected_without_mutation() {
        let pool = MessagePool::new(2);
        let other = MessagePool::new(2);
        let foreign = other.allocate().unwrap();
        let before = pool.available();

        assert_eq!(pool.free(foreign).unwrap_err(), PoolError::ForeignHandle);
        assert_eq!(pool.available(), before);
        assert_eq!(pool.stats().rejected_frees, 1);
        assert_eq!(pool.stats().frees, 0);
    }

    #[test]
    fn stale_handle_rejected() {
        let pool = MessagePool::new(1);
        let handle = pool.allocate().unwrap();
        let stale = MessageHandle {
            index: handle.index,
            pool: handle.pool,
            generation: handle.generation,
        };
        pool.free(handle).unwrap();
        assert_eq!(pool.load(&stale).unwrap_err(), PoolError::ForeignHandle);
        assert_eq!(pool.free(stale).unwrap_err(), PoolError::ForeignHandle);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn corrupt_slot_is_leaked_on_allocate() {
        let pool = MessagePool::new(2);
        pool.scribble_tag(0);
        assert_eq!(
            pool.allocate().unwrap_err(),
            PoolError::Corrupt { index: 0 }
        );
        let handle = pool.allocate().unwrap();
        assert_eq!(handle.index(), 1);
        pool.free(handle).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn corrupt_slot_detected_on_access() {
        let pool = MessagePool::new(1);
        let handle = pool.allocate().unwrap();
        pool.scribble_tag(handle.index());
        assert_eq!(
            pool.load(&handle).unwrap_err(),
            PoolError::Corrupt { index: 0 }
        );
        assert_eq!(
            pool.free(handle).unwrap_err(),
            PoolError::Corrupt { index: 0 }
        );
        assert_eq!(pool.available(), 0);

        let stats = pool.stats();
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.rejected_frees, 1);
    }

    #[test]
    fn release_reports_failure() {
        let pool = MessagePool::new(2);
        let handle = pool.allocate().unwrap();
        pool.scribble_tag(handle.index());
        assert!(!pool.release(handle));
        assert_eq!(pool.stats().leaked, 1);

        let handle = pool.allocate().unwrap();
        assert!(pool.release(handle));
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn queue_is_fifo_through_slot_links() {
        let pool = MessagePool::new(4);
        let mut queue = MessageQueue::default();
        for value in 1..=3u8 {
            let handle = pool.allocate().unwrap();
            pool.store(&handle, [value; FRAME_SIZE]).unwrap();
            pool.push_back(&mut queue, handle).unwrap();
        }
        assert_eq!(queue.len(), 3);

        let first = pool.pop_front(&mut queue).unwrap();
        assert_eq!(pool.load(&first).unwrap(), [1; FRAME_SIZE]);
        pool.free(first).unwrap();

        // Push after a pop lands behind the remaining entries.
        let handle = pool.allocate().unwrap();
        pool.store(&handle, [4; FRAME_SIZE]).unwrap();
        pool.push_back(&mut queue, handle).unwrap();

        let mut order = Vec::new();
        while let Some(handle) = pool.pop_front(&mut queue) {
            order.push(pool.load(&handle).unwrap()[0]);
            pool.free(handle).unwrap();
        }
        assert_eq!(order, vec![2, 3, 4]);
        assert!(queue.is_empty());
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn queues_share_one_pool() {
        let pool = MessagePool::new(4);
        let mut a = MessageQueue::default();
        let mut b = MessageQueue::default();
        for _ in 0..2 {
            pool.push_back(&mut a, pool.allocate().unwrap()).unwrap();
            pool.push_back(&mut b, pool.allocate().unwrap()).unwrap();
        }
        assert_eq!((a.len(), b.len()), (2, 2));
        assert!(pool.allocate().is_err());

        assert_eq!(pool.drain(&mut a), 2);
        assert!(a.is_empty());
        assert_eq!(b.len(), 2);
        assert_eq!(pool.drain(&mut b), 2);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn foreign_handle_is_not_queued() {
        let pool = MessagePool::new(1);
        let other = MessagePool::new(1);
        let mut queue = MessageQueue::default();
        assert_eq!(
            pool.push_back(&mut queue, other.allocate().unwrap()),
            Err(PoolError::ForeignHandle)
        );
        assert!(queue.is_empty());
        assert!(pool.pop_front(&mut queue).is_none());
    }

    #[test]
    fn low_water_tracks_peak_use() {
        let pool = MessagePool::new(8);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        pool.free(a).unwrap();
        pool.free(b).unwrap();
        pool.free(c).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.low_water, 5);
        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.frees, 3);
    }
}
