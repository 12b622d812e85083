use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use canpipe_hw::{CanController, RX_SLOT_COUNT};
use tracing::{debug, info};

use crate::client::Client;
use crate::config::DeviceConfig;
use crate::error::{DriverError, Result};
use crate::isr::DispatchSummary;
use crate::pool::{MessagePool, MessageQueue, PoolStats};
use crate::reorder::Staged;
use crate::stats::{ClientStats, DeviceStats};
use crate::transmit::{TransmitCoordinator, TransmitState};

/// One open client as seen from the interrupt path.
pub(crate) struct ReaderEntry {
    pub(crate) id: u64,
    pub(crate) accepting: bool,
    pub(crate) queue: MessageQueue,
    pub(crate) wake: Arc<Condvar>,
    /// Reads currently blocked on `wake`.
    pub(crate) waiters: usize,
    pub(crate) interrupted: bool,
    pub(crate) stats: ClientStats,
}

/// Everything behind the device lock.
pub(crate) struct DeviceState<H> {
    pub(crate) name: String,
    pub(crate) hw: H,
    pub(crate) transmit: TransmitCoordinator,
    pub(crate) readers: Vec<ReaderEntry>,
    pub(crate) prior_errors_found: bool,
    pub(crate) staging: [Staged; RX_SLOT_COUNT],
    pub(crate) stats: DeviceStats,
    pub(crate) shut_down: bool,
}

impl ReaderEntry {
    /// Flag blocked reads for cancellation and wake them.
    pub(crate) fn interrupt(&mut self) {
        if self.waiters > 0 {
            self.interrupted = true;
            self.wake.notify_all();
        }
    }
}

impl<H> DeviceState<H> {
    pub(crate) fn reader_mut(&mut self, id: u64) -> Option<&mut ReaderEntry> {
        self.readers.iter_mut().find(|r| r.id == id)
    }

    pub(crate) fn reader(&self, id: u64) -> Option<&ReaderEntry> {
        self.readers.iter().find(|r| r.id == id)
    }
}

pub(crate) struct Shared<H> {
    pub(crate) state: Mutex<DeviceState<H>>,
    pub(crate) pool: MessagePool,
    next_client: AtomicU64,
}

impl<H> Shared<H> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One CAN controller instance.
///
/// Clones share the same device. The interrupt entry point
/// [`handle_interrupt`](Device::handle_interrupt) and every client operation
/// serialize on a single device lock.
pub struct Device<H> {
    shared: Arc<Shared<H>>,
}

impl<H> Clone for Device<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H: CanController> Device<H> {
    /// Start a device around a hardware accessor.
    ///
    /// The message pool is sized here and never grows. Queues link through
    /// its slots.
    pub fn new(hw: H, config: &DeviceConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.pool_capacity;
        let state = DeviceState {
            name: config.name.clone(),
            hw,
            transmit: TransmitCoordinator::new(),
            readers: Vec::new(),
            prior_errors_found: false,
            staging: [Staged::default(); RX_SLOT_COUNT],
            stats: DeviceStats::default(),
            shut_down: false,
        };
        info!(device = %config.name, pool_capacity = capacity, "device started");
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                pool: MessagePool::new(capacity),
                next_client: AtomicU64::new(1),
            }),
        })
    }

    /// Open a new client. It receives nothing until it enables acceptance.
    pub fn open(&self) -> Result<Client<H>> {
        let id = self.shared.next_client.fetch_add(1, Ordering::Relaxed);
        let wake = Arc::new(Condvar::new());
        {
            let mut state = self.shared.lock();
            if state.shut_down {
                return Err(DriverError::Closed);
            }
            state.readers.push(ReaderEntry {
                id,
                accepting: false,
                queue: MessageQueue::default(),
                wake: Arc::clone(&wake),
                waiters: 0,
                interrupted: false,
                stats: ClientStats::default(),
            });
            debug!(device = %state.name, client = id, "client opened");
        }
        Ok(Client::new(id, Arc::clone(&self.shared), wake))
    }

    /// Interrupt entry point. Call once per controller interrupt.
    pub fn handle_interrupt(&self) -> DispatchSummary {
        let mut state = self.shared.lock();
        state.dispatch(&self.shared.pool)
    }

    /// Cancel every blocked read. Each returns [`DriverError::Interrupted`].
    ///
    /// Clients with no read blocked are unaffected.
    pub fn interrupt_all(&self) {
        let mut state = self.shared.lock();
        for reader in &mut state.readers {
            reader.interrupt();
        }
    }

    /// Stop the device: abort transmission, release pending and queued
    /// slots, and fail every blocked or future read with `Closed`.
    pub fn shutdown(&self) {
        let pool = &self.shared.pool;
        let mut state = self.shared.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let DeviceState {
            hw, transmit, readers, ..
        } = &mut *state;
        let flushed = transmit.flush(hw, pool);
        let mut released = 0;
        for reader in readers.iter_mut() {
            released += pool.drain(&mut reader.queue);
            reader.stats.rx_queue.update(0);
            reader.wake.notify_all();
        }
        info!(device = %state.name, flushed, released, "device shut down");
    }

    pub fn name(&self) -> String {
        self.shared.lock().name.clone()
    }

    pub fn stats(&self) -> DeviceStats {
        let state = self.shared.lock();
        let mut stats = state.stats;
        stats.tx_queue = state.transmit.depth();
        stats
    }

    /// Counters for every open client, keyed by client id.
    pub fn client_stats(&self) -> Vec<(u64, ClientStats)> {
        let state = self.shared.lock();
        state.readers.iter().map(|r| (r.id, r.stats)).collect()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    pub fn transmit_state(&self) -> TransmitState {
        self.shared.lock().transmit.state()
    }

    pub fn client_count(&self) -> usize {
        self.shared.lock().readers.len()
    }
}

impl<H> fmt::Debug for Device<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Device")
            .field("name", &state.name)
            .field("clients", &state.readers.len())
            .field("transmit", &state.transmit.state())
            .field("pool", &self.shared.pool)
            .finish()
    }
}
