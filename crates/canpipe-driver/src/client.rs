use std::fmt;
use std::sync::{Arc, Condvar, PoisonError};

use canpipe_frame::{decode_message, decode_write, FrameError, Message, FRAME_SIZE, MIN_WRITE_SIZE};
use canpipe_hw::CanController;
use tracing::{debug, trace};

use crate::control::{ControlCommand, ControlReply};
use crate::device::Shared;
use crate::error::{DriverError, Result};
use crate::stats::ClientStats;
use crate::transmit::Submitted;

/// An open client of a [`Device`](crate::Device).
///
/// Reads block until a message arrives; writes never block. Dropping the
/// client unlinks it from the device and frees everything still queued
/// for it.
pub struct Client<H: CanController> {
    id: u64,
    shared: Arc<Shared<H>>,
    wake: Arc<Condvar>,
}

impl<H: CanController> Client<H> {
    pub(crate) fn new(id: u64, shared: Arc<Shared<H>>, wake: Arc<Condvar>) -> Self {
        Self { id, shared, wake }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Start receiving frames and status records.
    pub fn accept_messages(&self) -> Result<()> {
        let mut state = self.shared.lock();
        let reader = state.reader_mut(self.id).ok_or(DriverError::Closed)?;
        reader.accepting = true;
        Ok(())
    }

    /// Block until a record is queued, then copy it into `buf`.
    ///
    /// Fails with [`DriverError::NotAccepting`] before acceptance is enabled,
    /// whatever is queued, and with [`DriverError::BufferTooSmall`] when
    /// `buf` cannot hold one record. Returns [`FRAME_SIZE`]. Every call
    /// counts toward `read_count`, rejected ones included.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let pool = &self.shared.pool;
        let handle = {
            let mut state = self.shared.lock();
            let reader = state.reader_mut(self.id).ok_or(DriverError::Closed)?;
            reader.stats.read_count += 1;
            if !reader.accepting {
                return Err(DriverError::NotAccepting);
            }
            if buf.len() < FRAME_SIZE {
                return Err(DriverError::BufferTooSmall {
                    len: buf.len(),
                    needed: FRAME_SIZE,
                });
            }
            // A cancellation aimed at an earlier read does not carry over.
            if reader.waiters == 0 {
                reader.interrupted = false;
            }
            loop {
                if state.shut_down {
                    return Err(DriverError::Closed);
                }
                let reader = state.reader_mut(self.id).ok_or(DriverError::Closed)?;
                if let Some(handle) = pool.pop_front(&mut reader.queue) {
                    reader.stats.rx_queue.update(reader.queue.len());
                    break handle;
                }
                if reader.interrupted {
                    reader.interrupted = false;
                    return Err(DriverError::Interrupted);
                }
                reader.waiters += 1;
                state = self
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(reader) = state.reader_mut(self.id) {
                    reader.waiters -= 1;
                }
            }
        };

        // Copy out and release with the device lock dropped.
        let loaded = pool.load(&handle);
        let index = handle.index();
        pool.release(handle);
        let record = loaded?;
        buf[..FRAME_SIZE].copy_from_slice(&record);
        trace!(client = self.id, index, "record read");
        Ok(FRAME_SIZE)
    }

    /// Read and decode one record.
    pub fn read_message(&self) -> Result<Message> {
        let mut buf = [0u8; FRAME_SIZE];
        self.read(&mut buf)?;
        Ok(decode_message(&buf)?)
    }

    /// Validate one record and hand it to the transmit coordinator.
    ///
    /// `bytes` may be truncated down to the header plus `DataLength` bytes.
    /// A rejected record changes nothing beyond `write_count`, which counts
    /// every call. Returns the number of bytes taken.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        {
            let mut state = self.shared.lock();
            let reader = state.reader_mut(self.id).ok_or(DriverError::Closed)?;
            reader.stats.write_count += 1;
        }
        if !(MIN_WRITE_SIZE..=FRAME_SIZE).contains(&bytes.len()) {
            return Err(DriverError::Protocol(FrameError::InvalidLength {
                len: bytes.len(),
                min: MIN_WRITE_SIZE,
                max: FRAME_SIZE,
            }));
        }
        let pool = &self.shared.pool;
        let handle = pool.allocate()?;
        let frame = match decode_write(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                pool.release(handle);
                debug!(client = self.id, %err, "write rejected");
                return Err(err.into());
            }
        };
        if let Err(err) = pool.store(&handle, frame.to_record()) {
            pool.release(handle);
            return Err(err.into());
        }

        let submitted = {
            let mut state = self.shared.lock();
            if state.shut_down {
                drop(state);
                pool.release(handle);
                return Err(DriverError::Closed);
            }
            let submitted = {
                let state = &mut *state;
                state.transmit.submit(&mut state.hw, pool, &frame, handle)
            };
            let direct = matches!(submitted, Submitted::Direct(_));
            if direct {
                state.stats.transmitted += 1;
            }
            if let Some(reader) = state.reader_mut(self.id) {
                if direct {
                    reader.stats.transmits_direct += 1;
                } else {
                    reader.stats.transmits_queued += 1;
                }
            }
            submitted
        };

        if let Submitted::Direct(handle) = submitted {
            pool.release(handle);
        }
        Ok(bytes.len())
    }

    /// Cancel a blocked read; it returns [`DriverError::Interrupted`].
    ///
    /// Does nothing when no read is blocked.
    pub fn interrupt(&self) {
        let mut state = self.shared.lock();
        if let Some(reader) = state.reader_mut(self.id) {
            reader.interrupt();
        }
    }

    pub fn control(&self, command: ControlCommand) -> Result<ControlReply> {
        let mut state = self.shared.lock();
        if state.reader(self.id).is_none() {
            return Err(DriverError::Closed);
        }
        debug!(client = self.id, ?command, "control");
        let reply = match command {
            ControlCommand::EnableLoopback => {
                state.hw.set_loopback(true);
                ControlReply::Done
            }
            ControlCommand::DisableLoopback => {
                state.hw.set_loopback(false);
                ControlReply::Done
            }
            ControlCommand::EnableSelfReception => {
                state.hw.set_self_reception(true);
                ControlReply::Done
            }
            ControlCommand::DisableSelfReception => {
                state.hw.set_self_reception(false);
                ControlReply::Done
            }
            ControlCommand::EnableMessageAccept => {
                if let Some(reader) = state.reader_mut(self.id) {
                    reader.accepting = true;
                }
                ControlReply::Done
            }
            ControlCommand::ReadRegister { register } => ControlReply::Register {
                register,
                value: state.hw.read_register(register),
            },
        };
        Ok(reply)
    }

    pub fn stats(&self) -> Result<ClientStats> {
        let state = self.shared.lock();
        state
            .reader(self.id)
            .map(|r| r.stats)
            .ok_or(DriverError::Closed)
    }

    /// Records queued and not yet read.
    pub fn pending(&self) -> usize {
        let state = self.shared.lock();
        state.reader(self.id).map_or(0, |r| r.queue.len())
    }

    pub fn is_accepting(&self) -> bool {
        let state = self.shared.lock();
        state.reader(self.id).is_some_and(|r| r.accepting)
    }

    /// Unlink from the device and free every queued slot.
    pub fn close(self) {
        drop(self);
    }

    fn unlink(&mut self) {
        let entry = {
            let mut state = self.shared.lock();
            let position = state.readers.iter().position(|r| r.id == self.id);
            position.map(|i| state.readers.remove(i))
        };
        let Some(mut entry) = entry else {
            return;
        };
        let queued = entry.queue.len();
        let freed = self.shared.pool.drain(&mut entry.queue);
        debug!(client = self.id, queued, freed, "client closed");
    }
}

impl<H: CanController> Drop for Client<H> {
    fn drop(&mut self) {
        self.unlink();
    }
}

impl<H: CanController> fmt::Debug for Client<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use canpipe_frame::{CanFrame, FrameType};
    use canpipe_hw::{Register, SimController};

    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::Device;
    use crate::transmit::TransmitState;

    fn setup(capacity: usize) -> (Device<SimController>, SimController) {
        let sim = SimController::new();
        let config = DeviceConfig {
            pool_capacity: capacity,
            ..DeviceConfig::default()
        };
        (Device::new(sim.clone(), &config).unwrap(), sim)
    }

    #[test]
    fn read_without_accept_is_rejected_even_with_data() {
        let (device, sim) = setup(8);
        let client = device.open().unwrap();
        sim.inject(CanFrame::standard(1, &[]), 0).unwrap();
        device.handle_interrupt();

        let mut buf = [0u8; FRAME_SIZE];
        assert!(matches!(client.read(&mut buf), Err(DriverError::NotAccepting)));
        let mut small = [0u8; 4];
        assert!(matches!(client.read(&mut small), Err(DriverError::NotAccepting)));
    }

    #[test]
    fn short_buffer_rejected_after_accept() {
        let (device, _sim) = setup(8);
        let client = device.open().unwrap();
        client.accept_messages().unwrap();
        let mut buf = [0u8; FRAME_SIZE - 1];
        assert!(matches!(
            client.read(&mut buf),
            Err(DriverError::BufferTooSmall { len: 19, needed: 20 })
        ));
    }

    #[test]
    fn read_returns_record_and_frees_slot() {
        let (device, sim) = setup(8);
        let client = device.open().unwrap();
        client.accept_messages().unwrap();
        let frame = CanFrame::extended(0x1234_5678, &[1, 2, 3]);
        sim.inject(frame, 7).unwrap();
        device.handle_interrupt();
        assert_eq!(device.pool_stats().in_use, 1);

        let mut buf = [0u8; 32];
        assert_eq!(client.read(&mut buf).unwrap(), FRAME_SIZE);
        assert_eq!(buf[..FRAME_SIZE], frame.to_record());
        assert_eq!(device.pool_stats().in_use, 0);
        assert_eq!(client.stats().unwrap().read_count, 1);
    }

    #[test]
    fn blocked_read_wakes_on_delivery() {
        let (device, sim) = setup(8);
        let client = device.open().unwrap();
        client.accept_messages().unwrap();

        let reader = thread::spawn(move || client.read_message());
        thread::sleep(Duration::from_millis(50));
        sim.inject(CanFrame::standard(0x42, &[9]), 1).unwrap();
        device.handle_interrupt();

        let message = reader.join().unwrap().unwrap();
        assert_eq!(message, Message::Frame(CanFrame::standard(0x42, &[9])));
    }

    #[test]
    fn interrupt_cancels_blocked_read() {
        let (device, _sim) = setup(8);
        let client = Arc::new(device.open().unwrap());
        client.accept_messages().unwrap();

        let blocked = Arc::clone(&client);
        let reader = thread::spawn(move || {
            let mut buf = [0u8; FRAME_SIZE];
            blocked.read(&mut buf)
        });
        while !reader.is_finished() {
            client.interrupt();
            thread::sleep(Duration::from_millis(10));
        }

        let err = reader.join().unwrap().unwrap_err();
        assert!(matches!(err, DriverError::Interrupted));
        assert!(err.is_retryable());
    }

    #[test]
    fn interrupt_without_blocked_read_is_dropped() {
        let (device, sim) = setup(8);
        let client = Arc::new(device.open().unwrap());
        client.accept_messages().unwrap();
        client.interrupt();

        sim.inject(CanFrame::standard(5, &[]), 0).unwrap();
        device.handle_interrupt();
        assert!(client.read_message().is_ok());

        // A later read blocks for data instead of failing.
        let blocked = Arc::clone(&client);
        let reader = thread::spawn(move || blocked.read_message());
        thread::sleep(Duration::from_millis(50));
        sim.inject(CanFrame::standard(6, &[]), 1).unwrap();
        device.handle_interrupt();
        assert_eq!(
            reader.join().unwrap().unwrap(),
            Message::Frame(CanFrame::standard(6, &[]))
        );
    }

    #[test]
    fn write_validation() {
        let (device, sim) = setup(8);
        let client = device.open().unwrap();

        let mut dlc9 = CanFrame::standard(0x10, &[]).to_record();
        dlc9[8..12].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            client.write(&dlc9),
            Err(DriverError::Protocol(FrameError::DataLengthTooLarge(9)))
        ));

        let undefined = CanFrame::new(0x10, FrameType::Undefined, &[]).to_record();
        assert!(matches!(
            client.write(&undefined),
            Err(DriverError::Protocol(FrameError::InvalidType(0)))
        ));

        let reserved = CanFrame::extended(0x2000_0001, &[]).to_record();
        assert!(matches!(
            client.write(&reserved),
            Err(DriverError::Protocol(FrameError::ReservedIdBits(_)))
        ));

        assert!(matches!(
            client.write(&[0u8; 11]),
            Err(DriverError::Protocol(FrameError::InvalidLength { .. }))
        ));

        // Nothing leaked, nothing sent.
        assert_eq!(device.pool_stats().in_use, 0);
        assert!(sim.transmitted().is_empty());
        assert_eq!(device.transmit_state(), TransmitState::Idle);

        let accepted = CanFrame::extended(0x1FFF_FFFF, &[0xAB, 0xCD]);
        let record = accepted.to_record();
        assert_eq!(client.write(&record[..14]).unwrap(), 14);
        assert_eq!(sim.transmitted(), vec![accepted]);
    }

    #[test]
    fn write_reports_exhaustion() {
        let (device, sim) = setup(2);
        let client = device.open().unwrap();
        client.accept_messages().unwrap();
        sim.inject(CanFrame::standard(1, &[]), 0).unwrap();
        sim.inject(CanFrame::standard(2, &[]), 1).unwrap();
        device.handle_interrupt();

        let err = client
            .write(&CanFrame::standard(3, &[]).to_record())
            .unwrap_err();
        assert!(matches!(err, DriverError::PoolExhausted));
        assert!(err.is_retryable());
    }

    #[test]
    fn write_stats_split_direct_and_queued() {
        let (device, _sim) = setup(8);
        let client = device.open().unwrap();
        let record = CanFrame::standard(1, &[]).to_record();
        client.write(&record).unwrap();
        client.write(&record).unwrap();
        client.write(&record).unwrap();

        let stats = client.stats().unwrap();
        assert_eq!(stats.write_count, 3);
        assert_eq!(stats.transmits_direct, 1);
        assert_eq!(stats.transmits_queued, 2);
        assert_eq!(device.pool_stats().in_use, 2);
    }

    #[test]
    fn counters_include_rejected_calls() {
        let (device, _sim) = setup(8);
        let client = device.open().unwrap();
        let mut buf = [0u8; FRAME_SIZE];
        assert!(client.read(&mut buf).is_err());
        assert!(client.write(&[0u8; 3]).is_err());
        let undefined = CanFrame::new(0x10, FrameType::Undefined, &[]).to_record();
        assert!(client.write(&undefined).is_err());

        let stats = client.stats().unwrap();
        assert_eq!(stats.read_count, 1);
        assert_eq!(stats.write_count, 2);
        assert_eq!(stats.transmits_direct + stats.transmits_queued, 0);
    }

    #[test]
    fn close_frees_queued_slots() {
        let (device, sim) = setup(8);
        let client = device.open().unwrap();
        client.accept_messages().unwrap();
        for i in 0..3 {
            sim.inject(CanFrame::standard(i, &[]), i as u16).unwrap();
        }
        device.handle_interrupt();
        assert_eq!(device.pool_stats().in_use, 3);

        client.close();
        assert_eq!(device.pool_stats().in_use, 0);
        assert_eq!(device.client_count(), 0);
    }

    #[test]
    fn control_commands_reach_controller() {
        let (device, sim) = setup(4);
        let client = device.open().unwrap();

        client.control(ControlCommand::EnableLoopback).unwrap();
        assert!(sim.loopback());
        client.control(ControlCommand::DisableSelfReception).unwrap();
        assert!(!sim.self_reception());

        let reply = client
            .control(ControlCommand::ReadRegister {
                register: Register::Ctrl1,
            })
            .unwrap();
        assert_eq!(reply.value(), Some(canpipe_hw::sim::CTRL1_LPB));

        client.control(ControlCommand::DisableLoopback).unwrap();
        client.control(ControlCommand::EnableSelfReception).unwrap();
        assert!(!sim.loopback());
        assert!(sim.self_reception());

        assert!(!client.is_accepting());
        client.control(ControlCommand::EnableMessageAccept).unwrap();
        assert!(client.is_accepting());
    }
}
