use std::sync::{Arc, Mutex, MutexGuard};

use canpipe_frame::CanFrame;
use tracing::{debug, trace};

use crate::error::{HwError, Result};
use crate::registers::{slot_flag, Register, FIRST_RX_SLOT, NUM_MESSAGE_BUFFERS, TX_SLOT};
use crate::traits::CanController;

/// Self-reception disable bit in MCR.
pub const MCR_SRX_DIS: u32 = 0x0002_0000;
/// Loopback enable bit in CTRL1.
pub const CTRL1_LPB: u32 = 0x0000_1000;

/// In-memory controller.
///
/// Clones share the same state: hand one clone to the device and keep
/// another to inject traffic, raise errors and complete transmissions.
#[derive(Clone, Default)]
pub struct SimController {
    inner: Arc<Mutex<SimState>>,
}

struct SimState {
    slots: [Option<(CanFrame, u16)>; NUM_MESSAGE_BUFFERS],
    iflags: u64,
    imask: u64,
    timer: u16,
    esr1: u32,
    mcr: u32,
    ctrl1: u32,
    in_flight: Option<CanFrame>,
    transmitted: Vec<CanFrame>,
    aborts: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            slots: [None; NUM_MESSAGE_BUFFERS],
            iflags: 0,
            imask: 0,
            timer: 0,
            esr1: 0,
            mcr: 0,
            ctrl1: 0,
            in_flight: None,
            transmitted: Vec::new(),
            aborts: 0,
        }
    }
}

impl SimState {
    fn set_flag(&mut self, index: usize) {
        self.iflags |= 1u64 << index;
    }

    fn clear_flag(&mut self, index: usize) {
        self.iflags &= !(1u64 << index);
    }

    fn latch(&mut self, index: usize, frame: CanFrame, timestamp: u16) {
        self.slots[index] = Some((frame, timestamp));
        self.set_flag(index);
    }

    fn free_rx_slot(&self) -> Option<usize> {
        (FIRST_RX_SLOT..NUM_MESSAGE_BUFFERS).find(|&i| self.slots[i].is_none())
    }
}

impl SimController {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // Poisoning is ignored; the register state stays readable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Latch a frame into the lowest free receive slot.
    pub fn inject(&self, frame: CanFrame, timestamp: u16) -> Result<usize> {
        let mut state = self.state();
        let index = state.free_rx_slot().ok_or(HwError::NoFreeSlot)?;
        state.latch(index, frame, timestamp);
        trace!(index, timestamp, id = frame.id, "sim: frame latched");
        Ok(index)
    }

    /// Latch a frame into a specific receive slot.
    pub fn inject_at(&self, index: usize, frame: CanFrame, timestamp: u16) -> Result<()> {
        if !(FIRST_RX_SLOT..NUM_MESSAGE_BUFFERS).contains(&index) {
            return Err(HwError::InvalidSlot(index));
        }
        let mut state = self.state();
        if state.slots[index].is_some() {
            return Err(HwError::SlotOccupied(index));
        }
        state.latch(index, frame, timestamp);
        Ok(())
    }

    /// Receive slots currently holding an undrained frame.
    pub fn pending_receive(&self) -> usize {
        let state = self.state();
        state.slots[FIRST_RX_SLOT..]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub fn set_timer(&self, value: u16) {
        self.state().timer = value;
    }

    pub fn advance_timer(&self, ticks: u16) {
        let mut state = self.state();
        state.timer = state.timer.wrapping_add(ticks);
    }

    /// Assert error/status register bits.
    pub fn raise_error(&self, bits: u32) {
        self.state().esr1 |= bits;
    }

    pub fn error_status(&self) -> u32 {
        self.state().esr1
    }

    /// Finish the in-flight transmission and flag the transmit slot.
    ///
    /// In loopback mode the frame is also latched into a free receive slot.
    pub fn complete_transmit(&self) -> Option<CanFrame> {
        let mut state = self.state();
        let frame = state.in_flight.take()?;
        state.set_flag(TX_SLOT);
        if state.ctrl1 & CTRL1_LPB != 0 {
            let timestamp = state.timer;
            match state.free_rx_slot() {
                Some(index) => state.latch(index, frame, timestamp),
                None => debug!("sim: loopback frame dropped, receive slots full"),
            }
        }
        Some(frame)
    }

    /// Frame currently loaded in the transmit slot.
    pub fn in_flight(&self) -> Option<CanFrame> {
        self.state().in_flight
    }

    /// Every frame handed to [`CanController::transmit`], oldest first.
    pub fn transmitted(&self) -> Vec<CanFrame> {
        self.state().transmitted.clone()
    }

    pub fn abort_count(&self) -> usize {
        self.state().aborts
    }

    pub fn slot_interrupt_enabled(&self, index: usize) -> bool {
        self.state().imask & (1u64 << index) != 0
    }

    pub fn loopback(&self) -> bool {
        self.state().ctrl1 & CTRL1_LPB != 0
    }

    pub fn self_reception(&self) -> bool {
        self.state().mcr & MCR_SRX_DIS == 0
    }
}

impl CanController for SimController {
    fn read_error_status(&mut self) -> u32 {
        self.state().esr1
    }

    fn clear_error_status(&mut self, bits: u32) {
        self.state().esr1 &= !bits;
    }

    fn read_ready_flags(&mut self) -> (u32, u32) {
        let flags = self.state().iflags;
        (flags as u32, (flags >> 32) as u32)
    }

    fn drain_receive_slot(&mut self, index: usize) -> (CanFrame, u16) {
        let mut state = self.state();
        state.clear_flag(index);
        let timer = state.timer;
        state.slots[index].take().unwrap_or((CanFrame::default(), timer))
    }

    fn read_timer(&mut self) -> u16 {
        self.state().timer
    }

    fn transmit(&mut self, frame: &CanFrame) {
        let mut state = self.state();
        state.clear_flag(TX_SLOT);
        state.in_flight = Some(*frame);
        state.transmitted.push(*frame);
    }

    fn abort_transmit(&mut self) {
        let mut state = self.state();
        state.in_flight = None;
        state.clear_flag(TX_SLOT);
        state.aborts += 1;
    }

    fn is_slot_interrupting(&mut self, index: usize) -> bool {
        let (word, bit) = slot_flag(index);
        let (iflag1, iflag2) = self.read_ready_flags();
        let flags = if word == 0 { iflag1 } else { iflag2 };
        flags & bit != 0
    }

    fn clear_slot_interrupt(&mut self, index: usize) {
        self.state().clear_flag(index);
    }

    fn enable_slot_interrupt(&mut self, index: usize) {
        self.state().imask |= 1u64 << index;
    }

    fn disable_slot_interrupt(&mut self, index: usize) {
        self.state().imask &= !(1u64 << index);
    }

    fn set_loopback(&mut self, enabled: bool) {
        let mut state = self.state();
        if enabled {
            state.ctrl1 |= CTRL1_LPB;
        } else {
            state.ctrl1 &= !CTRL1_LPB;
        }
    }

    fn set_self_reception(&mut self, enabled: bool) {
        let mut state = self.state();
        if enabled {
            state.mcr &= !MCR_SRX_DIS;
        } else {
            state.mcr |= MCR_SRX_DIS;
        }
    }

    fn read_register(&mut self, register: Register) -> u32 {
        let state = self.state();
        match register {
            Register::Mcr => state.mcr,
            Register::Ctrl1 => state.ctrl1,
            Register::Timer => u32::from(state.timer),
            Register::Esr1 => state.esr1,
            Register::Imask1 => state.imask as u32,
            Register::Imask2 => (state.imask >> 32) as u32,
            Register::Iflag1 => state.iflags as u32,
            Register::Iflag2 => (state.iflags >> 32) as u32,
            Register::Ecr | Register::Ctrl2 | Register::Esr2 | Register::Gfwr => 0,
        }
    }
}

impl std::fmt::Debug for SimController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimController")
            .field("iflags", &format_args!("{:#018x}", state.iflags))
            .field("timer", &state.timer)
            .field("esr1", &format_args!("{:#010x}", state.esr1))
            .field("in_flight", &state.in_flight.is_some())
            .finish()
    }
}
