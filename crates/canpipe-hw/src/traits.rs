use canpipe_frame::CanFrame;

use crate::registers::Register;

/// Register-level access to one CAN controller.
///
/// Every method is called with the owning device's lock held, so
/// implementations need no synchronization of their own beyond `Send`.
pub trait CanController: Send {
    /// Current error/status register (ESR1).
    fn read_error_status(&mut self) -> u32;

    /// Acknowledge the given error/status bits.
    fn clear_error_status(&mut self, bits: u32);

    /// Both ready-flag words: slots 0..31 and 32..63.
    fn read_ready_flags(&mut self) -> (u32, u32);

    /// Pull the frame out of a receive slot, re-arming the slot.
    ///
    /// Returns the frame and its 16-bit capture timestamp.
    fn drain_receive_slot(&mut self, index: usize) -> (CanFrame, u16);

    /// Free-running 16-bit timer.
    fn read_timer(&mut self) -> u16;

    /// Load the transmit slot and start sending.
    fn transmit(&mut self, frame: &CanFrame);

    /// Abort whatever the transmit slot is sending.
    fn abort_transmit(&mut self);

    fn is_slot_interrupting(&mut self, index: usize) -> bool;

    fn clear_slot_interrupt(&mut self, index: usize);

    fn enable_slot_interrupt(&mut self, index: usize);

    fn disable_slot_interrupt(&mut self, index: usize);

    fn set_loopback(&mut self, enabled: bool);

    fn set_self_reception(&mut self, enabled: bool);

    /// Read-only register mirror for diagnostics.
    fn read_register(&mut self, register: Register) -> u32;
}

impl<C: CanController + ?Sized> CanController for Box<C> {
    fn read_error_status(&mut self) -> u32 {
        (**self).read_error_status()
    }

    fn clear_error_status(&mut self, bits: u32) {
        (**self).clear_error_status(bits)
    }

    fn read_ready_flags(&mut self) -> (u32, u32) {
        (**self).read_ready_flags()
    }

    fn drain_receive_slot(&mut self, index: usize) -> (CanFrame, u16) {
        (**self).drain_receive_slot(index)
    }

    fn read_timer(&mut self) -> u16 {
        (**self).read_timer()
    }

    fn transmit(&mut self, frame: &CanFrame) {
        (**self).transmit(frame)
    }

    fn abort_transmit(&mut self) {
        (**self).abort_transmit()
    }

    fn is_slot_interrupting(&mut self, index: usize) -> bool {
        (**self).is_slot_interrupting(index)
    }

    fn clear_slot_interrupt(&mut self, index: usize) {
        (**self).clear_slot_interrupt(index)
    }

    fn enable_slot_interrupt(&mut self, index: usize) {
        (**self).enable_slot_interrupt(index)
    }

    fn disable_slot_interrupt(&mut self, index: usize) {
        (**self).disable_slot_interrupt(index)
    }

    fn set_loopback(&mut self, enabled: bool) {
        (**self).set_loopback(enabled)
    }

    fn set_self_reception(&mut self, enabled: bool) {
        (**self).set_self_reception(enabled)
    }

    fn read_register(&mut self, register: Register) -> u32 {
        (**self).read_register(register)
    }
}
