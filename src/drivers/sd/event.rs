//! Completion event binding
//!
//! When an RTOS is present, the issuing task blocks on an event set instead
//! of spinning on the timebase. Interrupt handlers raise one of three masks.

/// Event set shared with the scheduler
pub trait CompletionEvent: Sync {
    /// Raise `bits` (callable from interrupt context)
    fn set(&self, bits: u32);

    /// Lower `bits`
    fn clear(&self, bits: u32);

    /// Block until any bit of `mask` is raised or `timeout_ms` elapses
    ///
    /// Returns the raised bits of `mask`, 0 on timeout.
    fn wait_any(&self, mask: u32, timeout_ms: u64) -> u32;

    /// Give the processor to other tasks for one scheduling round
    fn yield_now(&self);
}

/// A registered event with its three disjoint masks
#[derive(Clone, Copy)]
pub struct EventBinding {
    pub event: &'static dyn CompletionEvent,
    /// Raised when a command without data phase completes
    pub command_done: u32,
    /// Raised when a data transfer (or its stop command) completes
    pub transfer_done: u32,
    /// Raised on any failure
    pub error: u32,
}

impl EventBinding {
    pub fn all(&self) -> u32 {
        self.command_done | self.transfer_done | self.error
    }

    /// Masks must be non-empty and pairwise disjoint
    pub fn masks_valid(&self) -> bool {
        self.command_done != 0
            && self.transfer_done != 0
            && self.error != 0
            && self.command_done & self.transfer_done == 0
            && self.command_done & self.error == 0
            && self.transfer_done & self.error == 0
    }

    pub fn signal_command(&self, failed: bool) {
        self.event
            .set(if failed { self.error } else { self.command_done });
    }

    pub fn signal_transfer(&self, failed: bool) {
        self.event
            .set(if failed { self.error } else { self.transfer_done });
    }
}
