//! Interrupt controller interface
//!
//! The board's vectored interrupt controller routes each source to a plain
//! function handler at a priority. Drivers only install, enable and disable
//! their own sources through this trait.

/// Interrupt source number on the main interrupt controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrqSource(pub u8);

/// Number of interrupt sources handled by the controller
pub const NUM_SOURCES: usize = 32;

/// Interrupt handler entry point
pub type Handler = fn();

/// Trigger mode of an interrupt source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Keep the controller's current setting
    Fixed,
    LowLevel,
    HighLevel,
    NegativeEdge,
    PositiveEdge,
    DualEdge,
}

/// Interrupt controller operations used by drivers
pub trait InterruptController: Sync {
    /// Route `source` to `handler`
    ///
    /// `fast` requests FIQ delivery instead of IRQ. Installing over an
    /// existing handler replaces it.
    fn install_handler(
        &self,
        source: IrqSource,
        priority: u8,
        fast: bool,
        trigger: Trigger,
        handler: Handler,
    );

    /// Unmask `source`
    fn enable(&self, source: IrqSource);

    /// Mask `source`
    fn disable(&self, source: IrqSource);
}
