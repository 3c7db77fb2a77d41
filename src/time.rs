//! Timebase seam and timeout helper
//!
//! The SD driver measures every wait against a monotonic counter provided by
//! the board (the LPC3230 high speed timer in firmware). Nothing here blocks;
//! callers poll [`Timeout::is_expired`] in their own loops.

/// Monotonic time source
pub trait Timebase {
    /// Current value of the monotonic counter
    fn now(&self) -> u64;

    /// Convert a tick delta to microseconds
    fn ticks_to_micros(&self, ticks: u64) -> u64;

    /// Convert a tick delta to milliseconds
    fn ticks_to_millis(&self, ticks: u64) -> u64 {
        self.ticks_to_micros(ticks) / 1000
    }

    /// Frequency of the clock feeding the peripherals (the SD block divides it
    /// down to the card clock)
    fn peripheral_clock_hz(&self) -> u32;
}

/// A deadline measured on a [`Timebase`]
///
/// The deadline is exceeded once strictly more than `limit_ms` milliseconds
/// have elapsed since creation.
pub struct Timeout<'a, T: Timebase + ?Sized> {
    clock: &'a T,
    start: u64,
    limit_ms: u64,
}

impl<'a, T: Timebase + ?Sized> Timeout<'a, T> {
    /// Start a deadline `ms` milliseconds from now
    pub fn from_ms(clock: &'a T, ms: u64) -> Self {
        Self {
            clock,
            start: clock.now(),
            limit_ms: ms,
        }
    }

    /// Milliseconds elapsed since the deadline was started
    pub fn elapsed_ms(&self) -> u64 {
        self.clock
            .ticks_to_millis(self.clock.now().wrapping_sub(self.start))
    }

    /// Microseconds elapsed since the deadline was started
    pub fn elapsed_us(&self) -> u64 {
        self.clock
            .ticks_to_micros(self.clock.now().wrapping_sub(self.start))
    }

    /// Check whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.elapsed_ms() > self.limit_ms
    }

    /// The configured limit in milliseconds
    pub fn limit_ms(&self) -> u64 {
        self.limit_ms
    }
}
