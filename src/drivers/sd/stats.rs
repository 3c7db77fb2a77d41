//! SD diagnostics
//!
//! Error counters per operation class and the latency distribution of card
//! busy resolution. Purely observational; nothing in the driver reads them.

use super::command::Command;
use super::state::ErrorCause;

/// Upper bounds (exclusive, microseconds) of the resolve latency buckets;
/// the last bucket collects everything slower
pub const RESOLVE_BUCKETS_US: [u64; 5] = [3_000, 10_000, 30_000, 60_000, 120_000];

/// Error counters of one operation class
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpStats {
    pub timeout: u32,
    pub event_timeout: u32,
    pub crc_failed: u32,
    pub start_bit: u32,
    pub transmit_fifo_underrun: u32,
    pub receive_fifo_overrun: u32,
}

impl OpStats {
    fn count(&mut self, cause: ErrorCause) {
        let counter = match cause {
            ErrorCause::None => return,
            ErrorCause::Timeout => &mut self.timeout,
            ErrorCause::EventTimeout => &mut self.event_timeout,
            ErrorCause::CrcFailed => &mut self.crc_failed,
            ErrorCause::StartBit => &mut self.start_bit,
            ErrorCause::TransmitFifoUnderrun => &mut self.transmit_fifo_underrun,
            ErrorCause::ReceiveFifoOverrun => &mut self.receive_fifo_overrun,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn total(&self) -> u32 {
        self.timeout
            + self.event_timeout
            + self.crc_failed
            + self.start_bit
            + self.transmit_fifo_underrun
            + self.receive_fifo_overrun
    }
}

/// Snapshot of the driver statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub read: OpStats,
    pub write: OpStats,
    pub command: OpStats,

    pub total_read_blocks: u32,
    /// Successful write commands (single or multi-block)
    pub total_written_blocks: u32,
    pub total_commands: u32,

    pub worst_resolve_us: u64,
    pub worst_resolve_retries: u32,
    pub best_resolve_us: u64,
    pub best_resolve_retries: u32,
    pub resolve_time_acc_us: u64,
    pub resolve_count: u32,

    /// Resolve latency histogram, see [`RESOLVE_BUCKETS_US`]
    pub resolve_histogram: [u32; RESOLVE_BUCKETS_US.len() + 1],
}

/// Error causes of the three axes after a command
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub failed: bool,
    pub command: ErrorCause,
    pub transmit: ErrorCause,
    pub receive: ErrorCause,
}

impl Stats {
    pub const fn new() -> Self {
        const ZERO: OpStats = OpStats {
            timeout: 0,
            event_timeout: 0,
            crc_failed: 0,
            start_bit: 0,
            transmit_fifo_underrun: 0,
            receive_fifo_overrun: 0,
        };
        Stats {
            read: ZERO,
            write: ZERO,
            command: ZERO,
            total_read_blocks: 0,
            total_written_blocks: 0,
            total_commands: 0,
            worst_resolve_us: 0,
            worst_resolve_retries: 0,
            best_resolve_us: 0,
            best_resolve_retries: 0,
            resolve_time_acc_us: 0,
            resolve_count: 0,
            resolve_histogram: [0; RESOLVE_BUCKETS_US.len() + 1],
        }
    }

    /// Account one issued command
    ///
    /// A failure is charged to the axis owning the command: reads to the
    /// receive cause, writes to the transmit cause, everything else to the
    /// command cause.
    pub fn record_command(&mut self, cmd: Command, outcome: Outcome) {
        self.total_commands = self.total_commands.saturating_add(1);

        if outcome.failed {
            let (ops, cause) = if cmd.is_read() {
                (&mut self.read, outcome.receive)
            } else if cmd.is_write() {
                (&mut self.write, outcome.transmit)
            } else {
                (&mut self.command, outcome.command)
            };
            ops.count(cause);
        } else if cmd.is_read() {
            self.total_read_blocks = self.total_read_blocks.saturating_add(1);
        } else if cmd.is_write() {
            self.total_written_blocks = self.total_written_blocks.saturating_add(1);
        }
    }

    /// Account one busy resolution that took `elapsed_us` over `retries` polls
    pub fn record_resolve(&mut self, elapsed_us: u64, retries: u32) {
        if elapsed_us > self.worst_resolve_us {
            self.worst_resolve_us = elapsed_us;
            self.worst_resolve_retries = retries;
            if self.best_resolve_us == 0 {
                self.best_resolve_us = elapsed_us;
                self.best_resolve_retries = retries;
            }
        }
        if elapsed_us < self.best_resolve_us {
            self.best_resolve_us = elapsed_us;
            self.best_resolve_retries = retries;
        }
        self.resolve_time_acc_us = self.resolve_time_acc_us.saturating_add(elapsed_us);
        self.resolve_count = self.resolve_count.saturating_add(1);

        let bucket = RESOLVE_BUCKETS_US
            .iter()
            .position(|&bound| elapsed_us < bound)
            .unwrap_or(RESOLVE_BUCKETS_US.len());
        self.resolve_histogram[bucket] += 1;
    }

    /// Mean resolve latency in microseconds
    pub fn mean_resolve_us(&self) -> u64 {
        if self.resolve_count == 0 {
            0
        } else {
            self.resolve_time_acc_us / self.resolve_count as u64
        }
    }
}
