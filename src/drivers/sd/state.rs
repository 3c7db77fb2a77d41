//! Command, transmit and receive state machines
//!
//! The three axes move independently: the command axis follows the command
//! path interrupt, the transmit and receive axes follow the data interrupt.
//! Each state is kept in an [`AtomicCell`] so interrupt handlers and the
//! issuing context share it without locks.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU8, Ordering};

/// Compact encoding of a small `Copy` type into a byte
pub trait Encode: Copy {
    fn encode(self) -> u8;
    fn decode(raw: u8) -> Self;
}

/// Lock-free cell holding an [`Encode`] value
pub struct AtomicCell<T: Encode> {
    raw: AtomicU8,
    _marker: PhantomData<T>,
}

impl<T: Encode> AtomicCell<T> {
    pub const fn from_raw(raw: u8) -> Self {
        Self {
            raw: AtomicU8::new(raw),
            _marker: PhantomData,
        }
    }

    pub fn load(&self) -> T {
        T::decode(self.raw.load(Ordering::Acquire))
    }

    pub fn store(&self, value: T) {
        self.raw.store(value.encode(), Ordering::Release)
    }
}

// ============================================================================
// Error Causes
// ============================================================================

/// Cause of the last failure on one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCause {
    None,
    /// Hardware reported a command or data timeout
    Timeout,
    /// No hardware result within the software wait budget
    EventTimeout,
    /// Response or data CRC mismatch
    CrcFailed,
    /// Malformed start bit on a received block
    StartBit,
    TransmitFifoUnderrun,
    ReceiveFifoOverrun,
}

impl Encode for ErrorCause {
    fn encode(self) -> u8 {
        match self {
            ErrorCause::None => 0,
            ErrorCause::Timeout => 1,
            ErrorCause::EventTimeout => 2,
            ErrorCause::CrcFailed => 3,
            ErrorCause::StartBit => 4,
            ErrorCause::TransmitFifoUnderrun => 5,
            ErrorCause::ReceiveFifoOverrun => 6,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            1 => ErrorCause::Timeout,
            2 => ErrorCause::EventTimeout,
            3 => ErrorCause::CrcFailed,
            4 => ErrorCause::StartBit,
            5 => ErrorCause::TransmitFifoUnderrun,
            6 => ErrorCause::ReceiveFifoOverrun,
            _ => ErrorCause::None,
        }
    }
}

// ============================================================================
// Command Axis
// ============================================================================

/// State of the command path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    /// Command without data phase in flight
    PendingNormal,
    /// Read command in flight
    PendingRead,
    /// Write command in flight
    PendingWrite,
    Error,
}

impl CommandState {
    /// State right after issuing a command with the given data direction
    pub fn issued(read: bool, write: bool) -> Self {
        if write {
            CommandState::PendingWrite
        } else if read {
            CommandState::PendingRead
        } else {
            CommandState::PendingNormal
        }
    }

    /// State after the command path interrupt
    pub fn completed(failed: bool) -> Self {
        if failed {
            CommandState::Error
        } else {
            CommandState::Idle
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CommandState::Idle | CommandState::Error)
    }
}

impl Encode for CommandState {
    fn encode(self) -> u8 {
        match self {
            CommandState::Idle => 0,
            CommandState::PendingNormal => 1,
            CommandState::PendingRead => 2,
            CommandState::PendingWrite => 3,
            CommandState::Error => 4,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            1 => CommandState::PendingNormal,
            2 => CommandState::PendingRead,
            3 => CommandState::PendingWrite,
            4 => CommandState::Error,
            _ => CommandState::Idle,
        }
    }
}

// ============================================================================
// Transmit Axis
// ============================================================================

/// State of the write data path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitState {
    Idle,
    /// Armed by a write command, data not flowing yet
    Started,
    Transferring,
    /// Data sent, stop transmission in flight
    Stopping,
    /// Data failed, stop transmission in flight
    StoppingFromError,
    Error,
}

impl TransmitState {
    /// State after the data path finished or failed
    ///
    /// Multi-block writes park in a stopping state until the stop
    /// transmission command completes.
    pub fn data_finished(failed: bool, multi_block: bool) -> Self {
        match (multi_block, failed) {
            (true, false) => TransmitState::Stopping,
            (true, true) => TransmitState::StoppingFromError,
            (false, false) => TransmitState::Idle,
            (false, true) => TransmitState::Error,
        }
    }

    /// State after the stop transmission command completed
    pub fn stop_completed(self) -> Self {
        match self {
            TransmitState::StoppingFromError => TransmitState::Error,
            _ => TransmitState::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransmitState::Idle | TransmitState::Error)
    }
}

impl Encode for TransmitState {
    fn encode(self) -> u8 {
        match self {
            TransmitState::Idle => 0,
            TransmitState::Started => 1,
            TransmitState::Transferring => 2,
            TransmitState::Stopping => 3,
            TransmitState::StoppingFromError => 4,
            TransmitState::Error => 5,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            1 => TransmitState::Started,
            2 => TransmitState::Transferring,
            3 => TransmitState::Stopping,
            4 => TransmitState::StoppingFromError,
            5 => TransmitState::Error,
            _ => TransmitState::Idle,
        }
    }
}

// ============================================================================
// Receive Axis
// ============================================================================

/// State of the read data path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Idle,
    /// Armed by a read command, data not flowing yet
    Started,
    Transferring,
    Error,
}

impl ReceiveState {
    pub fn data_finished(failed: bool) -> Self {
        if failed {
            ReceiveState::Error
        } else {
            ReceiveState::Idle
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReceiveState::Idle | ReceiveState::Error)
    }
}

impl Encode for ReceiveState {
    fn encode(self) -> u8 {
        match self {
            ReceiveState::Idle => 0,
            ReceiveState::Started => 1,
            ReceiveState::Transferring => 2,
            ReceiveState::Error => 3,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            1 => ReceiveState::Started,
            2 => ReceiveState::Transferring,
            3 => ReceiveState::Error,
            _ => ReceiveState::Idle,
        }
    }
}

/// Snapshot of the three axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTriple {
    pub command: CommandState,
    pub transmit: TransmitState,
    pub receive: ReceiveState,
}

impl StateTriple {
    pub const IDLE: StateTriple = StateTriple {
        command: CommandState::Idle,
        transmit: TransmitState::Idle,
        receive: ReceiveState::Idle,
    };

    /// Any axis in its error state
    pub fn is_error(&self) -> bool {
        self.command == CommandState::Error
            || self.transmit == TransmitState::Error
            || self.receive == ReceiveState::Error
    }
}

/// Per-axis cells of the controller
pub struct AxisStates {
    pub command: AtomicCell<CommandState>,
    pub transmit: AtomicCell<TransmitState>,
    pub receive: AtomicCell<ReceiveState>,
    pub command_error: AtomicCell<ErrorCause>,
    pub transmit_error: AtomicCell<ErrorCause>,
    pub receive_error: AtomicCell<ErrorCause>,
}

impl AxisStates {
    pub const fn new() -> Self {
        Self {
            command: AtomicCell::from_raw(0),
            transmit: AtomicCell::from_raw(0),
            receive: AtomicCell::from_raw(0),
            command_error: AtomicCell::from_raw(0),
            transmit_error: AtomicCell::from_raw(0),
            receive_error: AtomicCell::from_raw(0),
        }
    }

    pub fn snapshot(&self) -> StateTriple {
        StateTriple {
            command: self.command.load(),
            transmit: self.transmit.load(),
            receive: self.receive.load(),
        }
    }

    /// Put all three state machines back to idle
    pub fn reset_states(&self) {
        self.command.store(CommandState::Idle);
        self.transmit.store(TransmitState::Idle);
        self.receive.store(ReceiveState::Idle);
    }

    /// Forget the causes of the previous command
    pub fn clear_errors(&self) {
        self.command_error.store(ErrorCause::None);
        self.transmit_error.store(ErrorCause::None);
        self.receive_error.store(ErrorCause::None);
    }

    pub fn fail_command(&self, cause: ErrorCause) {
        self.command_error.store(cause);
        self.command.store(CommandState::Error);
    }

    pub fn fail_transmit(&self, cause: ErrorCause) {
        self.transmit_error.store(cause);
        self.transmit.store(TransmitState::Error);
    }

    pub fn fail_receive(&self, cause: ErrorCause) {
        self.receive_error.store(cause);
        self.receive.store(ReceiveState::Error);
    }

    pub fn is_error(&self) -> bool {
        self.snapshot().is_error()
    }
}
