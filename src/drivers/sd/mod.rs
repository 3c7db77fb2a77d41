//! SD Card Driver
//!
//! This module drives SD cards on the LPC3230 SD card interface (an ARM PL180
//! multimedia card interface). It is fully interrupt driven: every command
//! completes through the command interrupt, and reads and writes move data
//! through the data interrupt, either by programmed I/O on the FIFO or by the
//! DMA engine.
//!
//! Exactly one controller may exist per board. It lives in a `static` and
//! binds itself to a global handle on [`SdController::init`] so the interrupt
//! entry points can reach it. Calls must come from a single owning context:
//! only one command or transfer is ever in flight.

pub mod command;
pub mod csd;
pub mod event;
pub mod regs;
pub mod state;
pub mod stats;

mod bringup;
mod dma;
mod engine;
mod pio;
mod receive;
mod resolve;
mod transmit;

#[cfg(test)]
mod sim;

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use spin::{Mutex, Once};

use crate::arch::arm926ejs::cache;
use crate::board::{self, BLOCK_SIZE, MAX_TRANSFER_BLOCKS};
use crate::drivers::dma::DmaEngine;
use crate::drivers::interrupt::{InterruptController, IrqSource};
use crate::time::{Timebase, Timeout};

use command::Command;
use event::{CompletionEvent, EventBinding};
use regs::{RegisterBus, SdRegisters, STATUS};
use state::{AtomicCell, AxisStates, ErrorCause, StateTriple};
use stats::Stats;

/// Card clock during identification (400 kHz)
const INIT_CLOCK_HZ: u32 = 400_000;

/// Fastest card clock sustained when the CPU copies the data
const PIO_CLOCK_HZ: u32 = 1_000_000;

/// Fastest card clock sustained with DMA transfers
const DMA_CLOCK_HZ: u32 = 45_000_000;

/// Software wait budget per command (and per block of a multi-block write)
const COMMAND_TIMEOUT_MS: u64 = 100;

/// Upper bound on card busy resolution after a write
const RESOLVE_TIMEOUT_MS: u64 = 1000;

/// Default data timer before the CSD is known (about 40 ms at 50 MHz)
const DEFAULT_DATA_TIMER: u32 = 0x001F_FFFF;

/// Size of the read-back scratch buffer
const SCRATCH_LEN: usize = BLOCK_SIZE * MAX_TRANSFER_BLOCKS;

/// SD driver error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// No card answered during bring-up (the interface is powered down)
    NoCard,
    /// Another controller already owns the interrupt handle
    AlreadyBound,
    /// Block count is zero or above the configured maximum
    InvalidBlockCount,
    /// Buffer shorter than the requested blocks
    BufferTooSmall,
    /// DMA transfers need a word aligned buffer
    MisalignedBuffer,
    /// Command path failure
    Command(ErrorCause),
    /// Write data path failure
    Transmit(ErrorCause),
    /// Read data path failure
    Receive(ErrorCause),
    /// Read-back verification found different data at `offset`
    ConsistencyMismatch { offset: usize },
}

/// How data moves between memory and the FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPath {
    /// The CPU copies words in the data interrupt
    Pio,
    /// The DMA engine copies words, the data interrupt only sees the end
    Dma {
        receive_channel: u8,
        transmit_channel: u8,
    },
}

impl DataPath {
    pub fn is_dma(self) -> bool {
        matches!(self, DataPath::Dma { .. })
    }
}

/// Driver configuration, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdConfig {
    pub data_path: DataPath,
    /// Read every transfer back and compare before reporting success
    pub consistency_check: bool,
    /// Maintain [`Stats`]
    pub collect_stats: bool,
    /// Largest accepted multi-block write (at most [`MAX_TRANSFER_BLOCKS`])
    pub max_transfer_blocks: u32,
    /// Card clock after identification
    pub transfer_clock_hz: u32,
}

impl SdConfig {
    /// Configuration selected by the crate features
    pub const fn from_features() -> Self {
        let data_path = if cfg!(feature = "sd-dma") {
            DataPath::Dma {
                receive_channel: board::SD_DMA_RECEIVE_CHANNEL,
                transmit_channel: board::SD_DMA_TRANSMIT_CHANNEL,
            }
        } else {
            DataPath::Pio
        };
        Self::new(data_path)
    }

    /// Configuration for `data_path` with the rate it sustains
    pub const fn new(data_path: DataPath) -> Self {
        let transfer_clock_hz = match data_path {
            DataPath::Pio => PIO_CLOCK_HZ,
            DataPath::Dma { .. } => DMA_CLOCK_HZ,
        };
        Self {
            data_path,
            consistency_check: cfg!(feature = "sd-consistency"),
            collect_stats: cfg!(feature = "sd-stats"),
            max_transfer_blocks: MAX_TRANSFER_BLOCKS as u32,
            transfer_clock_hz,
        }
    }
}

impl Default for SdConfig {
    fn default() -> Self {
        Self::from_features()
    }
}

/// Board collaborators of the SD controller
pub trait Platform: 'static {
    type Bus: RegisterBus;
    type Irq: InterruptController;
    type Dma: DmaEngine;
    type Clock: Timebase + Sync;

    const SD_BASE: usize = board::SD_BASE;
    const MS_CTRL: usize = board::SD_MS_CTRL;
    const COMMAND_IRQ: IrqSource = board::SD_COMMAND_IRQ;
    const DATA_IRQ: IrqSource = board::SD_DATA_IRQ;
}

/// Result of [`SdController::issue_command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub states: StateTriple,
    /// Response words, word 0 holding the most significant bits
    pub response: [u32; 4],
}

/// Word aligned scratch area for read-back verification
#[repr(C, align(32))]
struct Scratch([u8; SCRATCH_LEN]);

/// SD Card Controller
pub struct SdController<P: Platform> {
    regs: SdRegisters<P::Bus>,
    irq: P::Irq,
    dma: P::Dma,
    clock: P::Clock,
    config: SdConfig,

    axes: AxisStates,
    current_command: AtomicCell<Command>,
    /// Command before the current one, never a status poll
    last_command: AtomicCell<Command>,
    last_transmit_error: AtomicCell<ErrorCause>,
    last_command_error: AtomicCell<ErrorCause>,
    response: [AtomicU32; 4],

    /// Next byte of the caller's buffer the data interrupt touches
    data: AtomicPtr<u8>,
    to_send: AtomicUsize,
    to_receive: AtomicUsize,
    /// Set by every write, cleared once the card left its busy state
    unknown_transmit_status: AtomicBool,

    inserted: AtomicBool,
    rca: AtomicU16,
    clock_rate: AtomicU32,
    worst_case_timeout: AtomicU32,
    num_blocks: AtomicU32,
    data_priority: AtomicU8,

    event: Once<EventBinding>,
    stats: Mutex<Stats>,
    scratch: Mutex<Scratch>,
}

// ============================================================================
// Global Handle
// ============================================================================

/// Controller reachable from the interrupt entry points
static ACTIVE: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

fn active<P: Platform>() -> Option<&'static SdController<P>> {
    let ptr = ACTIVE.load(Ordering::Acquire) as *const SdController<P>;
    // SAFETY: ACTIVE only ever holds a `&'static SdController<P>` stored by
    // `bind`, and the entry points are only installed by that controller.
    unsafe { ptr.as_ref() }
}

fn command_trampoline<P: Platform>() {
    if let Some(sd) = active::<P>() {
        sd.command_isr();
    }
}

fn transmit_trampoline<P: Platform>() {
    if let Some(sd) = active::<P>() {
        sd.transmit_isr();
    }
}

fn receive_trampoline<P: Platform>() {
    if let Some(sd) = active::<P>() {
        sd.receive_isr();
    }
}

impl<P: Platform> SdController<P> {
    /// Create an unbound controller
    pub const fn new(bus: P::Bus, irq: P::Irq, dma: P::Dma, clock: P::Clock, config: SdConfig) -> Self {
        let mut config = config;
        if config.max_transfer_blocks > MAX_TRANSFER_BLOCKS as u32 {
            config.max_transfer_blocks = MAX_TRANSFER_BLOCKS as u32;
        }
        Self {
            regs: SdRegisters::new(bus, P::SD_BASE, P::MS_CTRL),
            irq,
            dma,
            clock,
            config,
            axes: AxisStates::new(),
            current_command: AtomicCell::from_raw(0),
            last_command: AtomicCell::from_raw(0),
            last_transmit_error: AtomicCell::from_raw(0),
            last_command_error: AtomicCell::from_raw(0),
            response: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            data: AtomicPtr::new(ptr::null_mut()),
            to_send: AtomicUsize::new(0),
            to_receive: AtomicUsize::new(0),
            unknown_transmit_status: AtomicBool::new(false),
            inserted: AtomicBool::new(false),
            rca: AtomicU16::new(0),
            clock_rate: AtomicU32::new(0),
            worst_case_timeout: AtomicU32::new(0),
            num_blocks: AtomicU32::new(0),
            data_priority: AtomicU8::new(0),
            event: Once::new(),
            stats: Mutex::new(Stats::new()),
            scratch: Mutex::new(Scratch([0; SCRATCH_LEN])),
        }
    }

    fn bind(&'static self) -> Result<(), SdError> {
        let me = self as *const Self as *mut ();
        match ACTIVE.compare_exchange(ptr::null_mut(), me, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(()),
            Err(current) if current == me => Ok(()),
            Err(_) => Err(SdError::AlreadyBound),
        }
    }

    /// Detach from the interrupt entry points and mask both SD interrupts
    pub fn release(&'static self) {
        self.irq.disable(P::COMMAND_IRQ);
        self.irq.disable(P::DATA_IRQ);
        let me = self as *const Self as *mut ();
        let _ = ACTIVE.compare_exchange(me, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
    }

    /// Bring up the interface and the card
    ///
    /// Binds the controller to the interrupt entry points, installs the
    /// command interrupt at `command_priority` (`fast` selects FIQ) and
    /// remembers `data_priority` for the per-transfer data interrupt.
    /// A card that never finishes power-up leaves the interface powered down
    /// and yields [`SdError::NoCard`].
    pub fn init(&'static self, command_priority: u8, data_priority: u8, fast: bool) -> Result<(), SdError> {
        self.bind()?;
        self.data_priority.store(data_priority, Ordering::Relaxed);
        self.bring_up(command_priority, fast)
    }

    /// Wait on `event` instead of spinning on the timebase
    ///
    /// The three masks must be non-empty and disjoint. Only the first
    /// registration takes effect.
    pub fn set_completion_event(
        &self,
        event: &'static dyn CompletionEvent,
        command_done: u32,
        transfer_done: u32,
        error: u32,
    ) {
        let binding = EventBinding {
            event,
            command_done,
            transfer_done,
            error,
        };
        if !binding.masks_valid() {
            log::warn!("SD: ignoring completion event with overlapping masks");
            return;
        }
        if self.event.is_completed() {
            log::warn!("SD: completion event already registered");
            return;
        }
        self.event.call_once(|| binding);
    }

    // ========================================================================
    // Block Operations
    // ========================================================================

    /// Read block `block` into the first 512 bytes of `buffer`
    pub fn read_block(&self, block: u32, buffer: &mut [u8]) -> Result<(), SdError> {
        let buffer = buffer.get_mut(..BLOCK_SIZE).ok_or(SdError::BufferTooSmall)?;
        self.check_transfer(buffer.as_ptr())?;

        self.receive_block(block, buffer)?;

        if self.config.consistency_check {
            let mut scratch = self.scratch.lock();
            let verify = &mut scratch.0[..BLOCK_SIZE];
            self.receive_block(block, verify)?;
            if let Some(offset) = first_difference(buffer, verify) {
                log::error!("SD: read of block {} not reproducible at offset {}", block, offset);
                return Err(SdError::ConsistencyMismatch { offset });
            }
        }
        Ok(())
    }

    /// Write `block_count` blocks from `buffer` starting at `start_block`
    pub fn write_block(&self, start_block: u32, buffer: &[u8], block_count: u32) -> Result<(), SdError> {
        if block_count == 0 || block_count > self.config.max_transfer_blocks {
            return Err(SdError::InvalidBlockCount);
        }
        let len = block_count as usize * BLOCK_SIZE;
        let buffer = buffer.get(..len).ok_or(SdError::BufferTooSmall)?;
        self.check_transfer(buffer.as_ptr())?;

        self.data.store(buffer.as_ptr() as *mut u8, Ordering::Release);
        self.to_send.store(len, Ordering::Release);
        if self.config.data_path.is_dma() {
            cache::force_cache_coherence(buffer);
        }

        let cmd = if block_count == 1 {
            Command::WriteSingle
        } else {
            Command::WriteMultiple
        };
        self.issue(cmd, start_block.wrapping_mul(BLOCK_SIZE as u32));

        if let Some(err) = self.failure() {
            self.last_transmit_error.store(self.axes.transmit_error.load());
            self.last_command_error.store(self.axes.command_error.load());
            log::debug!("SD: write of {} block(s) at {} failed: {:?}", block_count, start_block, err);
            return Err(err);
        }

        if self.config.consistency_check {
            let mut scratch = self.scratch.lock();
            let verify = &mut scratch.0[..len];
            for (index, chunk) in verify.chunks_exact_mut(BLOCK_SIZE).enumerate() {
                self.receive_block(start_block.wrapping_add(index as u32), chunk)?;
            }
            if let Some(offset) = first_difference(buffer, verify) {
                log::error!("SD: write at block {} did not stick at offset {}", start_block, offset);
                return Err(SdError::ConsistencyMismatch { offset });
            }
        }
        Ok(())
    }

    fn check_transfer(&self, buffer: *const u8) -> Result<(), SdError> {
        if self.config.data_path.is_dma() && (buffer as usize) % 4 != 0 {
            return Err(SdError::MisalignedBuffer);
        }
        if !self.card_inserted() {
            return Err(SdError::NoCard);
        }
        Ok(())
    }

    /// One read command into a 512-byte buffer
    fn receive_block(&self, block: u32, buffer: &mut [u8]) -> Result<(), SdError> {
        self.regs.flush_receive_fifo();

        self.data.store(buffer.as_mut_ptr(), Ordering::Release);
        self.to_receive.store(buffer.len(), Ordering::Release);
        if self.config.data_path.is_dma() {
            cache::force_cache_coherence(buffer);
        }

        self.issue(Command::ReadSingle, block.wrapping_mul(BLOCK_SIZE as u32));

        if self.config.data_path.is_dma() {
            cache::force_cache_coherence(buffer);
        }
        match self.failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The error of the axis that failed, if any
    fn failure(&self) -> Option<SdError> {
        let states = self.axes.snapshot();
        if !states.is_error() {
            return None;
        }
        let err = if states.transmit == state::TransmitState::Error {
            SdError::Transmit(self.axes.transmit_error.load())
        } else if states.receive == state::ReceiveState::Error {
            SdError::Receive(self.axes.receive_error.load())
        } else {
            SdError::Command(self.axes.command_error.load())
        };
        Some(err)
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn card_inserted(&self) -> bool {
        self.inserted.load(Ordering::Acquire)
    }

    /// Any of the command, transmit or receive state machines in error
    pub fn error(&self) -> bool {
        self.axes.is_error()
    }

    pub fn states(&self) -> StateTriple {
        self.axes.snapshot()
    }

    pub fn command_error(&self) -> ErrorCause {
        self.axes.command_error.load()
    }

    pub fn transmit_error(&self) -> ErrorCause {
        self.axes.transmit_error.load()
    }

    pub fn receive_error(&self) -> ErrorCause {
        self.axes.receive_error.load()
    }

    /// Transmit cause of the last failed write
    pub fn last_transmit_error(&self) -> ErrorCause {
        self.last_transmit_error.load()
    }

    /// Command cause of the last failed write
    pub fn last_command_error(&self) -> ErrorCause {
        self.last_command_error.load()
    }

    /// The command issued before the current one (status polls excluded)
    pub fn last_command(&self) -> Command {
        self.last_command.load()
    }

    pub fn current_command(&self) -> Command {
        self.current_command.load()
    }

    pub fn rca(&self) -> u16 {
        self.rca.load(Ordering::Relaxed)
    }

    /// Card clock requested after identification
    pub fn clock_rate(&self) -> u32 {
        self.clock_rate.load(Ordering::Relaxed)
    }

    /// Worst-case operation time in card clock periods
    pub fn worst_case_timeout(&self) -> u32 {
        self.worst_case_timeout.load(Ordering::Relaxed)
    }

    /// Card capacity in 512-byte blocks
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &SdConfig {
        &self.config
    }

    /// Command or data transfer in progress on the bus
    pub fn hardware_active(&self) -> bool {
        let status = self.regs.status();
        status.is_set(STATUS::TX_ACTIVE) || status.is_set(STATUS::RX_ACTIVE) || status.is_set(STATUS::CMD_ACTIVE)
    }

    /// Wait until the bus is idle; `false` if still busy after `timeout_ms`
    pub fn wait_for_inactive(&self, timeout_ms: u64) -> bool {
        let timeout = Timeout::from_ms(&self.clock, timeout_ms);
        while self.hardware_active() {
            if timeout.is_expired() {
                return false;
            }
        }
        true
    }

    pub fn stats(&self) -> Stats {
        *self.stats.lock()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = Stats::new();
    }
}

/// Offset of the first differing byte
fn first_difference(expected: &[u8], actual: &[u8]) -> Option<usize> {
    expected.iter().zip(actual).position(|(a, b)| a != b)
}
