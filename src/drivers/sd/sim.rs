//! Simulated SD interface and card
//!
//! Models the register bank, the 16-word FIFO, the two SD interrupt lines
//! (level triggered, dispatched whenever simulated time advances), a DMA
//! engine and a standard capacity card with 64 blocks of storage. Faults
//! are injected through [`Faults`].

use std::boxed::Box;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::vec::Vec;

use super::event::CompletionEvent;
use super::regs::{
    SD_ARGUMENT, SD_CLEAR, SD_CLOCK, SD_COMMAND, SD_DATA_CONTROL, SD_DATA_COUNTER, SD_DATA_LENGTH, SD_DATA_TIMER,
    SD_FIFO, SD_MASK0, SD_MASK1, SD_POWER, SD_RESPONSE, SD_STATUS,
};
use super::{Platform, SdConfig, SdController};
use crate::board::{self, BLOCK_SIZE};
use crate::drivers::dma::{DmaDirection, DmaEngine, DmaTransfer};
use crate::drivers::interrupt::{Handler, InterruptController, IrqSource, NUM_SOURCES, Trigger};
use crate::time::Timebase;

pub const CARD_RCA: u16 = 0x1234;
pub const CARD_BLOCKS: usize = 64;

/// Standard capacity card: TAAC 5 ms, NSAC 0, R2W 5
pub const CARD_CSD: [u32; 4] = [0x005E_0032, 0x5F5A_83A9, 0xFFFF_FF80, 0x1680_0000];
const CARD_CID: [u32; 4] = [0x0353_4453, 0x4430_3847, 0x8012_3456, 0x7800_8D00];
const CARD_OCR: u32 = 0x00FF_8000;

/// ACMD41 rounds a healthy card needs before reporting power-up done
const POWER_UP_ROUNDS: u32 = 2;

const PERIPHERAL_CLOCK_HZ: u32 = 208_000_000;
/// Simulated time advanced by every clock read
const TICK_US: u64 = 10;
const WORDS_PER_STEP: usize = 8;
const MAX_DISPATCH: usize = 64;
const FIFO_WORDS: usize = 16;

const CMD_RESPONSE: u32 = 1 << 6;
const CMD_ENABLE: u32 = 1 << 10;
const DATA_ENABLE: u32 = 1 << 0;
const DATA_RECEIVE: u32 = 1 << 1;
const DATA_DMA: u32 = 1 << 3;

const ST_CMD_CRC_FAIL: u32 = 1 << 0;
const ST_DATA_CRC_FAIL: u32 = 1 << 1;
const ST_CMD_TIMEOUT: u32 = 1 << 2;
const ST_TX_UNDERRUN: u32 = 1 << 4;
const ST_RX_OVERRUN: u32 = 1 << 5;
const ST_CMD_RESPONSE_END: u32 = 1 << 6;
const ST_CMD_SENT: u32 = 1 << 7;
const ST_DATA_END: u32 = 1 << 8;
const ST_START_BIT_ERROR: u32 = 1 << 9;
const ST_DATA_BLOCK_END: u32 = 1 << 10;
const ST_TX_ACTIVE: u32 = 1 << 12;
const ST_RX_ACTIVE: u32 = 1 << 13;
const ST_TX_HALF_EMPTY: u32 = 1 << 14;
const ST_RX_HALF_FULL: u32 = 1 << 15;
const ST_TX_FULL: u32 = 1 << 16;
const ST_RX_FULL: u32 = 1 << 17;
const ST_TX_EMPTY: u32 = 1 << 18;
const ST_RX_EMPTY: u32 = 1 << 19;
const ST_TX_AVAILABLE: u32 = 1 << 20;
const ST_RX_AVAILABLE: u32 = 1 << 21;

const R1_READY_FOR_DATA: u32 = 1 << 8;
const R1_APP_CMD: u32 = 1 << 5;

/// Fault forced onto one command index
#[derive(Debug, Clone, Copy)]
pub struct CommandFault {
    pub index: u8,
    /// Answer with a CRC failure instead of timing out
    pub crc: bool,
    /// Number of occurrences still to inject
    pub remaining: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    pub command: Option<CommandFault>,
    /// ACMD41 never reports power-up done
    pub never_power_up: bool,
    /// The last block of a write raises neither block end nor data end
    pub drop_data_completion: bool,
    pub write_data_crc: bool,
    pub read_data_crc: bool,
    /// Reads end with a start bit error
    pub read_start_bit: bool,
    /// Reads end with a receive FIFO overrun
    pub receive_overrun: bool,
    pub transmit_underrun: bool,
    /// Written blocks land in storage with their first byte inverted
    pub corrupt_writes: bool,
    /// Status polls answered with the programming state after a write
    pub busy_polls: u32,
    /// A single-block write leaves the card in the receive state
    pub stuck_receiving: bool,
    /// Stop transmission reaches the card but its response never latches
    pub drop_stop_response: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardState {
    Idle,
    Ready,
    Ident,
    Standby,
    Transfer,
    Sending,
    Receiving,
    Programming,
}

impl CardState {
    fn bits(self) -> u32 {
        match self {
            CardState::Idle => 0,
            CardState::Ready => 1,
            CardState::Ident => 2,
            CardState::Standby => 3,
            CardState::Transfer => 4,
            CardState::Sending => 5,
            CardState::Receiving => 6,
            CardState::Programming => 7,
        }
    }
}

enum Phase {
    Idle,
    Read { block: usize, offset: usize },
    Write { block: usize, offset: usize, buffer: [u8; BLOCK_SIZE], multi: bool },
}

struct SimState {
    ms_ctrl: u32,
    power: u32,
    clock: u32,
    argument: u32,
    command: u32,
    responses: [u32; 4],
    data_timer: u32,
    data_length: u32,
    data_control: u32,
    data_counter: u32,
    latched: u32,
    mask0: u32,
    mask1: u32,
    rx_fifo: VecDeque<u32>,
    tx_fifo: VecDeque<u32>,

    handlers: [Option<Handler>; NUM_SOURCES],
    enabled: u32,
    dma: [Option<DmaTransfer>; 8],
    ticks: u64,

    card: CardState,
    app_cmd: bool,
    power_up_rounds: u32,
    busy_left: u32,
    pending_read: Option<usize>,
    pending_write: Option<(usize, bool)>,
    phase: Phase,
    storage: Vec<[u8; BLOCK_SIZE]>,

    faults: Faults,
    log: Vec<(u8, u32)>,
    /// Clock divider in effect for each logged command
    dividers: Vec<u8>,
}

/// Byte pattern initially stored in `block`
pub fn pattern(block: usize) -> [u8; BLOCK_SIZE] {
    let mut data = [0u8; BLOCK_SIZE];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (block * 7 + i * 3) as u8;
    }
    data
}

impl SimState {
    fn new(faults: Faults) -> Self {
        Self {
            ms_ctrl: 0,
            power: 0,
            clock: 0,
            argument: 0,
            command: 0,
            responses: [0; 4],
            data_timer: 0,
            data_length: 0,
            data_control: 0,
            data_counter: 0,
            latched: 0,
            mask0: 0,
            mask1: 0,
            rx_fifo: VecDeque::new(),
            tx_fifo: VecDeque::new(),
            handlers: [None; NUM_SOURCES],
            enabled: 0,
            dma: [None; 8],
            ticks: 0,
            card: CardState::Idle,
            app_cmd: false,
            power_up_rounds: POWER_UP_ROUNDS,
            busy_left: 0,
            pending_read: None,
            pending_write: None,
            phase: Phase::Idle,
            storage: (0..CARD_BLOCKS).map(pattern).collect(),
            faults,
            log: Vec::new(),
            dividers: Vec::new(),
        }
    }

    fn status(&self) -> u32 {
        let mut status = self.latched;

        if self.rx_fifo.is_empty() {
            status |= ST_RX_EMPTY;
        } else {
            status |= ST_RX_AVAILABLE;
        }
        if self.rx_fifo.len() >= FIFO_WORDS / 2 {
            status |= ST_RX_HALF_FULL;
        }
        if self.rx_fifo.len() >= FIFO_WORDS {
            status |= ST_RX_FULL;
        }

        let transmitting = self.data_control & DATA_ENABLE != 0 && self.data_control & DATA_RECEIVE == 0;
        if transmitting {
            if self.tx_fifo.is_empty() {
                status |= ST_TX_EMPTY;
            } else {
                status |= ST_TX_AVAILABLE;
            }
            if self.tx_fifo.len() <= FIFO_WORDS / 2 {
                status |= ST_TX_HALF_EMPTY;
            }
            if self.tx_fifo.len() >= FIFO_WORDS {
                status |= ST_TX_FULL;
            }
        }

        match self.phase {
            Phase::Idle => {}
            Phase::Read { .. } => status |= ST_RX_ACTIVE,
            Phase::Write { .. } => status |= ST_TX_ACTIVE,
        }
        status
    }

    fn read(&mut self, offset: usize) -> u32 {
        match offset {
            SD_POWER => self.power,
            SD_CLOCK => self.clock,
            SD_ARGUMENT => self.argument,
            SD_COMMAND => self.command,
            o if (SD_RESPONSE..SD_RESPONSE + 16).contains(&o) => self.responses[(o - SD_RESPONSE) / 4],
            SD_DATA_TIMER => self.data_timer,
            SD_DATA_LENGTH => self.data_length,
            SD_DATA_CONTROL => self.data_control,
            SD_DATA_COUNTER => self.data_counter,
            SD_STATUS => self.status(),
            SD_MASK0 => self.mask0,
            SD_MASK1 => self.mask1,
            o if (SD_FIFO..SD_FIFO + 0x40).contains(&o) => self.rx_fifo.pop_front().unwrap_or(0),
            _ => 0,
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        match offset {
            SD_POWER => self.power = value,
            SD_CLOCK => self.clock = value,
            SD_ARGUMENT => self.argument = value,
            SD_COMMAND => {
                let rising = self.command & CMD_ENABLE == 0 && value & CMD_ENABLE != 0;
                self.command = value;
                if rising {
                    self.execute();
                }
            }
            SD_DATA_TIMER => self.data_timer = value,
            SD_DATA_LENGTH => self.data_length = value,
            SD_DATA_CONTROL => {
                let was = self.data_control & DATA_ENABLE != 0;
                self.data_control = value;
                match (was, value & DATA_ENABLE != 0) {
                    (false, true) => self.start_data(),
                    (true, false) => {
                        self.phase = Phase::Idle;
                        self.tx_fifo.clear();
                    }
                    _ => {}
                }
            }
            SD_CLEAR => self.latched &= !(value & 0x7FF),
            SD_MASK0 => self.mask0 = value,
            SD_MASK1 => self.mask1 = value,
            o if (SD_FIFO..SD_FIFO + 0x40).contains(&o) => {
                if self.tx_fifo.len() < FIFO_WORDS {
                    self.tx_fifo.push_back(value);
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Card
    // ------------------------------------------------------------------------

    fn r1(&self, extra: u32) -> [u32; 4] {
        [(self.card.bits() << 9) | R1_READY_FOR_DATA | extra, 0, 0, 0]
    }

    fn execute(&mut self) {
        let index = (self.command & 0x3F) as u8;
        let arg = self.argument;
        let wants_response = self.command & CMD_RESPONSE != 0;
        self.log.push((index, arg));
        self.dividers.push((self.clock & 0xFF) as u8);
        let app = core::mem::replace(&mut self.app_cmd, false);

        let mut crc = false;
        if let Some(fault) = self.faults.command.as_mut() {
            if fault.index == index && fault.remaining > 0 {
                fault.remaining -= 1;
                if !fault.crc {
                    self.latched |= ST_CMD_TIMEOUT;
                    return;
                }
                crc = true;
            }
        }

        let reply = match (index, app) {
            (0, _) => {
                self.card = CardState::Idle;
                self.power_up_rounds = POWER_UP_ROUNDS;
                None
            }
            (55, _) => {
                self.app_cmd = true;
                Some(self.r1(R1_APP_CMD))
            }
            (41, true) => {
                let mut ocr = CARD_OCR;
                if !self.faults.never_power_up {
                    self.power_up_rounds = self.power_up_rounds.saturating_sub(1);
                    if self.power_up_rounds == 0 {
                        ocr |= 1 << 31;
                        self.card = CardState::Ready;
                    }
                }
                // R3 carries no valid CRC
                crc = true;
                Some([ocr, 0, 0, 0])
            }
            (2, _) => {
                self.card = CardState::Ident;
                Some(CARD_CID)
            }
            (3, _) => {
                let reply = [((CARD_RCA as u32) << 16) | 0x0500, 0, 0, 0];
                self.card = CardState::Standby;
                Some(reply)
            }
            (9, _) => Some(CARD_CSD),
            (7, _) => {
                if arg >> 16 == CARD_RCA as u32 {
                    let reply = self.r1(0);
                    self.card = CardState::Transfer;
                    Some(reply)
                } else {
                    self.card = CardState::Standby;
                    None
                }
            }
            (6, true) => Some(self.r1(R1_APP_CMD)),
            (13, _) => {
                if self.card == CardState::Programming {
                    if self.busy_left > 0 {
                        self.busy_left -= 1;
                    } else {
                        self.card = CardState::Transfer;
                    }
                }
                Some(self.r1(0))
            }
            (16, _) => Some(self.r1(0)),
            (17, _) => {
                let reply = self.r1(0);
                self.card = CardState::Sending;
                self.pending_read = Some(arg as usize / BLOCK_SIZE);
                Some(reply)
            }
            (24 | 25, _) => {
                let reply = self.r1(0);
                self.card = CardState::Receiving;
                self.pending_write = Some((arg as usize / BLOCK_SIZE, index == 25));
                Some(reply)
            }
            (12, _) => {
                let reply = self.r1(0);
                match self.card {
                    CardState::Receiving => {
                        self.card = CardState::Programming;
                        self.busy_left = self.faults.busy_polls;
                    }
                    CardState::Sending => self.card = CardState::Transfer,
                    _ => {}
                }
                self.pending_write = None;
                self.phase = Phase::Idle;
                Some(reply)
            }
            _ => None,
        };

        if index == 12 && self.faults.drop_stop_response {
            return;
        }
        match reply {
            None if wants_response => self.latched |= ST_CMD_TIMEOUT,
            None => self.latched |= ST_CMD_SENT,
            Some(words) => {
                self.responses = words;
                self.latched |= if !wants_response {
                    ST_CMD_SENT
                } else if crc {
                    ST_CMD_CRC_FAIL
                } else {
                    ST_CMD_RESPONSE_END
                };
            }
        }
    }

    // ------------------------------------------------------------------------
    // Data engine
    // ------------------------------------------------------------------------

    fn start_data(&mut self) {
        if self.data_control & DATA_RECEIVE != 0 {
            if let Some(block) = self.pending_read.take() {
                self.data_counter = self.data_length;
                self.phase = Phase::Read { block, offset: 0 };
            }
        } else if let Some((block, multi)) = self.pending_write.take() {
            self.data_counter = self.data_length;
            self.phase = Phase::Write {
                block,
                offset: 0,
                buffer: [0; BLOCK_SIZE],
                multi,
            };
        }
    }

    fn dma_channel(&self, direction: DmaDirection) -> Option<usize> {
        if self.data_control & DATA_DMA == 0 {
            return None;
        }
        self.dma
            .iter()
            .position(|t| t.is_some_and(|t| t.direction == direction))
    }

    fn step(&mut self) {
        match core::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Read { block, offset } => self.step_read(block, offset),
            Phase::Write {
                block,
                offset,
                buffer,
                multi,
            } => self.step_write(block, offset, buffer, multi),
        }
    }

    fn step_read(&mut self, block: usize, mut offset: usize) {
        let channel = self.dma_channel(DmaDirection::PeripheralToMemory);
        let data = self.storage[block % CARD_BLOCKS];

        for _ in 0..WORDS_PER_STEP {
            if offset == BLOCK_SIZE {
                break;
            }
            let word = u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);
            if self.data_control & DATA_DMA != 0 {
                let Some(transfer) = channel.and_then(|c| self.dma[c].as_mut()) else {
                    break;
                };
                // SAFETY: the driver keeps the destination buffer alive while
                // the channel is armed.
                unsafe { (transfer.destination as *mut u32).write_unaligned(word) };
                transfer.destination += 4;
            } else {
                if self.rx_fifo.len() >= FIFO_WORDS {
                    break;
                }
                self.rx_fifo.push_back(word);
            }
            offset += 4;
            self.data_counter = self.data_counter.saturating_sub(4);
        }

        if offset < BLOCK_SIZE {
            self.phase = Phase::Read { block, offset };
            return;
        }
        self.card = CardState::Transfer;
        let mut errors = 0;
        if self.faults.read_start_bit {
            errors |= ST_START_BIT_ERROR;
        }
        if self.faults.receive_overrun {
            errors |= ST_RX_OVERRUN;
        }
        if self.faults.read_data_crc {
            errors |= ST_DATA_CRC_FAIL;
        }
        if errors != 0 {
            self.latched |= errors | ST_DATA_END;
        } else {
            self.latched |= ST_DATA_BLOCK_END | ST_DATA_END;
        }
    }

    fn step_write(&mut self, mut block: usize, mut offset: usize, mut buffer: [u8; BLOCK_SIZE], multi: bool) {
        if self.faults.transmit_underrun {
            self.latched |= ST_TX_UNDERRUN;
            return;
        }
        let channel = self.dma_channel(DmaDirection::MemoryToPeripheral);

        for _ in 0..WORDS_PER_STEP {
            if self.data_counter == 0 {
                break;
            }
            let word = if self.data_control & DATA_DMA != 0 {
                let Some(transfer) = channel.and_then(|c| self.dma[c].as_mut()) else {
                    break;
                };
                // SAFETY: the driver keeps the source buffer alive while the
                // channel is armed.
                let word = unsafe { (transfer.source as *const u32).read_unaligned() };
                transfer.source += 4;
                word
            } else {
                match self.tx_fifo.pop_front() {
                    Some(word) => word,
                    None => break,
                }
            };
            buffer[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
            offset += 4;
            self.data_counter = self.data_counter.saturating_sub(4);

            if offset == BLOCK_SIZE {
                if self.faults.write_data_crc {
                    self.latched |= ST_DATA_CRC_FAIL;
                    return;
                }
                if self.faults.corrupt_writes {
                    buffer[0] ^= 0xFF;
                }
                self.storage[block % CARD_BLOCKS] = buffer;
                block += 1;
                offset = 0;

                let last = self.data_counter == 0;
                if last && self.faults.drop_data_completion {
                    self.finish_write(multi);
                    return;
                }
                self.latched |= ST_DATA_BLOCK_END;
                if last {
                    self.latched |= ST_DATA_END;
                    self.finish_write(multi);
                    return;
                }
            }
        }

        self.phase = Phase::Write {
            block,
            offset,
            buffer,
            multi,
        };
    }

    fn finish_write(&mut self, multi: bool) {
        if !multi && !self.faults.stuck_receiving {
            self.card = CardState::Programming;
            self.busy_left = self.faults.busy_polls;
        }
    }

    fn pending_handler(&self) -> Option<Handler> {
        let status = self.status();
        let lines = [
            (board::SD_COMMAND_IRQ, self.mask0),
            (board::SD_DATA_IRQ, self.mask1),
        ];
        lines.into_iter().find_map(|(source, mask)| {
            let enabled = self.enabled & (1 << source.0) != 0;
            if enabled && status & mask != 0 {
                self.handlers[source.0 as usize]
            } else {
                None
            }
        })
    }
}

// ============================================================================
// Simulator
// ============================================================================

pub struct Sim {
    state: Mutex<SimState>,
    pumping: AtomicBool,
}

impl Sim {
    pub fn leak(faults: Faults) -> &'static Sim {
        Box::leak(Box::new(Sim {
            state: Mutex::new(SimState::new(faults)),
            pumping: AtomicBool::new(false),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the handlers of asserted interrupt lines
    fn pump(&self) {
        if self.pumping.swap(true, Ordering::AcqRel) {
            return;
        }
        for _ in 0..MAX_DISPATCH {
            let handler = self.lock().pending_handler();
            match handler {
                Some(handler) => handler(),
                None => break,
            }
        }
        self.pumping.store(false, Ordering::Release);
    }

    fn tick(&self) -> u64 {
        let ticks = {
            let mut state = self.lock();
            state.ticks += TICK_US;
            state.step();
            state.ticks
        };
        self.pump();
        ticks
    }

    pub fn set_faults(&self, faults: Faults) {
        self.lock().faults = faults;
    }

    pub fn faults(&self) -> Faults {
        self.lock().faults
    }

    /// Simulated microseconds since creation
    pub fn now_us(&self) -> u64 {
        self.lock().ticks
    }

    /// Command indices in issue order
    pub fn commands(&self) -> Vec<u8> {
        self.lock().log.iter().map(|&(index, _)| index).collect()
    }

    /// Commands with their arguments in issue order
    pub fn command_log(&self) -> Vec<(u8, u32)> {
        self.lock().log.clone()
    }

    /// Commands with the clock divider they went out with
    pub fn divider_log(&self) -> Vec<(u8, u8)> {
        let state = self.lock();
        state
            .log
            .iter()
            .zip(&state.dividers)
            .map(|(&(index, _), &divider)| (index, divider))
            .collect()
    }

    pub fn count(&self, index: u8) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|&&(i, _)| i == index)
            .count()
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.log.clear();
        state.dividers.clear();
    }

    pub fn block(&self, block: usize) -> [u8; BLOCK_SIZE] {
        self.lock().storage[block % CARD_BLOCKS]
    }

    pub fn ms_ctrl(&self) -> u32 {
        self.lock().ms_ctrl
    }

    pub fn clock_register(&self) -> u32 {
        self.lock().clock
    }

    pub fn command_register(&self) -> u32 {
        self.lock().command
    }

    pub fn power_register(&self) -> u32 {
        self.lock().power
    }

    pub fn irq_enabled(&self, source: IrqSource) -> bool {
        self.lock().enabled & (1 << source.0) != 0
    }
}

// ============================================================================
// Platform
// ============================================================================

#[derive(Clone, Copy)]
pub struct SimBus(&'static Sim);

impl super::regs::RegisterBus for SimBus {
    fn read(&self, addr: usize) -> u32 {
        let mut state = self.0.lock();
        if addr == board::SD_MS_CTRL {
            state.ms_ctrl
        } else {
            state.read(addr - board::SD_BASE)
        }
    }

    fn write(&self, addr: usize, value: u32) {
        let mut state = self.0.lock();
        if addr == board::SD_MS_CTRL {
            state.ms_ctrl = value;
        } else {
            state.write(addr - board::SD_BASE, value);
        }
    }
}

#[derive(Clone, Copy)]
pub struct SimIrq(&'static Sim);

impl InterruptController for SimIrq {
    fn install_handler(&self, source: IrqSource, _priority: u8, _fast: bool, _trigger: Trigger, handler: Handler) {
        self.0.lock().handlers[source.0 as usize] = Some(handler);
    }

    fn enable(&self, source: IrqSource) {
        self.0.lock().enabled |= 1 << source.0;
    }

    fn disable(&self, source: IrqSource) {
        self.0.lock().enabled &= !(1 << source.0);
    }
}

#[derive(Clone, Copy)]
pub struct SimDma(&'static Sim);

impl DmaEngine for SimDma {
    fn arm_transfer(&self, channel: u8, transfer: &DmaTransfer) {
        self.0.lock().dma[channel as usize] = Some(*transfer);
    }

    fn disable(&self, channel: u8) {
        self.0.lock().dma[channel as usize] = None;
    }
}

/// 1 tick = 1 us; every read advances the simulation by one step
#[derive(Clone, Copy)]
pub struct SimClock(&'static Sim);

impl Timebase for SimClock {
    fn now(&self) -> u64 {
        self.0.tick()
    }

    fn ticks_to_micros(&self, ticks: u64) -> u64 {
        ticks
    }

    fn peripheral_clock_hz(&self) -> u32 {
        PERIPHERAL_CLOCK_HZ
    }
}

/// Event set whose waits advance simulated time
pub struct SimEvent {
    sim: &'static Sim,
    bits: AtomicU32,
    pub waits: AtomicU32,
}

impl SimEvent {
    pub fn leak(sim: &'static Sim) -> &'static SimEvent {
        Box::leak(Box::new(SimEvent {
            sim,
            bits: AtomicU32::new(0),
            waits: AtomicU32::new(0),
        }))
    }
}

impl CompletionEvent for SimEvent {
    fn set(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
    }

    fn clear(&self, bits: u32) {
        self.bits.fetch_and(!bits, Ordering::AcqRel);
    }

    fn wait_any(&self, mask: u32, timeout_ms: u64) -> u32 {
        self.waits.fetch_add(1, Ordering::Relaxed);
        let start = self.sim.tick();
        loop {
            let raised = self.bits.load(Ordering::Acquire) & mask;
            if raised != 0 {
                return raised;
            }
            if self.sim.tick() - start > timeout_ms * 1000 {
                return 0;
            }
        }
    }

    fn yield_now(&self) {
        self.sim.tick();
    }
}

pub struct SimPlatform;

impl Platform for SimPlatform {
    type Bus = SimBus;
    type Irq = SimIrq;
    type Dma = SimDma;
    type Clock = SimClock;
}

// ============================================================================
// Test Harness
// ============================================================================

/// The interrupt entry points share one global handle
static SERIAL: Mutex<()> = Mutex::new(());

/// A leaked controller wired to a fresh simulator
pub struct Harness {
    pub sim: &'static Sim,
    pub sd: &'static SdController<SimPlatform>,
    _serial: MutexGuard<'static, ()>,
}

impl Harness {
    pub fn new(config: SdConfig, faults: Faults) -> Self {
        let serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let sim = Sim::leak(faults);
        let sd = Box::leak(Box::new(SdController::new(
            SimBus(sim),
            SimIrq(sim),
            SimDma(sim),
            SimClock(sim),
            config,
        )));
        Self {
            sim,
            sd,
            _serial: serial,
        }
    }

    /// Brought-up controller with an empty command log
    pub fn ready(config: SdConfig) -> Self {
        let harness = Self::new(config, Faults::default());
        harness.sd.init(1, 2, false).expect("card bring-up");
        harness.sim.clear_log();
        harness
    }

    /// Change the injected faults
    pub fn faults(&self, update: impl FnOnce(&mut Faults)) {
        let mut faults = self.sim.faults();
        update(&mut faults);
        self.sim.set_faults(faults);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.sd.release();
    }
}
