//! SD Card Interface Register Definitions
//!
//! This module defines the registers of the LPC3230 SD card interface (an
//! ARM PL180 multimedia card interface) and the MS_CTRL register of the
//! system control block, using tock-registers bitfields over a pluggable
//! register bus.

use core::ptr;
use tock_registers::fields::FieldValue;
use tock_registers::{LocalRegisterCopy, RegisterLongName, register_bitfields};

// ============================================================================
// Register Offsets
// ============================================================================

/// Power Control Register
pub const SD_POWER: usize = 0x00;

/// Clock Control Register
pub const SD_CLOCK: usize = 0x04;

/// Argument Register
pub const SD_ARGUMENT: usize = 0x08;

/// Command Register
pub const SD_COMMAND: usize = 0x0C;

/// Response Registers (4 DWORDs: 0x14, 0x18, 0x1C, 0x20)
pub const SD_RESPONSE: usize = 0x14;

/// Data Timer Register (in card clock periods)
pub const SD_DATA_TIMER: usize = 0x24;

/// Data Length Register (bytes)
pub const SD_DATA_LENGTH: usize = 0x28;

/// Data Control Register
pub const SD_DATA_CONTROL: usize = 0x2C;

/// Data Counter Register (bytes left to transfer)
pub const SD_DATA_COUNTER: usize = 0x30;

/// Status Register
pub const SD_STATUS: usize = 0x34;

/// Clear Register
pub const SD_CLEAR: usize = 0x38;

/// Interrupt Mask 0 Register (routed to the command interrupt)
pub const SD_MASK0: usize = 0x3C;

/// Interrupt Mask 1 Register (routed to the data interrupt)
pub const SD_MASK1: usize = 0x40;

/// Data FIFO (16 words, any word in 0x80..0xBC addresses it)
pub const SD_FIFO: usize = 0x80;

/// Depth of the data FIFO in 32-bit words
pub const FIFO_DEPTH: usize = 16;

/// Status bits that can be cleared through the clear register
pub const CLEARABLE_STATUS: u32 = 0x7FF;

/// Data block size encoding for 512-byte blocks (log2)
pub const BLOCK_SIZE_512: u32 = 9;

// ============================================================================
// Register Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// SD Card Interface Control (MS_CTRL) Register, system control block
    pub MS_CTRL [
        /// Disable the SD card pins
        SD_PIN_DISABLE OFFSET(10) NUMBITS(1) [],
        /// Enable the MSSDIO pad pull-ups and interface
        MSSDIO_ENABLE OFFSET(9) NUMBITS(1) [],
        /// Disable pull-up on MSSDIO2 and MSSDIO3
        MSSDIO2_3_PULLUP_DISABLE OFFSET(8) NUMBITS(1) [],
        /// Disable pull-up on MSSDIO1
        MSSDIO1_PULLUP_DISABLE OFFSET(7) NUMBITS(1) [],
        /// Disable pull-up on MSSDIO0
        MSSDIO0_PULLUP_DISABLE OFFSET(6) NUMBITS(1) [],
        /// SD card interface clock enable
        CLOCK_ENABLE OFFSET(5) NUMBITS(1) [],
        /// Clock divider from the ARM PLL (0 stops the clock)
        PLL_DIVIDER OFFSET(0) NUMBITS(4) []
    ],

    /// Power Control Register
    pub POWER [
        /// Command line open drain output
        OPEN_DRAIN OFFSET(6) NUMBITS(1) [],
        /// Power state
        CONTROL OFFSET(0) NUMBITS(2) [
            Off = 0,
            PowerUp = 2,
            On = 3
        ]
    ],

    /// Clock Control Register
    pub CLOCK [
        /// 4-bit wide bus mode
        WIDE_BUS OFFSET(11) NUMBITS(1) [],
        /// Bypass the divider (card clock = interface clock)
        BYPASS OFFSET(10) NUMBITS(1) [],
        /// Stop the card clock while the bus is idle
        POWER_SAVE OFFSET(9) NUMBITS(1) [],
        /// Card clock enable
        ENABLE OFFSET(8) NUMBITS(1) [],
        /// Clock divider: card clock = interface clock / (2 * (DIVIDER + 1))
        DIVIDER OFFSET(0) NUMBITS(8) []
    ],

    /// Command Register
    pub COMMAND [
        /// Enable the command path state machine
        ENABLE OFFSET(10) NUMBITS(1) [],
        /// Wait for data transfer end before sending
        PENDING OFFSET(9) NUMBITS(1) [],
        /// Wait for an interrupt request instead of timing out
        INTERRUPT OFFSET(8) NUMBITS(1) [],
        /// 136-bit response expected
        LONG_RESPONSE OFFSET(7) NUMBITS(1) [],
        /// Wait for a response
        RESPONSE OFFSET(6) NUMBITS(1) [],
        /// Command index
        INDEX OFFSET(0) NUMBITS(6) []
    ],

    /// Data Control Register
    pub DATA_CTRL [
        /// Data block length (log2 of the block size in bytes)
        BLOCK_SIZE OFFSET(4) NUMBITS(4) [],
        /// DMA request enable
        DMA_ENABLE OFFSET(3) NUMBITS(1) [],
        /// Stream transfer (instead of block transfer)
        MODE_STREAM OFFSET(2) NUMBITS(1) [],
        /// Direction: 1 = card to controller
        DIRECTION_RECEIVE OFFSET(1) NUMBITS(1) [],
        /// Enable the data path state machine
        ENABLE OFFSET(0) NUMBITS(1) []
    ],

    /// Status Register (also the layout of CLEAR, MASK0 and MASK1)
    pub STATUS [
        /// Data available in the receive FIFO
        RX_DATA_AVAILABLE OFFSET(21) NUMBITS(1) [],
        /// Data available in the transmit FIFO
        TX_DATA_AVAILABLE OFFSET(20) NUMBITS(1) [],
        /// Receive FIFO empty
        RX_FIFO_EMPTY OFFSET(19) NUMBITS(1) [],
        /// Transmit FIFO empty
        TX_FIFO_EMPTY OFFSET(18) NUMBITS(1) [],
        /// Receive FIFO full
        RX_FIFO_FULL OFFSET(17) NUMBITS(1) [],
        /// Transmit FIFO full
        TX_FIFO_FULL OFFSET(16) NUMBITS(1) [],
        /// Receive FIFO half full
        RX_FIFO_HALF_FULL OFFSET(15) NUMBITS(1) [],
        /// Transmit FIFO half empty
        TX_FIFO_HALF_EMPTY OFFSET(14) NUMBITS(1) [],
        /// Data receive in progress
        RX_ACTIVE OFFSET(13) NUMBITS(1) [],
        /// Data transmit in progress
        TX_ACTIVE OFFSET(12) NUMBITS(1) [],
        /// Command transfer in progress
        CMD_ACTIVE OFFSET(11) NUMBITS(1) [],
        /// Data block sent/received (CRC check passed)
        DATA_BLOCK_END OFFSET(10) NUMBITS(1) [],
        /// Start bit not detected on all data lines in wide bus mode
        START_BIT_ERROR OFFSET(9) NUMBITS(1) [],
        /// Data end (data counter is zero)
        DATA_END OFFSET(8) NUMBITS(1) [],
        /// Command sent (no response required)
        CMD_SENT OFFSET(7) NUMBITS(1) [],
        /// Command response received (CRC check passed)
        CMD_RESPONSE_END OFFSET(6) NUMBITS(1) [],
        /// Receive FIFO overrun
        RX_OVERRUN OFFSET(5) NUMBITS(1) [],
        /// Transmit FIFO underrun
        TX_UNDERRUN OFFSET(4) NUMBITS(1) [],
        /// Data timeout
        DATA_TIMEOUT OFFSET(3) NUMBITS(1) [],
        /// Command response timeout
        CMD_TIMEOUT OFFSET(2) NUMBITS(1) [],
        /// Data block sent/received (CRC check failed)
        DATA_CRC_FAIL OFFSET(1) NUMBITS(1) [],
        /// Command response received (CRC check failed)
        CMD_CRC_FAIL OFFSET(0) NUMBITS(1) []
    ]
];

/// One sample of the status register
pub type Status = LocalRegisterCopy<u32, STATUS::Register>;

// ============================================================================
// Register Bus
// ============================================================================

/// 32-bit register access at absolute addresses
pub trait RegisterBus: Sync {
    /// Read the register at `addr`
    fn read(&self, addr: usize) -> u32;

    /// Write `value` to the register at `addr`
    fn write(&self, addr: usize, value: u32);
}

/// Volatile memory-mapped register access
pub struct Mmio(());

impl Mmio {
    /// Create an MMIO bus
    ///
    /// # Safety
    ///
    /// Every address later passed to [`RegisterBus::read`] or
    /// [`RegisterBus::write`] must be a mapped, 32-bit aligned device
    /// register owned by the caller.
    pub const unsafe fn new() -> Self {
        Mmio(())
    }
}

impl RegisterBus for Mmio {
    #[inline]
    fn read(&self, addr: usize) -> u32 {
        unsafe { ptr::read_volatile(addr as *const u32) }
    }

    #[inline]
    fn write(&self, addr: usize, value: u32) {
        unsafe { ptr::write_volatile(addr as *mut u32, value) }
    }
}

// ============================================================================
// Register Accessor
// ============================================================================

/// Named accessors over the SD interface register bank
///
/// Field updates are masked read-modify-write cycles on the underlying bus.
pub struct SdRegisters<B> {
    bus: B,
    base: usize,
    ms_ctrl: usize,
}

impl<B: RegisterBus> SdRegisters<B> {
    /// Create an accessor for the bank at `base` with MS_CTRL at `ms_ctrl`
    pub const fn new(bus: B, base: usize, ms_ctrl: usize) -> Self {
        Self { bus, base, ms_ctrl }
    }

    /// The underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Absolute address of the data FIFO (DMA target)
    pub fn fifo_address(&self) -> usize {
        self.base + SD_FIFO
    }

    fn read_reg(&self, offset: usize) -> u32 {
        self.bus.read(self.base + offset)
    }

    fn write_reg(&self, offset: usize, value: u32) {
        self.bus.write(self.base + offset, value)
    }

    fn modify_at<R: RegisterLongName>(&self, addr: usize, field: FieldValue<u32, R>) {
        let value = self.bus.read(addr);
        self.bus.write(addr, field.modify(value));
    }

    fn modify_reg<R: RegisterLongName>(&self, offset: usize, field: FieldValue<u32, R>) {
        self.modify_at(self.base + offset, field)
    }

    // ------------------------------------------------------------------------
    // System control
    // ------------------------------------------------------------------------

    pub fn modify_ms_ctrl(&self, field: FieldValue<u32, MS_CTRL::Register>) {
        self.modify_at(self.ms_ctrl, field)
    }

    pub fn ms_ctrl(&self) -> LocalRegisterCopy<u32, MS_CTRL::Register> {
        LocalRegisterCopy::new(self.bus.read(self.ms_ctrl))
    }

    // ------------------------------------------------------------------------
    // Power and clock
    // ------------------------------------------------------------------------

    pub fn modify_power(&self, field: FieldValue<u32, POWER::Register>) {
        self.modify_reg(SD_POWER, field)
    }

    pub fn modify_clock(&self, field: FieldValue<u32, CLOCK::Register>) {
        self.modify_reg(SD_CLOCK, field)
    }

    pub fn clock(&self) -> LocalRegisterCopy<u32, CLOCK::Register> {
        LocalRegisterCopy::new(self.read_reg(SD_CLOCK))
    }

    // ------------------------------------------------------------------------
    // Command path
    // ------------------------------------------------------------------------

    pub fn set_argument(&self, arg: u32) {
        self.write_reg(SD_ARGUMENT, arg)
    }

    /// Program the whole command register
    pub fn write_command(&self, field: FieldValue<u32, COMMAND::Register>) {
        self.write_reg(SD_COMMAND, field.value)
    }

    pub fn modify_command(&self, field: FieldValue<u32, COMMAND::Register>) {
        self.modify_reg(SD_COMMAND, field)
    }

    /// Response word `index` (0 holds the most significant bits)
    pub fn response(&self, index: usize) -> u32 {
        self.read_reg(SD_RESPONSE + index * 4)
    }

    // ------------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------------

    pub fn set_data_timer(&self, periods: u32) {
        self.write_reg(SD_DATA_TIMER, periods)
    }

    pub fn set_data_length(&self, bytes: u32) {
        self.write_reg(SD_DATA_LENGTH, bytes)
    }

    pub fn modify_data_control(&self, field: FieldValue<u32, DATA_CTRL::Register>) {
        self.modify_reg(SD_DATA_CONTROL, field)
    }

    /// Bytes still to be transferred by the data path
    pub fn data_counter(&self) -> u32 {
        self.read_reg(SD_DATA_COUNTER)
    }

    // ------------------------------------------------------------------------
    // Status and interrupts
    // ------------------------------------------------------------------------

    pub fn status(&self) -> Status {
        LocalRegisterCopy::new(self.read_reg(SD_STATUS))
    }

    /// Clear the given latched status conditions
    pub fn clear(&self, conditions: FieldValue<u32, STATUS::Register>) {
        self.write_reg(SD_CLEAR, conditions.value & CLEARABLE_STATUS)
    }

    pub fn clear_all(&self) {
        self.write_reg(SD_CLEAR, CLEARABLE_STATUS)
    }

    pub fn set_mask0(&self, mask: FieldValue<u32, STATUS::Register>) {
        self.write_reg(SD_MASK0, mask.value)
    }

    pub fn set_mask1(&self, mask: FieldValue<u32, STATUS::Register>) {
        self.write_reg(SD_MASK1, mask.value)
    }

    pub fn modify_mask1(&self, field: FieldValue<u32, STATUS::Register>) {
        self.modify_reg(SD_MASK1, field)
    }

    pub fn clear_mask0(&self) {
        self.write_reg(SD_MASK0, 0)
    }

    pub fn clear_mask1(&self) {
        self.write_reg(SD_MASK1, 0)
    }

    pub fn mask_none(&self) {
        self.write_reg(SD_MASK0, 0);
        self.write_reg(SD_MASK1, 0);
    }

    // ------------------------------------------------------------------------
    // FIFO
    // ------------------------------------------------------------------------

    pub fn read_fifo(&self) -> u32 {
        self.read_reg(SD_FIFO)
    }

    pub fn write_fifo(&self, word: u32) {
        self.write_reg(SD_FIFO, word)
    }

    /// Discard whatever is left in the receive FIFO
    ///
    /// Returns the number of words dropped.
    pub fn flush_receive_fifo(&self) -> usize {
        let mut dropped = 0;
        while self.status().is_set(STATUS::RX_DATA_AVAILABLE) && dropped < FIFO_DEPTH {
            let _ = self.read_fifo();
            dropped += 1;
        }
        dropped
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Compute the 8-bit clock divider for a target card clock
///
/// The card clock is `input / (2 * (divider + 1))`; the result never exceeds
/// `rate` unless the divider saturates.
pub fn compute_divider(input_hz: u32, rate_hz: u32) -> u8 {
    let twice_rate = rate_hz.saturating_mul(2).max(1);
    let mut divider = (input_hz / twice_rate).saturating_sub(1);
    if input_hz / divider.saturating_add(1).saturating_mul(2) > rate_hz {
        divider += 1;
    }
    divider.min(0xFF) as u8
}
