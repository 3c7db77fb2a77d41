//! LPC3230 platform constants
//!
//! Addresses and interrupt numbers of the blocks this crate drives, plus the
//! board-level SD transfer limits.

use crate::drivers::interrupt::IrqSource;

// ============================================================================
// Memory Map
// ============================================================================

/// SD card interface (ARM PL180 MCI) register block
pub const SD_BASE: usize = 0x2009_8000;

/// MS_CTRL register in the system control block (SD clock and pin control)
pub const SD_MS_CTRL: usize = 0x4000_4080;

// ============================================================================
// Interrupt Sources (main interrupt controller)
// ============================================================================

/// SD command interrupt (SD0_INT)
pub const SD_COMMAND_IRQ: IrqSource = IrqSource(15);

/// SD data interrupt (SD1_INT)
pub const SD_DATA_IRQ: IrqSource = IrqSource(13);

// ============================================================================
// DMA
// ============================================================================

/// DMA request line of the SD card interface
pub const DMA_PERIPHERAL_SD: u8 = 4;

/// DMA channel used for card-to-memory transfers
pub const SD_DMA_RECEIVE_CHANNEL: u8 = 0;

/// DMA channel used for memory-to-card transfers
pub const SD_DMA_TRANSMIT_CHANNEL: u8 = 1;

// ============================================================================
// SD Transfers
// ============================================================================

/// Block size for SD cards (always 512 bytes, FAT sector size)
pub const BLOCK_SIZE: usize = 512;

/// Largest number of blocks a single multi-block write may carry
pub const MAX_TRANSFER_BLOCKS: usize = 8;
