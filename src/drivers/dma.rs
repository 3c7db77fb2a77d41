//! DMA engine interface
//!
//! One-shot memory/peripheral channel transfers on the general purpose DMA
//! controller. The peripheral handshakes the transfer; completion is reported
//! by the peripheral itself or by the DMA controller's own interrupt.

use crate::board;

/// Transfer direction (and flow controller)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Memory to peripheral, peripheral is flow controller
    MemoryToPeripheral,
    /// Peripheral to memory, peripheral is flow controller
    PeripheralToMemory,
}

impl DmaDirection {
    /// Flow control encoding in the channel configuration register
    pub fn flow_control(self) -> u32 {
        match self {
            DmaDirection::MemoryToPeripheral => 5,
            DmaDirection::PeripheralToMemory => 6,
        }
    }
}

/// Number of transfers per burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstSize {
    Beats1 = 0,
    Beats4 = 1,
    Beats8 = 2,
    Beats16 = 3,
    Beats32 = 4,
    Beats64 = 5,
    Beats128 = 6,
    Beats256 = 7,
}

/// Width of each transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferWidth {
    Byte = 0,
    HalfWord = 1,
    Word = 2,
}

/// Description of a one-shot channel transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    /// Source address
    pub source: usize,
    /// Destination address
    pub destination: usize,
    pub direction: DmaDirection,
    pub burst: BurstSize,
    pub width: TransferWidth,
    /// Request line of the peripheral taking part in the transfer
    pub peripheral: u8,
}

impl DmaTransfer {
    /// Memory to SD FIFO transfer
    pub fn sd_transmit(source: usize, fifo: usize) -> Self {
        Self {
            source,
            destination: fifo,
            direction: DmaDirection::MemoryToPeripheral,
            burst: BurstSize::Beats8,
            width: TransferWidth::Word,
            peripheral: board::DMA_PERIPHERAL_SD,
        }
    }

    /// SD FIFO to memory transfer
    pub fn sd_receive(fifo: usize, destination: usize) -> Self {
        Self {
            source: fifo,
            destination,
            direction: DmaDirection::PeripheralToMemory,
            burst: BurstSize::Beats8,
            width: TransferWidth::Word,
            peripheral: board::DMA_PERIPHERAL_SD,
        }
    }

    /// Whether the source address increments between beats
    pub fn source_increments(&self) -> bool {
        self.direction == DmaDirection::MemoryToPeripheral
    }

    /// Whether the destination address increments between beats
    pub fn destination_increments(&self) -> bool {
        self.direction == DmaDirection::PeripheralToMemory
    }
}

/// DMA controller operations used by drivers
pub trait DmaEngine: Sync {
    /// Program `channel` with `transfer` and enable it
    fn arm_transfer(&self, channel: u8, transfer: &DmaTransfer);

    /// Disable `channel`, abandoning any transfer in progress
    fn disable(&self, channel: u8);
}
