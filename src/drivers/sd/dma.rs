//! DMA data path
//!
//! Word-wide transfers between memory and the SD FIFO, paced by the SD
//! interface's DMA request lines. The data interrupt only sees data end.

use core::sync::atomic::Ordering;

use super::{DataPath, Platform, SdController};
use crate::drivers::dma::{DmaEngine, DmaTransfer};

impl<P: Platform> SdController<P> {
    /// Start moving the write buffer into the FIFO
    pub(super) fn start_dma_transmit(&self) {
        if let DataPath::Dma { transmit_channel, .. } = self.config.data_path {
            let source = self.data.load(Ordering::Acquire) as usize;
            let transfer = DmaTransfer::sd_transmit(source, self.regs.fifo_address());
            log::trace!("SD: DMA transmit from {:#x}", source);
            self.dma.arm_transfer(transmit_channel, &transfer);
        }
    }

    /// Start moving FIFO contents into the read buffer
    pub(super) fn start_dma_receive(&self) {
        if let DataPath::Dma { receive_channel, .. } = self.config.data_path {
            let destination = self.data.load(Ordering::Acquire) as usize;
            let transfer = DmaTransfer::sd_receive(self.regs.fifo_address(), destination);
            log::trace!("SD: DMA receive to {:#x}", destination);
            self.dma.arm_transfer(receive_channel, &transfer);
        }
    }

    /// Stop both SD channels
    pub(super) fn stop_dma(&self) {
        if let DataPath::Dma {
            receive_channel,
            transmit_channel,
        } = self.config.data_path
        {
            self.dma.disable(receive_channel);
            self.dma.disable(transmit_channel);
        }
    }
}
