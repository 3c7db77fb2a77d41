//! Read data path
//!
//! Armed before a read command is issued so no received word is lost; the
//! data interrupt drains the FIFO (or waits for the DMA engine) until the
//! block is complete.

use super::regs::STATUS;
use super::state::{ErrorCause, ReceiveState};
use super::{DataPath, Platform, SdController};

impl<P: Platform> SdController<P> {
    /// Route the data interrupt to the receive path
    pub(super) fn arm_receive(&self) {
        match self.config.data_path {
            DataPath::Pio => {
                self.regs
                    .set_mask1(STATUS::DATA_BLOCK_END::SET + STATUS::RX_FIFO_HALF_FULL::SET);
            }
            DataPath::Dma { .. } => {
                self.regs.set_mask1(STATUS::DATA_END::SET);
                self.start_dma_receive();
            }
        }
    }

    pub(super) fn receive_isr(&self) {
        let status = self.regs.status();

        let done = match self.config.data_path {
            DataPath::Pio => {
                let block_end = status.is_set(STATUS::DATA_BLOCK_END);
                if block_end || status.is_set(STATUS::RX_FIFO_HALF_FULL) {
                    self.drain_receive_fifo();
                }
                block_end || self.regs.data_counter() == 0
            }
            DataPath::Dma { .. } => status.is_set(STATUS::DATA_END),
        };

        let cause = if status.is_set(STATUS::START_BIT_ERROR) {
            ErrorCause::StartBit
        } else if status.is_set(STATUS::RX_OVERRUN) {
            ErrorCause::ReceiveFifoOverrun
        } else if status.is_set(STATUS::DATA_TIMEOUT) {
            ErrorCause::Timeout
        } else if status.is_set(STATUS::DATA_CRC_FAIL) {
            ErrorCause::CrcFailed
        } else {
            ErrorCause::None
        };
        let failed = cause != ErrorCause::None;

        if done || failed {
            self.teardown_data_path();
            if failed {
                self.axes.receive_error.store(cause);
            }
            self.axes.receive.store(ReceiveState::data_finished(failed));
            if let Some(binding) = self.event.get() {
                binding.signal_transfer(failed);
            }
        } else {
            self.axes.receive.store(ReceiveState::Transferring);
        }

        self.regs.clear(
            STATUS::DATA_END::SET
                + STATUS::DATA_BLOCK_END::SET
                + STATUS::START_BIT_ERROR::SET
                + STATUS::RX_OVERRUN::SET
                + STATUS::DATA_TIMEOUT::SET
                + STATUS::DATA_CRC_FAIL::SET,
        );
    }
}
