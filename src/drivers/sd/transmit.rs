//! Write data path
//!
//! Armed by the command interrupt once the card accepted a write command.
//! Single-block writes finish in the data interrupt; multi-block writes
//! issue a stop transmission there and finish in the command interrupt.

use core::sync::atomic::Ordering;

use super::command::Command;
use super::regs::{DATA_CTRL, FIFO_DEPTH, STATUS};
use super::state::{ErrorCause, TransmitState};
use super::{DataPath, Platform, SdController};

impl<P: Platform> SdController<P> {
    /// Start the data phase of an accepted write command
    pub(super) fn arm_transmit(&self) {
        let errors = STATUS::DATA_CRC_FAIL::SET + STATUS::DATA_TIMEOUT::SET + STATUS::TX_UNDERRUN::SET;
        self.regs
            .clear(errors + STATUS::DATA_BLOCK_END::SET + STATUS::DATA_END::SET);
        self.regs.modify_data_control(DATA_CTRL::ENABLE::SET);

        match self.config.data_path {
            DataPath::Pio => {
                self.regs.set_mask1(
                    errors + STATUS::DATA_BLOCK_END::SET + STATUS::TX_FIFO_HALF_EMPTY::SET,
                );
                self.fill_transmit_fifo(FIFO_DEPTH);
            }
            DataPath::Dma { .. } => {
                self.regs.set_mask1(errors + STATUS::DATA_END::SET);
                self.start_dma_transmit();
            }
        }
    }

    pub(super) fn transmit_isr(&self) {
        let status = self.regs.status();

        let done = match self.config.data_path {
            DataPath::Pio => {
                let done = status.is_set(STATUS::DATA_BLOCK_END) && self.to_send.load(Ordering::Acquire) == 0;
                if status.is_set(STATUS::TX_FIFO_HALF_EMPTY) {
                    self.fill_transmit_fifo(FIFO_DEPTH / 2);
                }
                if self.to_send.load(Ordering::Acquire) == 0 {
                    self.regs.modify_mask1(STATUS::TX_FIFO_HALF_EMPTY::CLEAR);
                }
                done
            }
            DataPath::Dma { .. } => status.is_set(STATUS::DATA_END),
        };

        let cause = if status.is_set(STATUS::TX_UNDERRUN) {
            ErrorCause::TransmitFifoUnderrun
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
                self.axes.transmit_error.store(cause);
            }

            let multi_block = self.current_command.load() == Command::WriteMultiple;
            self.axes
                .transmit
                .store(TransmitState::data_finished(failed, multi_block));
            if multi_block {
                self.simple_issue(Command::StopTransmission, false);
            } else if let Some(binding) = self.event.get() {
                binding.signal_transfer(failed);
            }
        } else {
            self.axes.transmit.store(TransmitState::Transferring);
        }

        self.regs.clear(
            STATUS::DATA_END::SET
                + STATUS::DATA_BLOCK_END::SET
                + STATUS::TX_UNDERRUN::SET
                + STATUS::DATA_TIMEOUT::SET
                + STATUS::DATA_CRC_FAIL::SET,
        );
    }
}
