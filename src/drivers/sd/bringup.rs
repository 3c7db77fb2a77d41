//! Interface and card bring-up
//!
//! Powers the interface, identifies the card (CID and RCA) at 400 kHz, then
//! switches to the transfer clock and the 4-bit bus with 512-byte blocks.

use core::sync::atomic::Ordering;

use super::command::{BUS_WIDTH_4, Command, Ocr, published_rca, rca_argument};
use super::csd::Csd;
use super::regs::{BLOCK_SIZE_512, CLOCK, DATA_CTRL, MS_CTRL, POWER, compute_divider};
use super::{BLOCK_SIZE, DEFAULT_DATA_TIMER, INIT_CLOCK_HZ, Platform, SdController, SdError};
use crate::drivers::interrupt::InterruptController;
use crate::time::Timebase;

/// ACMD41 rounds before the card is declared absent (about 500 are
/// normally needed, roughly 320 ms)
const OP_COND_ROUNDS: u32 = 1000;

impl<P: Platform> SdController<P> {
    pub(super) fn bring_up(&self, command_priority: u8, fast: bool) -> Result<(), SdError> {
        if self.config.collect_stats {
            self.reset_stats();
        }
        let input_hz = self.clock.peripheral_clock_hz();

        // Interface clock straight from the ARM PLL, pads pulled up
        self.regs.modify_ms_ctrl(
            MS_CTRL::PLL_DIVIDER.val(1)
                + MS_CTRL::CLOCK_ENABLE::SET
                + MS_CTRL::MSSDIO0_PULLUP_DISABLE::CLEAR
                + MS_CTRL::MSSDIO1_PULLUP_DISABLE::CLEAR
                + MS_CTRL::MSSDIO2_3_PULLUP_DISABLE::CLEAR
                + MS_CTRL::MSSDIO_ENABLE::SET
                + MS_CTRL::SD_PIN_DISABLE::CLEAR,
        );
        self.regs
            .modify_power(POWER::CONTROL::On + POWER::OPEN_DRAIN::CLEAR);

        self.regs.modify_clock(
            CLOCK::DIVIDER.val(compute_divider(input_hz, INIT_CLOCK_HZ) as u32)
                + CLOCK::ENABLE::SET
                + CLOCK::POWER_SAVE::CLEAR
                + CLOCK::BYPASS::CLEAR
                + CLOCK::WIDE_BUS::CLEAR,
        );

        let dma = if self.config.data_path.is_dma() {
            DATA_CTRL::DMA_ENABLE::SET
        } else {
            DATA_CTRL::DMA_ENABLE::CLEAR
        };
        self.regs.modify_data_control(
            dma + DATA_CTRL::MODE_STREAM::CLEAR + DATA_CTRL::BLOCK_SIZE.val(BLOCK_SIZE_512),
        );
        self.regs.set_data_timer(DEFAULT_DATA_TIMER);
        self.regs.set_data_length(BLOCK_SIZE as u32);

        self.regs.clear_all();
        self.regs.mask_none();

        self.install_command_handler(command_priority, fast);

        self.issue(Command::GoIdle, 0);

        self.response[0].store(0, Ordering::Release);
        let mut powered_up = false;
        for _ in 0..OP_COND_ROUNDS {
            self.issue(Command::AppCmd, 0);
            let outcome = self.issue(Command::SendOpCond, Ocr::HOST_WINDOW.bits());
            if Ocr::from_bits_retain(outcome.response[0]).contains(Ocr::POWERED_UP) {
                powered_up = true;
                break;
            }
        }
        if !powered_up {
            log::warn!("SD: no card finished power-up after {} rounds", OP_COND_ROUNDS);
            self.power_down();
            return Err(SdError::NoCard);
        }
        self.inserted.store(true, Ordering::Release);

        let cid = self.issue(Command::AllSendCid, 0).response;
        log::debug!(
            "SD: CID {:08x} {:08x} {:08x} {:08x}",
            cid[0],
            cid[1],
            cid[2],
            cid[3]
        );
        let rca = published_rca(self.issue(Command::SendRelativeAddr, 0).response[0]);
        self.rca.store(rca, Ordering::Relaxed);

        // Identification is done, the card accepts the transfer clock
        let clock_rate = self.config.transfer_clock_hz;
        self.regs
            .modify_clock(CLOCK::DIVIDER.val(compute_divider(input_hz, clock_rate) as u32));
        self.clock_rate.store(clock_rate, Ordering::Relaxed);

        let csd = Csd::new(self.issue(Command::SendCsd, rca_argument(rca)).response);
        let worst_case_timeout = csd.worst_case_timeout(clock_rate);
        self.worst_case_timeout
            .store(worst_case_timeout, Ordering::Relaxed);
        self.regs.set_data_timer(worst_case_timeout);
        let num_blocks = csd.num_blocks().min(u32::MAX as u64) as u32;
        self.num_blocks.store(num_blocks, Ordering::Relaxed);

        self.issue(Command::SelectCard, rca_argument(rca));
        self.issue(Command::AppCmd, rca_argument(rca));
        self.issue(Command::SetBusWidth, BUS_WIDTH_4);
        self.regs.modify_clock(CLOCK::WIDE_BUS::SET);

        // Deselect (no response) and reselect the card on the wide bus
        self.issue(Command::SelectCard, 0);
        self.issue(Command::SendStatus, rca_argument(rca));
        self.issue(Command::SelectCard, rca_argument(rca));

        self.issue(Command::SetBlockLen, BLOCK_SIZE as u32);

        log::info!(
            "SD: card ready, RCA {:#06x}, {} blocks, {} Hz, timeout {} periods",
            rca,
            num_blocks,
            clock_rate,
            worst_case_timeout
        );
        Ok(())
    }

    /// Switch the interface off after a failed bring-up
    fn power_down(&self) {
        self.inserted.store(false, Ordering::Release);
        self.irq.disable(P::COMMAND_IRQ);
        self.regs.modify_ms_ctrl(
            MS_CTRL::SD_PIN_DISABLE::SET + MS_CTRL::MSSDIO_ENABLE::CLEAR + MS_CTRL::CLOCK_ENABLE::CLEAR,
        );
        self.regs.modify_clock(CLOCK::ENABLE::CLEAR);
        self.regs.modify_power(POWER::CONTROL::Off);
    }
}
