//! Card busy resolution
//!
//! The interface cannot watch DAT0, so after a write the card is polled with
//! SEND_STATUS until it is back in the transfer state. This happens lazily,
//! right before the next command, so the programming time overlaps with
//! whatever the caller does in between.

use core::sync::atomic::Ordering;

use super::command::{CardStatus, Command};
use super::state::TransmitState;
use super::{Platform, RESOLVE_TIMEOUT_MS, SdController};
use crate::time::Timeout;

impl<P: Platform> SdController<P> {
    /// Wait until the card finished the previous write
    ///
    /// A card still waiting for data gets a stop transmission. Gives up
    /// after [`RESOLVE_TIMEOUT_MS`] and keeps the write marked unresolved.
    pub(super) fn resolve_transmit_status(&self) {
        if !self.unknown_transmit_status.load(Ordering::Acquire) {
            return;
        }

        let timeout = Timeout::from_ms(&self.clock, RESOLVE_TIMEOUT_MS);
        let mut retries = 0u32;
        loop {
            self.simple_issue(Command::SendStatus, true);
            retries += 1;

            if self.error() {
                if self.axes.transmit.load() == TransmitState::Error {
                    break;
                }
            } else {
                let status = CardStatus::from_bits_retain(self.response[0].load(Ordering::Acquire));
                if status.transfer_ready() {
                    break;
                }
                if status.still_receiving() {
                    log::debug!("SD: card still receiving, stopping transmission");
                    self.simple_issue(Command::StopTransmission, true);
                }
            }

            if timeout.is_expired() {
                log::warn!("SD: card still busy after {} status polls", retries);
                return;
            }
            if let Some(binding) = self.event.get() {
                binding.event.yield_now();
            }
        }

        if self.config.collect_stats {
            self.stats
                .lock()
                .record_resolve(timeout.elapsed_us(), retries);
        }
        self.unknown_transmit_status.store(false, Ordering::Release);
    }
}
