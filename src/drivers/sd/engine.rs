//! Command/response engine
//!
//! Full command issuance (state reset, data path arming, completion wait),
//! the lightweight path used from interrupt context and by the busy
//! resolver, and the command interrupt.

use core::ptr;
use core::sync::atomic::Ordering;
use tock_registers::fields::FieldValue;

use super::command::{Command, ResponseKind, rca_argument};
use super::regs::{COMMAND, DATA_CTRL, STATUS};
use super::state::{CommandState, ErrorCause, ReceiveState, TransmitState};
use super::stats::Outcome;
use super::{
    BLOCK_SIZE, COMMAND_TIMEOUT_MS, CommandOutcome, Platform, SdController, command_trampoline, receive_trampoline,
    transmit_trampoline,
};
use crate::drivers::interrupt::{InterruptController, Trigger};
use crate::time::Timeout;

/// Command register value and command interrupt mask for `cmd`
fn command_setup(cmd: Command) -> (FieldValue<u32, COMMAND::Register>, FieldValue<u32, STATUS::Register>) {
    let index = COMMAND::INDEX.val(cmd.index() as u32);
    match cmd.response_kind() {
        ResponseKind::None => (index, STATUS::CMD_SENT::SET + STATUS::CMD_TIMEOUT::SET),
        kind => {
            let mut command = index + COMMAND::RESPONSE::SET;
            if kind == ResponseKind::Long {
                command += COMMAND::LONG_RESPONSE::SET;
            }
            (
                command,
                STATUS::CMD_RESPONSE_END::SET + STATUS::CMD_TIMEOUT::SET + STATUS::CMD_CRC_FAIL::SET,
            )
        }
    }
}

impl<P: Platform> SdController<P> {
    /// Issue `cmd` and wait for it (and its data phase) to finish
    ///
    /// The caller must not call this while a previous command is still in
    /// flight. Data commands move the buffer registered in `data`.
    pub fn issue_command(&self, cmd: Command, arg: u32) -> CommandOutcome {
        self.issue(cmd, arg)
    }

    pub(super) fn issue(&self, cmd: Command, arg: u32) -> CommandOutcome {
        self.resolve_transmit_status();

        self.axes.reset_states();
        if let Some(binding) = self.event.get() {
            binding.event.clear(binding.all());
        }

        self.regs.set_argument(arg);
        let (command, mask) = command_setup(cmd);

        let data_priority = self.data_priority.load(Ordering::Relaxed);
        let mut blocks = 1;
        if cmd.is_write() {
            let to_send = self.to_send.load(Ordering::Acquire);
            blocks = (to_send / BLOCK_SIZE).max(1) as u32;

            self.irq
                .install_handler(P::DATA_IRQ, data_priority, false, Trigger::HighLevel, transmit_trampoline::<P>);
            self.irq.enable(P::DATA_IRQ);
            self.regs
                .set_data_timer(self.worst_case_timeout().saturating_mul(blocks));
            self.regs.set_data_length(to_send as u32);
            self.regs
                .modify_data_control(DATA_CTRL::DIRECTION_RECEIVE::CLEAR);
            self.axes.transmit.store(TransmitState::Started);
            self.unknown_transmit_status.store(true, Ordering::Release);
        } else if cmd.is_read() {
            self.regs.clear_mask1();
            self.arm_receive();
            self.irq
                .install_handler(P::DATA_IRQ, data_priority, false, Trigger::HighLevel, receive_trampoline::<P>);
            self.irq.enable(P::DATA_IRQ);

            let errors = STATUS::START_BIT_ERROR::SET
                + STATUS::RX_OVERRUN::SET
                + STATUS::DATA_TIMEOUT::SET
                + STATUS::DATA_CRC_FAIL::SET;
            self.regs.clear(errors);
            self.regs.modify_mask1(errors);

            self.regs.set_data_timer(self.worst_case_timeout());
            self.regs.set_data_length(BLOCK_SIZE as u32);
            self.regs
                .modify_data_control(DATA_CTRL::DIRECTION_RECEIVE::SET);
            self.axes.receive.store(ReceiveState::Started);
        }
        self.axes
            .command
            .store(CommandState::issued(cmd.is_read(), cmd.is_write()));

        self.track_command(cmd);
        self.axes.clear_errors();

        log::trace!("SD: CMD{} arg={:#010x}", cmd.index(), arg);
        self.regs.write_command(command);
        self.regs.set_mask0(mask);
        self.irq.enable(P::COMMAND_IRQ);
        self.regs.modify_command(COMMAND::ENABLE::SET);

        if cmd.is_read() {
            self.regs.modify_data_control(DATA_CTRL::ENABLE::SET);
        }

        let mut timeout_ms = COMMAND_TIMEOUT_MS;
        if cmd == Command::WriteMultiple {
            timeout_ms *= blocks as u64;
        }
        if !self.wait_for_completion(cmd, timeout_ms) {
            self.expire(cmd);
        } else if (cmd.is_write() || cmd.is_read()) && self.axes.command.load() == CommandState::Error {
            self.teardown_data_path();
        }

        if self.config.collect_stats {
            let outcome = Outcome {
                failed: self.error(),
                command: self.axes.command_error.load(),
                transmit: self.axes.transmit_error.load(),
                receive: self.axes.receive_error.load(),
            };
            self.stats.lock().record_command(cmd, outcome);
        }

        CommandOutcome {
            states: self.axes.snapshot(),
            response: self.response_words(),
        }
    }

    /// Issue `cmd` without touching the data path
    ///
    /// Used from the transmit interrupt (stop transmission) and by the busy
    /// resolver. With `wait` the call blocks until the command interrupt ran;
    /// returns `false` if it did not within the budget.
    pub(super) fn simple_issue(&self, cmd: Command, wait: bool) -> bool {
        if wait {
            self.axes.command.store(CommandState::PendingNormal);
            self.axes.command_error.store(ErrorCause::None);
            if let Some(binding) = self.event.get() {
                binding.event.clear(binding.command_done | binding.error);
            }
        }

        let (command, mask) = command_setup(cmd);
        self.track_command(cmd);
        if cmd == Command::SendStatus {
            self.regs.set_argument(rca_argument(self.rca()));
        }
        self.regs.write_command(command);
        self.regs.set_mask0(mask);
        self.irq.enable(P::COMMAND_IRQ);
        self.regs.modify_command(COMMAND::ENABLE::SET);

        if !wait {
            return true;
        }

        let completed = match self.event.get() {
            None => {
                let timeout = Timeout::from_ms(&self.clock, COMMAND_TIMEOUT_MS);
                loop {
                    if self.axes.command.load().is_terminal() {
                        break true;
                    }
                    if timeout.is_expired() {
                        break false;
                    }
                }
            }
            Some(binding) => {
                binding
                    .event
                    .wait_any(binding.command_done | binding.error, COMMAND_TIMEOUT_MS)
                    != 0
            }
        };
        if !completed {
            self.abort_command();
            self.axes.fail_command(ErrorCause::EventTimeout);
        }
        completed
    }

    fn track_command(&self, cmd: Command) {
        let current = self.current_command.load();
        if current != Command::SendStatus {
            self.last_command.store(current);
        }
        self.current_command.store(cmd);
    }

    /// Whether the state machines owning `cmd` reached a terminal state
    fn finished(&self, cmd: Command) -> bool {
        match self.axes.command.load() {
            CommandState::Error => true,
            CommandState::Idle if cmd.is_write() => self.axes.transmit.load().is_terminal(),
            CommandState::Idle if cmd.is_read() => self.axes.receive.load().is_terminal(),
            CommandState::Idle => true,
            _ => false,
        }
    }

    /// Block until `cmd` finished; `false` once `timeout_ms` elapsed first
    fn wait_for_completion(&self, cmd: Command, timeout_ms: u64) -> bool {
        match self.event.get() {
            None => {
                let timeout = Timeout::from_ms(&self.clock, timeout_ms);
                loop {
                    if self.finished(cmd) {
                        return true;
                    }
                    if timeout.is_expired() {
                        return false;
                    }
                }
            }
            Some(binding) => {
                let mut mask = binding.error;
                if cmd.is_write() || cmd.is_read() {
                    mask |= binding.transfer_done;
                } else {
                    mask |= binding.command_done;
                }
                binding.event.wait_any(mask, timeout_ms) != 0
            }
        }
    }

    /// Force the axis owning `cmd` into error after a wait timeout
    ///
    /// The data path is torn down so a late interrupt cannot touch the
    /// caller's buffer.
    fn expire(&self, cmd: Command) {
        log::warn!("SD: CMD{} got no completion in time", cmd.index());
        if cmd.is_write() || cmd.is_read() {
            self.teardown_data_path();
        }
        // A stop transmission sent from the data interrupt may still be pending
        let stop_pending = cmd == Command::WriteMultiple
            && matches!(
                self.axes.transmit.load(),
                TransmitState::Stopping | TransmitState::StoppingFromError
            );
        if stop_pending || !self.axes.command.load().is_terminal() {
            self.abort_command();
        }

        if cmd.is_write() {
            self.axes.fail_transmit(ErrorCause::EventTimeout);
        } else if cmd.is_read() {
            self.axes.fail_receive(ErrorCause::EventTimeout);
        } else {
            self.axes.fail_command(ErrorCause::EventTimeout);
        }
    }

    /// Stop the data path and forget the caller's buffer
    pub(super) fn teardown_data_path(&self) {
        self.irq.disable(P::DATA_IRQ);
        self.regs.clear_mask1();
        self.regs.modify_data_control(DATA_CTRL::ENABLE::CLEAR);
        self.stop_dma();
        self.data.store(ptr::null_mut(), Ordering::Release);
    }

    fn abort_command(&self) {
        self.irq.disable(P::COMMAND_IRQ);
        self.regs.clear_mask0();
        self.regs.modify_command(COMMAND::ENABLE::CLEAR);
    }

    fn response_words(&self) -> [u32; 4] {
        [
            self.response[0].load(Ordering::Acquire),
            self.response[1].load(Ordering::Acquire),
            self.response[2].load(Ordering::Acquire),
            self.response[3].load(Ordering::Acquire),
        ]
    }

    // ========================================================================
    // Command Interrupt
    // ========================================================================

    pub(super) fn command_isr(&self) {
        let status = self.regs.status();
        let cmd = self.current_command.load();

        let cause = if status.is_set(STATUS::CMD_TIMEOUT) {
            ErrorCause::Timeout
        } else if status.is_set(STATUS::CMD_CRC_FAIL) {
            ErrorCause::CrcFailed
        } else {
            ErrorCause::None
        };
        let failed = cause != ErrorCause::None;
        if failed {
            self.axes.command_error.store(cause);
        }

        // The card did answer on a CRC failure (R3 carries no valid CRC)
        if !status.is_set(STATUS::CMD_TIMEOUT) {
            for word in 0..cmd.response_kind().words() {
                self.response[word].store(self.regs.response(word), Ordering::Release);
            }
        }

        self.regs.modify_command(COMMAND::ENABLE::CLEAR);
        self.regs.clear_mask0();

        if !failed && cmd.is_write() && !self.data.load(Ordering::Acquire).is_null() {
            self.arm_transmit();
        }

        self.axes.command.store(CommandState::completed(failed));
        if let Some(binding) = self.event.get() {
            binding.signal_command(failed);
        }

        self.regs.clear(
            STATUS::CMD_SENT::SET + STATUS::CMD_RESPONSE_END::SET + STATUS::CMD_TIMEOUT::SET + STATUS::CMD_CRC_FAIL::SET,
        );

        // A stop transmission follows the data phase of a multi-block write
        if cmd != Command::WriteMultiple || failed {
            self.irq.disable(P::COMMAND_IRQ);
        }

        if cmd == Command::StopTransmission {
            let transmit = self.axes.transmit.load().stop_completed();
            self.axes.transmit.store(transmit);
            if let Some(binding) = self.event.get() {
                binding.signal_transfer(transmit == TransmitState::Error);
            }
        }
    }

    /// Install the command interrupt entry point
    pub(super) fn install_command_handler(&self, priority: u8, fast: bool) {
        self.irq
            .install_handler(P::COMMAND_IRQ, priority, fast, Trigger::HighLevel, command_trampoline::<P>);
    }
}
