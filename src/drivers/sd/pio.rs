//! Programmed I/O on the data FIFO
//!
//! The data interrupt copies words between the caller's buffer and the
//! 16-word FIFO. Buffers need not be word aligned; a short tail is padded
//! on transmit and truncated on receive.

use core::ptr;
use core::sync::atomic::Ordering;

use super::regs::{FIFO_DEPTH, STATUS};
use super::{Platform, SdController};

impl<P: Platform> SdController<P> {
    /// Push up to `max_words` words of pending write data into the FIFO
    pub(super) fn fill_transmit_fifo(&self, max_words: usize) {
        let mut data = self.data.load(Ordering::Acquire);
        if data.is_null() {
            return;
        }
        let mut left = self.to_send.load(Ordering::Acquire);

        let mut words = 0;
        while left > 0 && words < max_words && !self.regs.status().is_set(STATUS::TX_FIFO_FULL) {
            let len = left.min(4);
            let mut bytes = [0u8; 4];
            // SAFETY: `data` points into the write buffer registered by
            // `write_block`, which holds at least `to_send` more bytes.
            unsafe {
                ptr::copy_nonoverlapping(data, bytes.as_mut_ptr(), len);
                data = data.add(len);
            }
            self.regs.write_fifo(u32::from_le_bytes(bytes));
            left -= len;
            words += 1;
        }

        self.data.store(data, Ordering::Release);
        self.to_send.store(left, Ordering::Release);
    }

    /// Pull words out of the receive FIFO until it is empty
    ///
    /// At most one FIFO depth is read per call. Words beyond the end of the
    /// buffer are discarded.
    pub(super) fn drain_receive_fifo(&self) -> usize {
        let mut data = self.data.load(Ordering::Acquire);
        let mut left = self.to_receive.load(Ordering::Acquire);

        let mut words = 0;
        while words < FIFO_DEPTH && self.regs.status().is_set(STATUS::RX_DATA_AVAILABLE) {
            let bytes = self.regs.read_fifo().to_le_bytes();
            let len = left.min(4);
            if len > 0 && !data.is_null() {
                // SAFETY: `data` points into the read buffer registered by
                // `receive_block`, which has room for `to_receive` more bytes.
                unsafe {
                    ptr::copy_nonoverlapping(bytes.as_ptr(), data, len);
                    data = data.add(len);
                }
                left -= len;
            }
            words += 1;
        }

        self.data.store(data, Ordering::Release);
        self.to_receive.store(left, Ordering::Release);
        words
    }
}
