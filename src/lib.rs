//! lpc3230-bsp - Board support for LPC3230 (ARM926EJ-S) boards
//!
//! This library is the lowest software layer of the board: it owns the
//! SD/MMC card interface and the glue it needs (interrupt controller, DMA
//! engine and timebase seams, cache maintenance, logging).
//!
//! The SD driver is interrupt driven. A firmware image creates one
//! [`drivers::sd::SdController`] in a `static`, calls
//! [`drivers::sd::SdController::init`] once the interrupt controller is up,
//! and then reads and writes 512-byte blocks from a single owning task.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod board;
pub mod drivers;
pub mod logger;
pub mod time;

#[cfg(all(not(test), target_os = "none"))]
use core::panic::PanicInfo;

/// Global panic handler
#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    arch::arm926ejs::disable_interrupts();
    loop {
        arch::arm926ejs::wait_for_interrupt();
    }
}
