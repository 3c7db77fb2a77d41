//! ARM926EJ-S architecture support
//!
//! Interrupt masking, low-power wait and cache maintenance for the
//! ARMv5TEJ core of the LPC3230.

pub mod cache;

/// Mask IRQ and FIQ in the CPSR
#[inline]
pub fn disable_interrupts() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "mrs {tmp}, cpsr",
            "orr {tmp}, {tmp}, #0xC0",
            "msr cpsr_c, {tmp}",
            tmp = out(reg) _,
            options(nomem, nostack)
        );
    }
}

/// Unmask IRQ and FIQ in the CPSR
#[inline]
pub fn enable_interrupts() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "mrs {tmp}, cpsr",
            "bic {tmp}, {tmp}, #0xC0",
            "msr cpsr_c, {tmp}",
            tmp = out(reg) _,
            options(nomem, nostack)
        );
    }
}

/// Wait for an interrupt (CP15 c7 wait-for-interrupt operation)
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!(
            "mcr p15, 0, {zero}, c7, c0, 4",
            zero = in(reg) 0u32,
            options(nomem, nostack)
        );
    }
    #[cfg(not(target_arch = "arm"))]
    core::hint::spin_loop();
}
