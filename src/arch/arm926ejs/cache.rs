//! Cache maintenance for DMA buffers
//!
//! The ARM926EJ-S has virtually indexed 32-byte cache lines and no hardware
//! coherence with the DMA controller. Buffers handed to the DMA engine are
//! cleaned and invalidated line by line (MVA format) around each transfer.

/// Cache line size in bytes
pub const CACHE_LINE_SIZE: usize = 32;

/// First line-aligned address and number of lines covering `[start, start + len)`
pub fn line_span(start: usize, len: usize) -> (usize, usize) {
    if len == 0 {
        return (start & !(CACHE_LINE_SIZE - 1), 0);
    }
    let first = start & !(CACHE_LINE_SIZE - 1);
    let end = start.saturating_add(len);
    let lines = (end - first).div_ceil(CACHE_LINE_SIZE);
    (first, lines)
}

/// Clean and invalidate the D-cache, and invalidate the I-cache, over a buffer
///
/// After this call the buffer contents are in memory and the next CPU access
/// refetches them, so a DMA transfer in either direction sees (and leaves)
/// coherent data.
pub fn force_cache_coherence(buffer: &[u8]) {
    let (first, lines) = line_span(buffer.as_ptr() as usize, buffer.len());
    for line in 0..lines {
        clean_invalidate_line(first + line * CACHE_LINE_SIZE);
    }
}

#[cfg(target_arch = "arm")]
#[inline]
fn clean_invalidate_line(addr: usize) {
    // SAFETY: cache maintenance by MVA has no memory-safety effect; the
    // address only selects which line is written back and dropped.
    unsafe {
        core::arch::asm!(
            "mcr p15, 0, {addr}, c7, c14, 1",
            "mcr p15, 0, {addr}, c7, c5, 1",
            addr = in(reg) addr,
            options(nostack)
        );
    }
}

#[cfg(not(target_arch = "arm"))]
#[inline]
fn clean_invalidate_line(_addr: usize) {}
