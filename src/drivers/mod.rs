//! Hardware drivers for lpc3230-bsp
//!
//! The SD card driver plus the collaborator interfaces it is wired to
//! (interrupt controller and DMA engine).

pub mod dma;
pub mod interrupt;
pub mod sd;
