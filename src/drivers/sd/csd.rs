//! Card-Specific Data decoding
//!
//! The controller returns a 136-bit response in four words, word 0 holding
//! bits 127:96. Only the timing and capacity fields are decoded.

/// TAAC time unit in nanoseconds, indexed by TAAC bits 2:0
const TAAC_UNIT_NS: [u32; 8] = [
    1, 10, 100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000,
];

/// TAAC time value multiplied by 10, indexed by TAAC bits 6:3
const TAAC_VALUE_X10: [u32; 16] = [80, 10, 12, 13, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 70, 80];

/// NSAC is expressed in units of 100 clock cycles
const NSAC_UNIT_CYCLES: u32 = 100;

/// Safety margin applied on top of the computed write timeout
const TIMEOUT_MARGIN: u32 = 2;

/// Decoded CSD register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csd {
    raw: [u32; 4],
}

impl Csd {
    pub fn new(raw: [u32; 4]) -> Self {
        Self { raw }
    }

    /// CSD structure version (0 = standard capacity, 1 = high capacity)
    pub fn structure(&self) -> u8 {
        (self.raw[0] >> 30) as u8
    }

    /// Data read access time 1 (TAAC, bits 119:112)
    pub fn taac(&self) -> u8 {
        (self.raw[0] >> 16) as u8
    }

    /// Data read access time 2 in 100-cycle units (NSAC, bits 111:104)
    pub fn nsac(&self) -> u8 {
        (self.raw[0] >> 8) as u8
    }

    /// Write speed factor as a power of two (R2W_FACTOR, bits 28:26)
    pub fn r2w_factor(&self) -> u8 {
        ((self.raw[3] >> 26) & 0x7) as u8
    }

    /// Asynchronous part of the access time in nanoseconds
    pub fn access_time_ns(&self) -> u32 {
        let taac = self.taac();
        let unit = TAAC_UNIT_NS[(taac & 0x7) as usize];
        let value = TAAC_VALUE_X10[((taac >> 3) & 0xF) as usize];
        unit * value / 10
    }

    /// Worst-case write timeout in card clock periods at `clock_hz`
    ///
    /// Access time plus the NSAC cycles, scaled by the write factor and
    /// doubled.
    pub fn worst_case_timeout(&self, clock_hz: u32) -> u32 {
        let period_ns = (1_000_000_000 / clock_hz.max(1)).max(1);
        let periods = self.access_time_ns() / period_ns
            + self.nsac() as u32 * NSAC_UNIT_CYCLES;
        periods
            .saturating_mul(1 << self.r2w_factor())
            .saturating_mul(TIMEOUT_MARGIN)
    }

    /// Card capacity in 512-byte blocks
    pub fn num_blocks(&self) -> u64 {
        if self.structure() == 0 {
            // C_SIZE bits 73:62, C_SIZE_MULT bits 49:47, READ_BL_LEN bits 83:80
            let c_size = ((self.raw[1] & 0x3FF) << 2) | (self.raw[2] >> 30);
            let c_size_mult = (self.raw[2] >> 15) & 0x7;
            let read_bl_len = (self.raw[1] >> 16) & 0xF;

            let blocknr = (c_size as u64 + 1) << (c_size_mult + 2);
            (blocknr << read_bl_len) / 512
        } else {
            // C_SIZE bits 69:48 in 512 KiB units
            let c_size = ((self.raw[1] & 0x3F) << 16) | (self.raw[2] >> 16);
            (c_size as u64 + 1) * 1024
        }
    }
}
