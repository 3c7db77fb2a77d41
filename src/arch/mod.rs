//! Architecture support
//!
//! The board carries an ARM926EJ-S core. On other targets (host unit tests)
//! the routines here compile to no-ops.

pub mod arm926ejs;
