//! Input/output helpers.
//!
//! - cutout JSON read/write (`cutout_file`)
//! - light-curve and pixel-result exports (CSV/JSON) (`export`)

pub mod cutout_file;
pub mod export;

pub use cutout_file::*;
pub use export::*;
