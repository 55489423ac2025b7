//! Source-level aggregation.
//!
//! Responsibilities:
//!
//! - own the aperture grid of pixel models and broadcast composition calls
//! - fan the holdout fit out in parallel and collect per-pixel failures
//! - sum per-pixel light curves into aperture curves (full and per section)
//! - flag outlier cadences and search the CPM regularization grid

mod outliers;
pub mod reg_search;
pub mod star;

pub use reg_search::*;
pub use star::*;
