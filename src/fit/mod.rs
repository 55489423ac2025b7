//! Pixel-model fitting.
//!
//! Responsibilities:
//!
//! - select predictor pixels outside the exclusion region
//! - assemble model blocks into one design matrix
//! - fit contiguous holdout sections and stitch out-of-sample predictions
//! - cache per-pixel results for aggregation

pub mod design;
pub mod holdout;
pub mod pixel;
pub mod predictors;

pub use design::*;
pub use holdout::*;
pub use pixel::*;
pub use predictors::*;
