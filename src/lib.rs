//! Causal pixel modeling for TESS image cutouts.
//!
//! A target pixel is regressed on many distant pixels of the same cutout;
//! what those pixels share is the instrument, not the sky, so the fitted
//! prediction traces systematics and the residual keeps the astrophysics.
//!
//! - `data` loads cutout cubes and synthesizes test data
//! - `fit` selects predictors, assembles design blocks and runs holdout fits
//! - `source` drives per-pixel models over an aperture and sums light curves
//! - `math` holds the ridge solver, trend basis and noise metrics
//! - `io` reads cutout JSON and exports results

pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod source;
