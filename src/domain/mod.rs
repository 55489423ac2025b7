//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - pixel/grid geometry (`PixelCoordinate`, `Aperture`)
//! - model configuration (`CpmSettings`, `PolySettings`, `OutlierSettings`)
//! - result addressing (`LightCurveKind`)

pub mod types;

pub use types::*;
