//! Read/write cutout JSON files.
//!
//! Cutout JSON is the portable representation of an image-cube time series:
//!
//! - cadence midtimes and per-cadence quality flags
//! - the flux cube, flattened cadence-major
//! - grid dimensions
//!
//! Fetching cutouts from the archive (FITS over the wire) is a collaborator
//! concern; whatever does the fetching writes this schema and the engine
//! loads it without further network or FITS machinery.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CpmError;

/// On-disk cutout cube.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoutFile {
    /// Cadence midtimes, BJD - 2457000 days.
    pub time: Vec<f64>,
    /// Flux samples in e-/s, flattened as `[cadence][row][col]`.
    pub flux: Vec<f64>,
    pub n_rows: usize,
    pub n_cols: usize,
    /// Per-cadence quality flags; nonzero marks a cadence bad. May be empty
    /// when the producer has no quality information.
    #[serde(default)]
    pub quality: Vec<u32>,
}

/// Read a cutout JSON file.
pub fn read_cutout(path: &Path) -> Result<CutoutFile, CpmError> {
    let file = File::open(path).map_err(|e| {
        CpmError::DataLoad(format!("failed to open cutout '{}': {e}", path.display()))
    })?;
    let cutout: CutoutFile = serde_json::from_reader(file).map_err(|e| {
        CpmError::DataLoad(format!("invalid cutout JSON '{}': {e}", path.display()))
    })?;
    Ok(cutout)
}

/// Write a cutout JSON file.
///
/// Compact (non-pretty) JSON: a 100x100 cutout over a sector is tens of
/// megabytes and indentation would roughly double it.
pub fn write_cutout(path: &Path, cutout: &CutoutFile) -> Result<(), CpmError> {
    let file = File::create(path).map_err(|e| {
        CpmError::DataLoad(format!("failed to create cutout '{}': {e}", path.display()))
    })?;
    serde_json::to_writer(file, cutout).map_err(|e| {
        CpmError::DataLoad(format!("failed to write cutout '{}': {e}", path.display()))
    })?;
    Ok(())
}
