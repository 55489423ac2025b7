//! Cutout data: the validated image-cube time series every fit reads from.
//!
//! Two layers:
//!
//! - [`ImageCube`]: raw input (times, flux frames, quality flags), strictly
//!   shape-checked on construction.
//! - [`CutoutData`]: the fitting view. Flagged cadences are dropped (never
//!   interpolated), per-pixel medians are subtracted, and pixels with
//!   non-finite samples are marked invalid so they stay out of predictor
//!   pools.
//!
//! The flux cube is stored as a `T x (R*C)` matrix with pixels linearized
//! row-major, so one pixel's full light curve is a contiguous column.

use std::path::Path;

use log::{info, warn};
use nalgebra::{DMatrix, DVectorView};

use crate::domain::PixelCoordinate;
use crate::error::CpmError;
use crate::io::cutout_file::{CutoutFile, read_cutout};
use crate::math::median;

/// A raw cutout cube, validated but otherwise untouched.
#[derive(Debug, Clone)]
pub struct ImageCube {
    time: Vec<f64>,
    /// `T x (R*C)`, pixels linearized row-major.
    flux: DMatrix<f64>,
    n_rows: usize,
    n_cols: usize,
    quality: Vec<u32>,
}

impl ImageCube {
    /// Build a cube from flattened samples (`flux[t*R*C + r*C + c]`).
    ///
    /// `quality` must be one flag per cadence, or empty when no quality
    /// information exists.
    pub fn new(
        time: Vec<f64>,
        flux: Vec<f64>,
        n_rows: usize,
        n_cols: usize,
        quality: Vec<u32>,
    ) -> Result<Self, CpmError> {
        let n_cadences = time.len();
        if n_cadences == 0 {
            return Err(CpmError::DataLoad("cutout has no cadences".into()));
        }
        if n_rows == 0 || n_cols == 0 {
            return Err(CpmError::DataLoad(format!(
                "cutout grid must be non-empty, got {n_rows}x{n_cols}"
            )));
        }
        let n_pixels = n_rows * n_cols;
        if flux.len() != n_cadences * n_pixels {
            return Err(CpmError::DataLoad(format!(
                "flux has {} samples but {n_cadences} cadences x {n_pixels} pixels need {}",
                flux.len(),
                n_cadences * n_pixels
            )));
        }
        let quality = if quality.is_empty() {
            vec![0; n_cadences]
        } else if quality.len() == n_cadences {
            quality
        } else {
            return Err(CpmError::DataLoad(format!(
                "quality has {} flags for {n_cadences} cadences",
                quality.len()
            )));
        };
        if time.iter().any(|t| !t.is_finite()) {
            return Err(CpmError::DataLoad("time axis contains non-finite values".into()));
        }

        let flux = DMatrix::from_row_iterator(n_cadences, n_pixels, flux);
        Ok(Self {
            time,
            flux,
            n_rows,
            n_cols,
            quality,
        })
    }

    pub fn from_file(cutout: CutoutFile) -> Result<Self, CpmError> {
        Self::new(
            cutout.time,
            cutout.flux,
            cutout.n_rows,
            cutout.n_cols,
            cutout.quality,
        )
    }

    pub fn n_cadences(&self) -> usize {
        self.time.len()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }
}

/// The cleaned, median-normalized cutout every model fits against.
#[derive(Debug, Clone)]
pub struct CutoutData {
    time: Vec<f64>,
    /// Kept cadences x pixels, raw flux.
    flux: DMatrix<f64>,
    /// Kept cadences x pixels, `flux - per-pixel median`.
    norm_flux: DMatrix<f64>,
    /// Per-pixel median of the kept cadences (NaN for invalid pixels).
    flux_medians: Vec<f64>,
    /// Pixels whose kept samples and median are all finite.
    valid_pixel: Vec<bool>,
    /// Over the original cadence axis: which cadences were kept.
    valid_cadence: Vec<bool>,
    n_rows: usize,
    n_cols: usize,
}

impl CutoutData {
    /// Clean a cube. When `remove_bad` is set, cadences with nonzero quality
    /// are dropped from the time and flux arrays system-wide.
    pub fn new(cube: ImageCube, remove_bad: bool) -> Result<Self, CpmError> {
        let n_pixels = cube.n_rows * cube.n_cols;
        let valid_cadence: Vec<bool> = if remove_bad {
            cube.quality.iter().map(|&q| q == 0).collect()
        } else {
            vec![true; cube.time.len()]
        };
        let kept: Vec<usize> = valid_cadence
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        if kept.is_empty() {
            return Err(CpmError::DataLoad(
                "every cadence is flagged bad; nothing to fit".into(),
            ));
        }
        let n_removed = cube.time.len() - kept.len();
        if n_removed > 0 {
            info!(
                "removed {n_removed} flagged cadences, {} remain",
                kept.len()
            );
        }

        let time: Vec<f64> = kept.iter().map(|&i| cube.time[i]).collect();
        let flux = cube.flux.select_rows(kept.iter());

        let mut flux_medians = Vec::with_capacity(n_pixels);
        let mut valid_pixel = Vec::with_capacity(n_pixels);
        for p in 0..n_pixels {
            let column = flux.column(p);
            let samples = column.as_slice();
            let all_finite = samples.iter().all(|v| v.is_finite());
            match median(samples) {
                Some(med) if all_finite => {
                    flux_medians.push(med);
                    valid_pixel.push(true);
                }
                _ => {
                    flux_medians.push(f64::NAN);
                    valid_pixel.push(false);
                }
            }
        }
        let n_invalid = valid_pixel.iter().filter(|v| !**v).count();
        if n_invalid > 0 {
            warn!("{n_invalid} pixels contain non-finite flux; they are excluded from predictor pools");
        }

        let norm_flux = DMatrix::from_fn(flux.nrows(), n_pixels, |i, p| {
            if valid_pixel[p] {
                flux[(i, p)] - flux_medians[p]
            } else {
                f64::NAN
            }
        });

        Ok(Self {
            time,
            flux,
            norm_flux,
            flux_medians,
            valid_pixel,
            valid_cadence,
            n_rows: cube.n_rows,
            n_cols: cube.n_cols,
        })
    }

    /// Load a cutout JSON file and clean it.
    pub fn load(path: &Path, remove_bad: bool) -> Result<Self, CpmError> {
        let cube = ImageCube::from_file(read_cutout(path)?)?;
        info!(
            "loaded cutout '{}': {} cadences, {}x{} pixels",
            path.display(),
            cube.n_cadences(),
            cube.n_rows(),
            cube.n_cols()
        );
        Self::new(cube, remove_bad)
    }

    /// Number of kept cadences.
    pub fn n_cadences(&self) -> usize {
        self.time.len()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn n_pixels(&self) -> usize {
        self.n_rows * self.n_cols
    }

    pub fn contains(&self, pixel: PixelCoordinate) -> bool {
        pixel.row < self.n_rows && pixel.col < self.n_cols
    }

    /// Kept-cadence time axis.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Kept cadences x pixels, raw flux.
    pub fn flux(&self) -> &DMatrix<f64> {
        &self.flux
    }

    /// Kept cadences x pixels, median-subtracted flux.
    pub fn normalized_flux(&self) -> &DMatrix<f64> {
        &self.norm_flux
    }

    /// One pixel's median-subtracted light curve.
    pub fn normalized_pixel(&self, pixel: PixelCoordinate) -> DVectorView<'_, f64> {
        self.norm_flux.column(pixel.linear_index(self.n_cols))
    }

    /// One pixel's raw light curve.
    pub fn raw_pixel(&self, pixel: PixelCoordinate) -> DVectorView<'_, f64> {
        self.flux.column(pixel.linear_index(self.n_cols))
    }

    /// Per-pixel medians over the kept cadences, NaN where invalid.
    pub fn flux_medians(&self) -> &[f64] {
        &self.flux_medians
    }

    pub fn flux_median(&self, pixel: PixelCoordinate) -> f64 {
        self.flux_medians[pixel.linear_index(self.n_cols)]
    }

    pub fn is_valid_pixel(&self, pixel: PixelCoordinate) -> bool {
        self.valid_pixel[pixel.linear_index(self.n_cols)]
    }

    /// Kept/dropped mask over the original cadence axis.
    pub fn valid_cadence(&self) -> &[bool] {
        &self.valid_cadence
    }
}
