//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory while composing and fitting pixel models
//! - exported to JSON/CSV alongside light curves
//! - reloaded later by plotting or notebook collaborators

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// A pixel position in cutout coordinates: `(row, col)` with the origin at
/// the lower-left corner of the cutout, matching the FITS convention the
/// cutout services use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelCoordinate {
    pub row: usize,
    pub col: usize,
}

impl PixelCoordinate {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Row-major linear index within a grid `n_cols` wide.
    ///
    /// This is the column index of the pixel's time series in the flux
    /// matrix, so a pixel's full light curve is one contiguous column.
    pub fn linear_index(self, n_cols: usize) -> usize {
        self.row * n_cols + self.col
    }

    /// Inverse of [`linear_index`](Self::linear_index).
    pub fn from_linear(index: usize, n_cols: usize) -> Self {
        Self {
            row: index / n_cols,
            col: index % n_cols,
        }
    }

    /// Chebyshev (L-infinity) distance to another pixel: the side length of
    /// the smallest centered square containing both.
    pub fn chebyshev_distance(self, other: Self) -> usize {
        let dr = self.row.abs_diff(other.row);
        let dc = self.col.abs_diff(other.col);
        dr.max(dc)
    }
}

/// Shape of the exclusion region around a target pixel.
///
/// Predictor pixels must never be chosen from the exclusion region: pixels
/// near the target share the target star's light through the instrument PSF,
/// and a predictor that sees the signal would regress it away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionMethod {
    /// Square exclusion: all pixels within Chebyshev distance
    /// `exclusion_size` of the target.
    Closest,
    /// Cross-shaped exclusion: full rows and columns within
    /// `exclusion_size` of the target's row/column. Guards against
    /// charge-bleed trails along detector rows and columns.
    Cross,
}

/// How predictor pixels are chosen from the candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorMethod {
    /// Rank candidates by cosine similarity of their normalized light curve
    /// to the target's and keep the top `n`. Deterministic: similarity ties
    /// break by linear pixel index.
    CosineSimilarity,
    /// Uniform sample of `n` candidates without replacement, driven by the
    /// seed in [`CpmSettings`].
    Random,
}

/// The per-pixel light-curve kinds a fit produces.
///
/// [`field_name`](Self::field_name) gives the stable column name each kind
/// exports under; plotting collaborators address result arrays by those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightCurveKind {
    /// The median-subtracted target flux the model was fit to.
    Raw,
    /// Out-of-sample prediction of the CPM block alone.
    CpmPrediction,
    /// Out-of-sample prediction of the polynomial block alone.
    PolyPrediction,
    /// Out-of-sample prediction of all blocks combined.
    CombinedPrediction,
    /// `raw - cpm_prediction`: systematics removed, astrophysics kept.
    CpmSubtractedFlux,
    /// `raw - combined_prediction`.
    Residual,
}

impl LightCurveKind {
    /// Stable field name used in exports and logs. `Raw` exports as
    /// `target_flux`: the column holds the target's flux, not a model output.
    pub fn field_name(self) -> &'static str {
        match self {
            LightCurveKind::Raw => "target_flux",
            LightCurveKind::CpmPrediction => "cpm_prediction",
            LightCurveKind::PolyPrediction => "poly_prediction",
            LightCurveKind::CombinedPrediction => "combined_prediction",
            LightCurveKind::CpmSubtractedFlux => "cpm_subtracted_flux",
            LightCurveKind::Residual => "residual",
        }
    }
}

/// Configuration for a CPM model block.
///
/// The defaults match the values that work well for TESS full-frame-image
/// cutouts: a 21x21 pixel exclusion square and 256 predictors chosen by
/// cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpmSettings {
    /// Half-width of the exclusion region in pixels.
    pub exclusion_size: usize,
    pub exclusion_method: ExclusionMethod,
    /// Number of predictor pixels to select.
    pub n_predictors: usize,
    pub predictor_method: PredictorMethod,
    /// Seed for [`PredictorMethod::Random`]. `None` falls back to a fixed
    /// seed so selection stays reproducible.
    pub seed: Option<u64>,
}

impl Default for CpmSettings {
    fn default() -> Self {
        Self {
            exclusion_size: 10,
            exclusion_method: ExclusionMethod::Closest,
            n_predictors: 256,
            predictor_method: PredictorMethod::CosineSimilarity,
            seed: None,
        }
    }
}

/// Configuration for a polynomial model block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolySettings {
    /// Stretch applied to the centered unit time axis before evaluating the
    /// basis. The default `2.0` maps the full baseline onto `[-1, 1]`.
    pub scale: f64,
    /// Number of Chebyshev terms (`T_0 .. T_{num_terms-1}`), so the highest
    /// polynomial degree is `num_terms - 1`.
    pub num_terms: usize,
}

impl Default for PolySettings {
    fn default() -> Self {
        Self {
            scale: 2.0,
            num_terms: 4,
        }
    }
}

/// Configuration for aperture-level outlier detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierSettings {
    /// Which per-pixel light curve to sum and clip.
    pub kind: LightCurveKind,
    /// Width of the running median filter (cadences).
    pub window: usize,
    /// Clip threshold for positive deviations, in sigma.
    pub sigma_upper: f64,
    /// Clip threshold for negative deviations, in sigma.
    pub sigma_lower: f64,
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            kind: LightCurveKind::CpmSubtractedFlux,
            window: 50,
            sigma_upper: 5.0,
            sigma_lower: 5.0,
        }
    }
}

impl OutlierSettings {
    /// Symmetric clip: the same threshold on both sides.
    pub fn with_sigma(sigma: f64) -> Self {
        Self {
            sigma_upper: sigma,
            sigma_lower: sigma,
            ..Self::default()
        }
    }
}

/// A rectangular pixel aperture, half-open in both axes.
///
/// The grid of fitted pixel models always covers the full rectangle; the
/// aperture doubles as the photometric mask consumers overlay on cutout
/// images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aperture {
    /// Row bounds `[start, end)` in cutout coordinates.
    pub rows: Range<usize>,
    /// Column bounds `[start, end)` in cutout coordinates.
    pub cols: Range<usize>,
}

impl Aperture {
    pub fn new(rows: Range<usize>, cols: Range<usize>) -> Self {
        Self { rows, cols }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.end.saturating_sub(self.rows.start)
    }

    pub fn n_cols(&self) -> usize {
        self.cols.end.saturating_sub(self.cols.start)
    }

    pub fn n_pixels(&self) -> usize {
        self.n_rows() * self.n_cols()
    }

    pub fn contains(&self, pixel: PixelCoordinate) -> bool {
        self.rows.contains(&pixel.row) && self.cols.contains(&pixel.col)
    }

    /// Pixels of the rectangle in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = PixelCoordinate> + '_ {
        self.rows
            .clone()
            .flat_map(|row| self.cols.clone().map(move |col| PixelCoordinate::new(row, col)))
    }

    /// Boolean overlay over the full cutout grid, row-major.
    pub fn grid_mask(&self, n_rows: usize, n_cols: usize) -> Vec<bool> {
        let mut mask = vec![false; n_rows * n_cols];
        for pixel in self.pixels() {
            if pixel.row < n_rows && pixel.col < n_cols {
                mask[pixel.linear_index(n_cols)] = true;
            }
        }
        mask
    }
}
