//! Predictor pixel selection.
//!
//! A CPM fit predicts the target pixel from pixels that cannot see the
//! target star's light. Selection runs in two stages:
//!
//! 1. build the exclusion region around the target (PSF light leaks to
//!    nearby pixels, and charge bleed leaks along rows/columns)
//! 2. pick `n` predictors from the remaining valid pixels, either ranked by
//!    light-curve similarity or sampled at random
//!
//! Both stages are deterministic: similarity ties break by linear pixel
//! index and random sampling is seeded.

use std::cmp::Ordering;

use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::data::CutoutData;
use crate::domain::{CpmSettings, ExclusionMethod, PixelCoordinate, PredictorMethod};
use crate::error::CpmError;

/// Seed used for random selection when the caller supplies none, so repeat
/// runs stay reproducible.
const FALLBACK_SEED: u64 = 0;

/// An ordered predictor set plus the masks image consumers overlay.
#[derive(Debug, Clone)]
pub struct PredictorSet {
    target: PixelCoordinate,
    pixels: Vec<PixelCoordinate>,
    exclusion_mask: Vec<bool>,
    n_rows: usize,
    n_cols: usize,
}

impl PredictorSet {
    /// Selected predictors. For similarity selection the order is the
    /// similarity ranking; for random selection it is the sample order.
    pub fn pixels(&self) -> &[PixelCoordinate] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn target(&self) -> PixelCoordinate {
        self.target
    }

    /// Row-major grid mask of the exclusion region.
    pub fn exclusion_mask(&self) -> &[bool] {
        &self.exclusion_mask
    }

    /// Row-major grid mask of the selected predictors.
    pub fn predictor_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_rows * self.n_cols];
        for pixel in &self.pixels {
            mask[pixel.linear_index(self.n_cols)] = true;
        }
        mask
    }

    /// Row-major grid mask with only the target set.
    pub fn target_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_rows * self.n_cols];
        mask[self.target.linear_index(self.n_cols)] = true;
        mask
    }
}

/// Choose predictor pixels for `target` according to `settings`.
pub fn select_predictors(
    data: &CutoutData,
    target: PixelCoordinate,
    settings: &CpmSettings,
) -> Result<PredictorSet, CpmError> {
    if !data.contains(target) {
        return Err(CpmError::Precondition(format!(
            "target pixel ({}, {}) outside the {}x{} grid",
            target.row,
            target.col,
            data.n_rows(),
            data.n_cols()
        )));
    }
    if settings.n_predictors == 0 {
        return Err(CpmError::Precondition(
            "n_predictors must be at least 1".into(),
        ));
    }

    let n_rows = data.n_rows();
    let n_cols = data.n_cols();
    let exclusion_mask = exclusion_mask(
        n_rows,
        n_cols,
        target,
        settings.exclusion_method,
        settings.exclusion_size,
    );

    let candidates: Vec<PixelCoordinate> = (0..n_rows * n_cols)
        .filter(|&p| !exclusion_mask[p])
        .map(|p| PixelCoordinate::from_linear(p, n_cols))
        .filter(|&pixel| pixel != target && data.is_valid_pixel(pixel))
        .collect();

    if candidates.len() < settings.n_predictors {
        return Err(CpmError::InsufficientPredictors {
            requested: settings.n_predictors,
            available: candidates.len(),
        });
    }

    let pixels = match settings.predictor_method {
        PredictorMethod::CosineSimilarity => {
            rank_by_similarity(data, target, candidates.clone(), settings.n_predictors)
        }
        PredictorMethod::Random => {
            let mut rng = StdRng::seed_from_u64(settings.seed.unwrap_or(FALLBACK_SEED));
            rand::seq::index::sample(&mut rng, candidates.len(), settings.n_predictors)
                .iter()
                .map(|i| candidates[i])
                .collect()
        }
    };
    debug!(
        "target ({}, {}): {} predictors selected from {} candidates",
        target.row,
        target.col,
        pixels.len(),
        candidates.len()
    );

    Ok(PredictorSet {
        target,
        pixels,
        exclusion_mask,
        n_rows,
        n_cols,
    })
}

fn exclusion_mask(
    n_rows: usize,
    n_cols: usize,
    target: PixelCoordinate,
    method: ExclusionMethod,
    size: usize,
) -> Vec<bool> {
    let mut mask = vec![false; n_rows * n_cols];
    for row in 0..n_rows {
        for col in 0..n_cols {
            let pixel = PixelCoordinate::new(row, col);
            let excluded = match method {
                ExclusionMethod::Closest => pixel.chebyshev_distance(target) <= size,
                ExclusionMethod::Cross => {
                    pixel.row.abs_diff(target.row) <= size
                        || pixel.col.abs_diff(target.col) <= size
                }
            };
            if excluded {
                mask[pixel.linear_index(n_cols)] = true;
            }
        }
    }
    mask
}

fn rank_by_similarity(
    data: &CutoutData,
    target: PixelCoordinate,
    candidates: Vec<PixelCoordinate>,
    n: usize,
) -> Vec<PixelCoordinate> {
    let target_series = data.normalized_pixel(target);
    let target_norm = target_series.norm();

    let mut ranked: Vec<(f64, usize, PixelCoordinate)> = candidates
        .into_iter()
        .map(|pixel| {
            let series = data.normalized_pixel(pixel);
            let denom = target_norm * series.norm();
            // A zero-norm series has no direction to compare; rank it last.
            let similarity = if denom > 0.0 {
                target_series.dot(&series) / denom
            } else {
                f64::NEG_INFINITY
            };
            (similarity, pixel.linear_index(data.n_cols()), pixel)
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
    ranked.into_iter().take(n).map(|(_, _, pixel)| pixel).collect()
}
