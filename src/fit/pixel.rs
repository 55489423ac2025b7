//! Per-pixel model composition and fitting.
//!
//! A [`PixelModel`] owns one target pixel, an ordered list of model blocks
//! and the cached result of the latest fit. Composition calls (add/remove
//! blocks, set regularization) invalidate the cache; `holdout_fit_predict`
//! rebuilds everything from the shared cutout data.
//!
//! Units: all fit inputs and outputs are median-subtracted flux, so a value
//! of zero means "at this pixel's typical brightness".

use std::ops::Range;
use std::sync::Arc;

use log::{debug, warn};
use nalgebra::DVector;

use crate::data::CutoutData;
use crate::domain::{CpmSettings, LightCurveKind, PixelCoordinate, PolySettings};
use crate::error::CpmError;
use crate::fit::design::{DEFAULT_CUSTOM_REG, ModelBlock, block_ranges, build_design};
use crate::fit::holdout::{HoldoutSplit, keep_indices};
use crate::fit::predictors::{PredictorSet, select_predictors};
use crate::math::solve_ridge;

/// The strongest CPM predictors of a fitted pixel, ranked by mean absolute
/// regression weight across holdout sections.
#[derive(Debug, Clone)]
pub struct ContributingPixels {
    /// `(coordinate, mean |weight|)`, strongest first.
    pub pixels: Vec<(PixelCoordinate, f64)>,
    /// Row-major grid overlay of the listed pixels.
    pub mask: Vec<bool>,
}

/// Output arrays of one pixel fit, all aligned with the clipped time axis.
#[derive(Debug, Clone)]
pub struct PixelResult {
    split: HoldoutSplit,
    time: Vec<f64>,
    raw: DVector<f64>,
    labels: Vec<String>,
    ranges: Vec<Range<usize>>,
    predictions: Vec<DVector<f64>>,
    combined: DVector<f64>,
    cpm_index: Option<usize>,
    poly_index: Option<usize>,
    cpm_subtracted: Option<DVector<f64>>,
    residual: DVector<f64>,
    weights: Vec<DVector<f64>>,
}

impl PixelResult {
    pub fn split(&self) -> &HoldoutSplit {
        &self.split
    }

    /// Time stamps of the clipped cadence axis.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Median-subtracted target flux the model was fit to.
    pub fn raw(&self) -> &DVector<f64> {
        &self.raw
    }

    pub fn combined_prediction(&self) -> &DVector<f64> {
        &self.combined
    }

    pub fn cpm_prediction(&self) -> Option<&DVector<f64>> {
        self.cpm_index.map(|i| &self.predictions[i])
    }

    pub fn poly_prediction(&self) -> Option<&DVector<f64>> {
        self.poly_index.map(|i| &self.predictions[i])
    }

    pub fn cpm_subtracted_flux(&self) -> Option<&DVector<f64>> {
        self.cpm_subtracted.as_ref()
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    /// Block labels in design-matrix order.
    pub fn block_labels(&self) -> &[String] {
        &self.labels
    }

    /// Per-section weight vectors, one per holdout section, each spanning
    /// every design column.
    pub fn weights(&self) -> &[DVector<f64>] {
        &self.weights
    }

    /// Fetch a light curve by kind. Kinds that need a CPM block fail with
    /// `Precondition` when the fit had none.
    pub fn lightcurve(&self, kind: LightCurveKind) -> Result<&DVector<f64>, CpmError> {
        let missing = |what: &str| {
            CpmError::Precondition(format!("{what} requires a cpm block in the fitted model"))
        };
        match kind {
            LightCurveKind::Raw => Ok(&self.raw),
            LightCurveKind::CombinedPrediction => Ok(&self.combined),
            LightCurveKind::Residual => Ok(&self.residual),
            LightCurveKind::CpmPrediction => {
                self.cpm_prediction().ok_or_else(|| missing("cpm_prediction"))
            }
            LightCurveKind::PolyPrediction => self.poly_prediction().ok_or_else(|| {
                CpmError::Precondition(
                    "poly_prediction requires a poly block in the fitted model".into(),
                )
            }),
            LightCurveKind::CpmSubtractedFlux => self
                .cpm_subtracted
                .as_ref()
                .ok_or_else(|| missing("cpm_subtracted_flux")),
        }
    }

    /// Shift predictions so every section's combined mean matches the
    /// overall target mean, then rebuild the derived series. Holdout models
    /// see no absolute level for their own section, so stitched predictions
    /// can carry per-section offsets; this removes them. A second call is a
    /// no-op because the shifts are already zero.
    fn rescale(&mut self) {
        let target_mean = self.raw.mean();
        let sections: Vec<Range<usize>> = self.split.sections().to_vec();
        for sec in sections {
            let shift = target_mean - self.combined.rows(sec.start, sec.len()).mean();
            self.combined
                .rows_mut(sec.start, sec.len())
                .add_scalar_mut(shift);
            if let Some(idx) = self.cpm_index {
                self.predictions[idx]
                    .rows_mut(sec.start, sec.len())
                    .add_scalar_mut(shift);
            }
        }
        self.residual = &self.raw - &self.combined;
        if let Some(idx) = self.cpm_index {
            self.cpm_subtracted = Some(&self.raw - &self.predictions[idx]);
        }
    }
}

/// One target pixel, its model blocks and the cached latest fit.
#[derive(Debug, Clone)]
pub struct PixelModel {
    data: Arc<CutoutData>,
    target: PixelCoordinate,
    blocks: Vec<ModelBlock>,
    result: Option<PixelResult>,
}

impl PixelModel {
    pub fn new(data: Arc<CutoutData>, target: PixelCoordinate) -> Result<Self, CpmError> {
        if !data.contains(target) {
            return Err(CpmError::Precondition(format!(
                "target pixel ({}, {}) outside the {}x{} grid",
                target.row,
                target.col,
                data.n_rows(),
                data.n_cols()
            )));
        }
        Ok(Self {
            data,
            target,
            blocks: Vec::new(),
            result: None,
        })
    }

    pub fn target(&self) -> PixelCoordinate {
        self.target
    }

    pub fn blocks(&self) -> &[ModelBlock] {
        &self.blocks
    }

    /// Latest fit, if any.
    pub fn result(&self) -> Option<&PixelResult> {
        self.result.as_ref()
    }

    /// Add a CPM block, selecting predictors now. An existing CPM block is
    /// replaced in place, its regularization discarded.
    pub fn add_cpm_model(&mut self, settings: &CpmSettings) -> Result<(), CpmError> {
        let predictors = select_predictors(&self.data, self.target, settings)?;
        let block = ModelBlock::Cpm {
            predictors,
            reg: None,
        };
        self.insert_or_replace(block, ModelBlock::is_cpm);
        Ok(())
    }

    pub fn remove_cpm_model(&mut self) -> Result<(), CpmError> {
        self.remove_block(ModelBlock::is_cpm, "cpm")
    }

    /// Add a polynomial trend block. An existing poly block is replaced in
    /// place, its regularization discarded.
    pub fn add_poly_model(&mut self, settings: &PolySettings) -> Result<(), CpmError> {
        if settings.num_terms == 0 {
            return Err(CpmError::Precondition(
                "poly model needs num_terms >= 1".into(),
            ));
        }
        if !(settings.scale.is_finite() && settings.scale > 0.0) {
            return Err(CpmError::Precondition(format!(
                "poly scale must be finite and > 0, got {}",
                settings.scale
            )));
        }
        let block = ModelBlock::Poly {
            settings: *settings,
            reg: None,
        };
        self.insert_or_replace(block, ModelBlock::is_poly);
        Ok(())
    }

    pub fn remove_poly_model(&mut self) -> Result<(), CpmError> {
        self.remove_block(ModelBlock::is_poly, "poly")
    }

    /// Add a caller-supplied regressor column over the kept cadence axis,
    /// e.g. a known transit shape. Custom blocks accumulate.
    pub fn add_custom_model(&mut self, name: &str, series: &[f64]) -> Result<(), CpmError> {
        self.add_custom_model_with_reg(name, series, DEFAULT_CUSTOM_REG)
    }

    pub fn add_custom_model_with_reg(
        &mut self,
        name: &str,
        series: &[f64],
        reg: f64,
    ) -> Result<(), CpmError> {
        if series.len() != self.data.n_cadences() {
            return Err(CpmError::DataLoad(format!(
                "custom model '{name}' has {} samples but the cutout keeps {} cadences",
                series.len(),
                self.data.n_cadences()
            )));
        }
        if series.iter().any(|v| !v.is_finite()) {
            return Err(CpmError::DataLoad(format!(
                "custom model '{name}' contains non-finite samples"
            )));
        }
        if !(reg.is_finite() && reg >= 0.0) {
            return Err(CpmError::Precondition(
                "regularization values must be finite and >= 0".into(),
            ));
        }
        self.blocks.push(ModelBlock::Custom {
            name: name.into(),
            series: DVector::from_column_slice(series),
            reg,
        });
        self.result = None;
        Ok(())
    }

    /// Assign regularization strengths to the blocks positionally, in
    /// insertion order. A short list is padded with its last value, so a
    /// single value applies uniformly; extra values are ignored with a
    /// warning.
    pub fn set_regs(&mut self, values: &[f64]) -> Result<(), CpmError> {
        if self.blocks.is_empty() {
            return Err(CpmError::Precondition(
                "pixel model has no blocks; add a cpm, poly or custom model first".into(),
            ));
        }
        if values.is_empty() {
            return Err(CpmError::Precondition(
                "set_regs needs at least one value".into(),
            ));
        }
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(CpmError::Precondition(
                "regularization values must be finite and >= 0".into(),
            ));
        }
        if values.len() > self.blocks.len() {
            warn!(
                "set_regs got {} values for {} blocks; extras ignored",
                values.len(),
                self.blocks.len()
            );
        }
        let mut current = values[0];
        for (i, block) in self.blocks.iter_mut().enumerate() {
            if let Some(&v) = values.get(i) {
                current = v;
            }
            block.set_reg(current);
        }
        self.result = None;
        Ok(())
    }

    /// Set the CPM block's regularization alone, leaving other blocks as
    /// they are. Used by the regularization search.
    pub fn set_cpm_reg(&mut self, value: f64) -> Result<(), CpmError> {
        if !(value.is_finite() && value >= 0.0) {
            return Err(CpmError::Precondition(
                "regularization values must be finite and >= 0".into(),
            ));
        }
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.is_cpm())
            .ok_or_else(|| CpmError::Precondition("pixel model has no cpm block".into()))?;
        block.set_reg(value);
        self.result = None;
        Ok(())
    }

    /// Fit `k` contiguous holdout sections and stitch their out-of-sample
    /// predictions. `mask` (true = keep) drops cadences before splitting;
    /// dropped cadences are neither trained on nor predicted.
    pub fn holdout_fit_predict(
        &mut self,
        k: usize,
        mask: Option<&[bool]>,
    ) -> Result<&PixelResult, CpmError> {
        self.result = None;
        if self.blocks.is_empty() {
            return Err(CpmError::Precondition(
                "pixel model has no blocks; add a cpm, poly or custom model first".into(),
            ));
        }
        if !self.data.is_valid_pixel(self.target) {
            return Err(CpmError::SingularSystem(format!(
                "target pixel ({}, {}) has no finite flux",
                self.target.row, self.target.col
            )));
        }
        let keep = keep_indices(self.data.n_cadences(), mask)?;
        let split = HoldoutSplit::new(keep.len(), k)?;
        let (design_full, reg) = build_design(&self.data, &self.blocks)?;
        let design = design_full.select_rows(keep.iter());
        let y_full = self.data.normalized_pixel(self.target);
        let y = DVector::from_iterator(keep.len(), keep.iter().map(|&c| y_full[c]));
        let time: Vec<f64> = keep.iter().map(|&c| self.data.time()[c]).collect();

        let n = keep.len();
        let ranges = block_ranges(&self.blocks);
        let labels: Vec<String> = self.blocks.iter().map(ModelBlock::label).collect();
        let cpm_index = self.blocks.iter().position(ModelBlock::is_cpm);
        let poly_index = self.blocks.iter().position(ModelBlock::is_poly);

        let mut combined = DVector::zeros(n);
        let mut predictions: Vec<DVector<f64>> = vec![DVector::zeros(n); self.blocks.len()];
        let mut weights = Vec::with_capacity(split.k());
        for i in 0..split.k() {
            let train_mask = split.train_mask(i);
            let w = solve_ridge(&design, &y, &reg, &train_mask)?;
            let sec = split.section(i);
            let full = &design * &w;
            combined
                .rows_mut(sec.start, sec.len())
                .copy_from(&full.rows(sec.start, sec.len()));
            for (j, range) in ranges.iter().enumerate() {
                let block_full = design.columns(range.start, range.len())
                    * w.rows(range.start, range.len());
                predictions[j]
                    .rows_mut(sec.start, sec.len())
                    .copy_from(&block_full.rows(sec.start, sec.len()));
            }
            weights.push(w);
        }

        let residual = &y - &combined;
        let cpm_subtracted = cpm_index.map(|idx| &y - &predictions[idx]);
        debug!(
            "pixel ({}, {}): {} sections fit over {} cadences, {} design columns",
            self.target.row,
            self.target.col,
            split.k(),
            n,
            design.ncols()
        );

        let result = PixelResult {
            split,
            time,
            raw: y,
            labels,
            ranges,
            predictions,
            combined,
            cpm_index,
            poly_index,
            cpm_subtracted,
            residual,
            weights,
        };
        Ok(self.result.insert(result))
    }

    /// Remove per-section offsets from the stitched predictions. See
    /// [`PixelResult`] internals; idempotent.
    pub fn rescale(&mut self) -> Result<(), CpmError> {
        let result = self.result.as_mut().ok_or_else(|| {
            CpmError::Precondition("rescale needs a fit; call holdout_fit_predict first".into())
        })?;
        result.rescale();
        Ok(())
    }

    /// Top-`n` CPM predictors of the latest fit by mean absolute weight.
    pub fn contributing_pixels(&self, n: usize) -> Result<ContributingPixels, CpmError> {
        let result = self.result.as_ref().ok_or_else(|| {
            CpmError::Precondition(
                "contributing_pixels needs a fit; call holdout_fit_predict first".into(),
            )
        })?;
        let cpm_idx = result
            .cpm_index
            .ok_or_else(|| CpmError::Precondition("pixel model has no cpm block".into()))?;
        let predictors = match &self.blocks[cpm_idx] {
            ModelBlock::Cpm { predictors, .. } => predictors.pixels(),
            _ => {
                return Err(CpmError::Precondition(
                    "cached fit no longer matches the model blocks".into(),
                ));
            }
        };

        let range = result.ranges[cpm_idx].clone();
        let k = result.weights.len() as f64;
        let mut scores = vec![0.0; range.len()];
        for w in &result.weights {
            for (j, score) in scores.iter_mut().enumerate() {
                *score += w[range.start + j].abs() / k;
            }
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let pixels: Vec<(PixelCoordinate, f64)> = order
            .into_iter()
            .take(n)
            .map(|j| (predictors[j], scores[j]))
            .collect();
        let mut mask = vec![false; self.data.n_pixels()];
        for (pixel, _) in &pixels {
            mask[pixel.linear_index(self.data.n_cols())] = true;
        }
        Ok(ContributingPixels { pixels, mask })
    }

    /// Grid overlay with only the target pixel set.
    pub fn target_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.data.n_pixels()];
        mask[self.target.linear_index(self.data.n_cols())] = true;
        mask
    }

    /// Grid overlay of the CPM exclusion region.
    pub fn exclusion_mask(&self) -> Result<&[bool], CpmError> {
        Ok(self.predictor_set()?.exclusion_mask())
    }

    /// Grid overlay of the selected CPM predictors.
    pub fn predictor_mask(&self) -> Result<Vec<bool>, CpmError> {
        Ok(self.predictor_set()?.predictor_mask())
    }

    fn predictor_set(&self) -> Result<&PredictorSet, CpmError> {
        self.blocks
            .iter()
            .find_map(|b| match b {
                ModelBlock::Cpm { predictors, .. } => Some(predictors),
                _ => None,
            })
            .ok_or_else(|| CpmError::Precondition("pixel model has no cpm block".into()))
    }

    fn insert_or_replace(&mut self, block: ModelBlock, matches: fn(&ModelBlock) -> bool) {
        match self.blocks.iter_mut().find(|b| matches(b)) {
            Some(existing) => *existing = block,
            None => self.blocks.push(block),
        }
        self.result = None;
    }

    fn remove_block(
        &mut self,
        matches: fn(&ModelBlock) -> bool,
        label: &str,
    ) -> Result<(), CpmError> {
        let idx = self
            .blocks
            .iter()
            .position(matches)
            .ok_or_else(|| CpmError::Precondition(format!("no {label} block to remove")))?;
        self.blocks.remove(idx);
        self.result = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ImageCube, SyntheticSettings, generate_cutout};
    use crate::math::{mean, median};

    fn shared_systematics_data() -> Arc<CutoutData> {
        let settings = SyntheticSettings {
            n_cadences: 100,
            n_rows: 10,
            n_cols: 10,
            noise_sigma: 0.5,
            systematic_amplitude: 40.0,
            seed: 11,
            ..SyntheticSettings::default()
        };
        let cube = generate_cutout(&settings).unwrap();
        Arc::new(CutoutData::new(cube, true).unwrap())
    }

    fn data_from_fn(
        n_cadences: usize,
        n_rows: usize,
        n_cols: usize,
        f: impl Fn(usize, usize, usize) -> f64,
    ) -> Arc<CutoutData> {
        let time: Vec<f64> = (0..n_cadences).map(|t| 1500.0 + t as f64 * 0.02).collect();
        let mut flux = Vec::new();
        for t in 0..n_cadences {
            for r in 0..n_rows {
                for c in 0..n_cols {
                    flux.push(f(t, r, c));
                }
            }
        }
        let cube = ImageCube::new(time, flux, n_rows, n_cols, vec![]).unwrap();
        Arc::new(CutoutData::new(cube, true).unwrap())
    }

    fn mean_square(v: &DVector<f64>) -> f64 {
        v.iter().map(|x| x * x).sum::<f64>() / v.len() as f64
    }

    #[test]
    fn cpm_detrend_beats_raw_scatter() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(5, 5)).unwrap();
        model
            .add_cpm_model(&CpmSettings {
                exclusion_size: 2,
                n_predictors: 3,
                ..CpmSettings::default()
            })
            .unwrap();
        model.set_regs(&[0.01]).unwrap();
        let result = model.holdout_fit_predict(5, None).unwrap();

        let raw_mean = result.raw().mean();
        let centered = result.raw().map(|v| v - raw_mean);
        let residual_ms = mean_square(result.residual());
        assert!(
            residual_ms < mean_square(&centered),
            "residual scatter {residual_ms} should beat raw scatter {}",
            mean_square(&centered)
        );
    }

    #[test]
    fn poly_block_recovers_a_linear_trend() {
        // Target drifts linearly; a 2-term Chebyshev basis spans that exactly,
        // so even out-of-sample prediction should be near perfect.
        let data = data_from_fn(80, 6, 6, |t, r, c| {
            let drift = if (r, c) == (2, 2) { 0.5 * t as f64 } else { 0.0 };
            200.0 + drift + (r * 6 + c) as f64
        });
        let mut model = PixelModel::new(data, PixelCoordinate::new(2, 2)).unwrap();
        model.add_poly_model(&PolySettings::default()).unwrap();
        model.set_regs(&[0.0]).unwrap();
        let result = model.holdout_fit_predict(4, None).unwrap();
        let worst = result.residual().amax();
        assert!(worst < 1e-6, "max |residual| = {worst}");
    }

    #[test]
    fn custom_block_absorbs_a_known_pattern() {
        let pattern = |t: usize| (t as f64 * 0.37).sin() * 4.0;
        let data = data_from_fn(60, 6, 6, |t, r, c| {
            let wiggle = if (r, c) == (3, 3) { pattern(t) } else { 0.0 };
            150.0 + wiggle + (r + c) as f64
        });
        let raw: Vec<f64> = (0..60).map(pattern).collect();
        let med = median(&raw).unwrap();
        let series: Vec<f64> = raw.iter().map(|v| v - med).collect();

        let mut model = PixelModel::new(data, PixelCoordinate::new(3, 3)).unwrap();
        model.add_custom_model("wiggle", &series).unwrap();
        let result = model.holdout_fit_predict(3, None).unwrap();
        assert!(result.residual().amax() < 1e-6);
        assert_eq!(result.block_labels(), ["custom:wiggle"]);
    }

    #[test]
    fn set_regs_pads_with_the_last_value() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(4, 4)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 6,
            ..CpmSettings::default()
        })
        .unwrap();
        model.add_poly_model(&PolySettings::default()).unwrap();
        model.add_custom_model("flat", &vec![0.0; 100]).unwrap();

        model.set_regs(&[0.5, 0.25]).unwrap();
        let regs: Vec<Option<f64>> = model.blocks().iter().map(ModelBlock::reg).collect();
        assert_eq!(regs, vec![Some(0.5), Some(0.25), Some(0.25)]);

        assert!(matches!(
            model.set_regs(&[]),
            Err(CpmError::Precondition(_))
        ));

        let mut empty = PixelModel::new(shared_systematics_data(), PixelCoordinate::new(0, 0))
            .unwrap();
        assert!(matches!(
            empty.set_regs(&[1.0]),
            Err(CpmError::Precondition(_))
        ));
    }

    #[test]
    fn fitting_with_unset_regs_is_rejected() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(4, 4)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 6,
            ..CpmSettings::default()
        })
        .unwrap();
        match model.holdout_fit_predict(5, None) {
            Err(CpmError::Precondition(msg)) => assert!(msg.contains("set_regs")),
            other => panic!("expected Precondition, got {other:?}"),
        }
    }

    #[test]
    fn fit_result_arrays_align_with_the_clipped_axis() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(2, 7)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 8,
            ..CpmSettings::default()
        })
        .unwrap();
        model.set_regs(&[0.1]).unwrap();

        let mut mask = vec![true; 100];
        for c in 40..50 {
            mask[c] = false;
        }
        let result = model.holdout_fit_predict(5, Some(&mask)).unwrap();
        assert_eq!(result.time().len(), 90);
        assert_eq!(result.raw().len(), 90);
        assert_eq!(result.combined_prediction().len(), 90);
        assert_eq!(result.weights().len(), 5);
        assert!(result.combined_prediction().iter().all(|v| v.is_finite()));
        // The masked stretch is gone from the time axis entirely.
        let step = result.time()[1] - result.time()[0];
        let gap = result.time()[40] - result.time()[39];
        assert!(gap > 5.0 * step);
    }

    #[test]
    fn rescale_centers_every_section_and_is_idempotent() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(6, 3)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 10,
            ..CpmSettings::default()
        })
        .unwrap();
        model.set_regs(&[0.5]).unwrap();
        model.holdout_fit_predict(5, None).unwrap();
        model.rescale().unwrap();

        let result = model.result().unwrap();
        let target_mean = result.raw().mean();
        for sec in result.split().sections() {
            let sec_mean = mean(&result.combined_prediction().as_slice()[sec.clone()]).unwrap();
            assert!((sec_mean - target_mean).abs() < 1e-9);
        }
        // cpm_subtracted stays consistent with the shifted cpm prediction.
        let cpm = result.cpm_prediction().unwrap();
        let sub = result.lightcurve(LightCurveKind::CpmSubtractedFlux).unwrap();
        for i in 0..result.raw().len() {
            assert!((sub[i] - (result.raw()[i] - cpm[i])).abs() < 1e-12);
        }

        let before = result.combined_prediction().clone();
        model.rescale().unwrap();
        let after = model.result().unwrap().combined_prediction().clone();
        assert!((before - after).amax() < 1e-12);
    }

    #[test]
    fn rescale_before_any_fit_is_rejected() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(1, 1)).unwrap();
        assert!(matches!(model.rescale(), Err(CpmError::Precondition(_))));
    }

    #[test]
    fn contributing_pixels_finds_the_coupled_predictor() {
        // Target copies pixel (7,7)'s wave; other pixels carry unrelated ones.
        let data = data_from_fn(64, 8, 8, |t, r, c| {
            let phase = t as f64 * std::f64::consts::TAU / 32.0;
            match (r, c) {
                (1, 1) | (7, 7) => 100.0 + 5.0 * phase.sin(),
                _ => 100.0 + ((r * 8 + c) as f64 * 0.9 + phase * ((r + c) % 3) as f64).cos(),
            }
        });
        let mut model = PixelModel::new(data, PixelCoordinate::new(1, 1)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 6,
            ..CpmSettings::default()
        })
        .unwrap();
        model.set_regs(&[1e-4]).unwrap();
        model.holdout_fit_predict(4, None).unwrap();

        let top = model.contributing_pixels(1).unwrap();
        assert_eq!(top.pixels[0].0, PixelCoordinate::new(7, 7));
        assert!(top.mask[PixelCoordinate::new(7, 7).linear_index(8)]);
        assert_eq!(top.mask.iter().filter(|&&m| m).count(), 1);
    }

    #[test]
    fn dead_target_pixel_fails_as_singular() {
        let n_cadences = 40;
        let time: Vec<f64> = (0..n_cadences).map(|t| 1500.0 + t as f64 * 0.02).collect();
        let mut flux = Vec::new();
        for t in 0..n_cadences {
            for p in 0..36 {
                let v = 80.0 + (t as f64 * 0.2 + p as f64).sin();
                flux.push(if p == 0 && t == 3 { f64::NAN } else { v });
            }
        }
        let cube = ImageCube::new(time, flux, 6, 6, vec![]).unwrap();
        let data = Arc::new(CutoutData::new(cube, true).unwrap());

        let mut model = PixelModel::new(data, PixelCoordinate::new(0, 0)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 1,
            n_predictors: 4,
            ..CpmSettings::default()
        })
        .unwrap();
        model.set_regs(&[0.1]).unwrap();
        assert!(matches!(
            model.holdout_fit_predict(4, None),
            Err(CpmError::SingularSystem(_))
        ));
    }

    #[test]
    fn composition_mutations_invalidate_the_cached_result() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(3, 3)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 5,
            ..CpmSettings::default()
        })
        .unwrap();
        model.set_regs(&[0.1]).unwrap();
        model.holdout_fit_predict(4, None).unwrap();
        assert!(model.result().is_some());

        model.add_poly_model(&PolySettings::default()).unwrap();
        assert!(model.result().is_none());
    }

    #[test]
    fn duplicate_cpm_blocks_replace_in_place() {
        let data = shared_systematics_data();
        let mut model = PixelModel::new(data, PixelCoordinate::new(5, 2)).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 5,
            ..CpmSettings::default()
        })
        .unwrap();
        model.add_poly_model(&PolySettings::default()).unwrap();
        model.add_cpm_model(&CpmSettings {
            exclusion_size: 2,
            n_predictors: 9,
            ..CpmSettings::default()
        })
        .unwrap();

        assert_eq!(model.blocks().len(), 2);
        assert_eq!(model.blocks()[0].n_columns(), 9);
        assert!(model.blocks()[0].is_cpm());
    }
}
