//! One source on the detector: a cutout, an aperture and its pixel models.
//!
//! `Source` is the top of the API. It owns one [`PixelModel`] per aperture
//! pixel and broadcasts composition calls across them, so every pixel is
//! detrended with identical settings. Fitting fans out in parallel; each
//! model touches only its own state and the shared cutout is read-only, so
//! results match sequential execution exactly.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::CutoutData;
use crate::domain::{Aperture, CpmSettings, LightCurveKind, PixelCoordinate, PolySettings};
use crate::error::CpmError;
use crate::fit::{HoldoutSplit, PixelModel};

/// A time/flux pair. Flux is summed median-subtracted flux over the
/// aperture, so zero means "the aperture at its typical brightness".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightCurve {
    pub time: Vec<f64>,
    pub flux: Vec<f64>,
}

/// Outcome of an aperture-wide fit. Pixels whose regression could not be
/// solved are reported here instead of aborting the rest of the grid.
#[derive(Debug)]
pub struct FitReport {
    /// Number of pixels fit successfully.
    pub fitted: usize,
    /// Pixels skipped with the solver error that stopped them.
    pub failures: Vec<(PixelCoordinate, CpmError)>,
}

impl FitReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A target star's cutout plus the aperture grid of pixel models.
#[derive(Debug, Clone)]
pub struct Source {
    data: Arc<CutoutData>,
    aperture: Option<Aperture>,
    models: Vec<PixelModel>,
}

impl Source {
    pub fn new(data: CutoutData) -> Self {
        Self {
            data: Arc::new(data),
            aperture: None,
            models: Vec::new(),
        }
    }

    /// Load the JSON cutout interchange format from disk.
    pub fn from_path(path: &Path, remove_bad: bool) -> Result<Self, CpmError> {
        Ok(Self::new(CutoutData::load(path, remove_bad)?))
    }

    pub fn data(&self) -> &CutoutData {
        &self.data
    }

    pub fn aperture(&self) -> Option<&Aperture> {
        self.aperture.as_ref()
    }

    /// Aperture overlay over the full grid, if an aperture is set.
    pub fn aperture_mask(&self) -> Option<Vec<bool>> {
        self.aperture
            .as_ref()
            .map(|a| a.grid_mask(self.data.n_rows(), self.data.n_cols()))
    }

    pub fn models(&self) -> &[PixelModel] {
        &self.models
    }

    /// The model for one aperture pixel, if the aperture covers it.
    pub fn model(&self, pixel: PixelCoordinate) -> Option<&PixelModel> {
        self.models.iter().find(|m| m.target() == pixel)
    }

    /// Choose the aperture rectangle (half-open bounds) and build one pixel
    /// model per covered pixel. Replaces any previous aperture and models.
    pub fn set_aperture(&mut self, rows: Range<usize>, cols: Range<usize>) -> Result<(), CpmError> {
        let aperture = Aperture::new(rows, cols);
        if aperture.n_pixels() == 0 {
            return Err(CpmError::Precondition(
                "aperture is empty; both ranges need at least one pixel".into(),
            ));
        }
        if aperture.rows.end > self.data.n_rows() || aperture.cols.end > self.data.n_cols() {
            return Err(CpmError::Precondition(format!(
                "aperture rows {:?} cols {:?} exceed the {}x{} grid",
                aperture.rows,
                aperture.cols,
                self.data.n_rows(),
                self.data.n_cols()
            )));
        }

        let mut models = Vec::with_capacity(aperture.n_pixels());
        for pixel in aperture.pixels() {
            models.push(PixelModel::new(Arc::clone(&self.data), pixel)?);
        }
        info!(
            "aperture rows {:?} cols {:?}: {} pixel models",
            aperture.rows,
            aperture.cols,
            models.len()
        );
        self.aperture = Some(aperture);
        self.models = models;
        Ok(())
    }

    pub fn add_cpm_model(&mut self, settings: &CpmSettings) -> Result<(), CpmError> {
        for model in self.models_mut()? {
            model.add_cpm_model(settings)?;
        }
        Ok(())
    }

    pub fn remove_cpm_model(&mut self) -> Result<(), CpmError> {
        for model in self.models_mut()? {
            model.remove_cpm_model()?;
        }
        Ok(())
    }

    pub fn add_poly_model(&mut self, settings: &PolySettings) -> Result<(), CpmError> {
        for model in self.models_mut()? {
            model.add_poly_model(settings)?;
        }
        Ok(())
    }

    pub fn remove_poly_model(&mut self) -> Result<(), CpmError> {
        for model in self.models_mut()? {
            model.remove_poly_model()?;
        }
        Ok(())
    }

    pub fn add_custom_model(&mut self, name: &str, series: &[f64]) -> Result<(), CpmError> {
        for model in self.models_mut()? {
            model.add_custom_model(name, series)?;
        }
        Ok(())
    }

    pub fn set_regs(&mut self, values: &[f64]) -> Result<(), CpmError> {
        for model in self.models_mut()? {
            model.set_regs(values)?;
        }
        Ok(())
    }

    /// Set only the CPM blocks' regularization across the aperture.
    pub fn set_cpm_reg(&mut self, value: f64) -> Result<(), CpmError> {
        for model in self.models_mut()? {
            model.set_cpm_reg(value)?;
        }
        Ok(())
    }

    /// Fit every aperture pixel with `k` holdout sections, in parallel, then
    /// rescale the stitched predictions. Solver failures are collected in
    /// the report; any configuration error aborts instead.
    pub fn holdout_fit_predict(
        &mut self,
        k: usize,
        mask: Option<&[bool]>,
    ) -> Result<FitReport, CpmError> {
        if self.models.is_empty() {
            return Err(CpmError::Precondition(
                "aperture is unset; call set_aperture first".into(),
            ));
        }

        let outcomes: Vec<Result<(), CpmError>> = self
            .models
            .par_iter_mut()
            .map(|model| -> Result<(), CpmError> {
                model.holdout_fit_predict(k, mask)?;
                model.rescale()?;
                Ok(())
            })
            .collect();

        let mut fitted = 0;
        let mut failures = Vec::new();
        for (model, outcome) in self.models.iter().zip(outcomes) {
            match outcome {
                Ok(()) => fitted += 1,
                Err(err @ CpmError::SingularSystem(_)) => {
                    let target = model.target();
                    warn!("pixel ({}, {}) skipped: {err}", target.row, target.col);
                    failures.push((target, err));
                }
                Err(err) => return Err(err),
            }
        }
        info!("holdout fit: {fitted}/{} pixels, k = {k}", self.models.len());
        Ok(FitReport { fitted, failures })
    }

    /// Sum the chosen per-pixel light curve over the aperture.
    pub fn get_aperture_lc(&self, kind: LightCurveKind) -> Result<LightCurve, CpmError> {
        let (time, flux, _) = self.summed_series(kind)?;
        Ok(LightCurve { time, flux })
    }

    /// The aperture light curve cut into its holdout sections.
    pub fn get_aperture_lc_split(
        &self,
        kind: LightCurveKind,
    ) -> Result<Vec<LightCurve>, CpmError> {
        let (time, flux, split) = self.summed_series(kind)?;
        Ok(split
            .sections()
            .iter()
            .map(|sec| LightCurve {
                time: time[sec.clone()].to_vec(),
                flux: flux[sec.clone()].to_vec(),
            })
            .collect())
    }

    fn summed_series(
        &self,
        kind: LightCurveKind,
    ) -> Result<(Vec<f64>, Vec<f64>, HoldoutSplit), CpmError> {
        if self.models.is_empty() {
            return Err(CpmError::Precondition(
                "aperture is unset; call set_aperture first".into(),
            ));
        }

        let mut acc: Option<(Vec<f64>, DVector<f64>, HoldoutSplit)> = None;
        let mut summed = 0usize;
        for model in &self.models {
            let Some(result) = model.result() else {
                let target = model.target();
                warn!(
                    "pixel ({}, {}) has no fit result; skipped in aperture sum",
                    target.row, target.col
                );
                continue;
            };
            let series = result.lightcurve(kind)?;
            match &mut acc {
                None => {
                    acc = Some((
                        result.time().to_vec(),
                        series.clone(),
                        result.split().clone(),
                    ));
                }
                Some((_, total, _)) => {
                    if series.len() != total.len() {
                        return Err(CpmError::DataLoad(format!(
                            "pixel results span different cadence axes ({} vs {})",
                            series.len(),
                            total.len()
                        )));
                    }
                    *total += series;
                }
            }
            summed += 1;
        }

        let Some((time, total, split)) = acc else {
            return Err(CpmError::Precondition(
                "no fitted pixels in the aperture; call holdout_fit_predict first".into(),
            ));
        };
        debug!(
            "aperture {} curve summed over {summed} pixels",
            kind.field_name()
        );
        Ok((time, total.as_slice().to_vec(), split))
    }

    pub(crate) fn models_mut(&mut self) -> Result<&mut [PixelModel], CpmError> {
        if self.models.is_empty() {
            return Err(CpmError::Precondition(
                "aperture is unset; call set_aperture first".into(),
            ));
        }
        Ok(&mut self.models)
    }
}
