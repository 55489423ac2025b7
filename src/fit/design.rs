//! Model blocks and design-matrix assembly.
//!
//! A pixel model is an ordered list of blocks, each contributing a group of
//! columns to one shared design matrix:
//!
//! - `Cpm`: the normalized light curves of the selected predictor pixels
//! - `Poly`: a Chebyshev basis in time for slow instrument drifts
//! - `Custom`: a caller-supplied regressor, e.g. a known transit shape
//!
//! All blocks are fit jointly in one ridge solve, so shared structure is
//! split between them instead of being absorbed twice.

use std::ops::Range;

use nalgebra::{DMatrix, DVector};

use crate::data::CutoutData;
use crate::domain::PolySettings;
use crate::error::CpmError;
use crate::fit::predictors::PredictorSet;
use crate::math::poly_design_matrix;

/// Regularization for custom blocks when the caller gives none. Small enough
/// to leave the component effectively unconstrained.
pub const DEFAULT_CUSTOM_REG: f64 = 1e-9;

/// One column group of a pixel model's design matrix.
#[derive(Debug, Clone)]
pub enum ModelBlock {
    Cpm {
        predictors: PredictorSet,
        reg: Option<f64>,
    },
    Poly {
        settings: PolySettings,
        reg: Option<f64>,
    },
    Custom {
        name: String,
        series: DVector<f64>,
        reg: f64,
    },
}

impl ModelBlock {
    /// Number of design-matrix columns this block contributes.
    pub fn n_columns(&self) -> usize {
        match self {
            ModelBlock::Cpm { predictors, .. } => predictors.len(),
            ModelBlock::Poly { settings, .. } => settings.num_terms,
            ModelBlock::Custom { .. } => 1,
        }
    }

    /// Regularization strength, if set. Custom blocks always carry one.
    pub fn reg(&self) -> Option<f64> {
        match self {
            ModelBlock::Cpm { reg, .. } | ModelBlock::Poly { reg, .. } => *reg,
            ModelBlock::Custom { reg, .. } => Some(*reg),
        }
    }

    pub fn set_reg(&mut self, value: f64) {
        match self {
            ModelBlock::Cpm { reg, .. } | ModelBlock::Poly { reg, .. } => *reg = Some(value),
            ModelBlock::Custom { reg, .. } => *reg = value,
        }
    }

    /// Short block label for logs and error messages.
    pub fn label(&self) -> String {
        match self {
            ModelBlock::Cpm { .. } => "cpm".into(),
            ModelBlock::Poly { .. } => "poly".into(),
            ModelBlock::Custom { name, .. } => format!("custom:{name}"),
        }
    }

    pub fn is_cpm(&self) -> bool {
        matches!(self, ModelBlock::Cpm { .. })
    }

    pub fn is_poly(&self) -> bool {
        matches!(self, ModelBlock::Poly { .. })
    }
}

/// Column range of each block in the assembled design matrix, in block order.
pub fn block_ranges(blocks: &[ModelBlock]) -> Vec<Range<usize>> {
    let mut ranges = Vec::with_capacity(blocks.len());
    let mut offset = 0;
    for block in blocks {
        let width = block.n_columns();
        ranges.push(offset..offset + width);
        offset += width;
    }
    ranges
}

/// Assemble the design matrix and the matching per-column regularization
/// vector over the kept cadences of `data`.
///
/// Fails if any block still has no regularization strength, or a custom
/// series does not span the kept cadences.
pub fn build_design(
    data: &CutoutData,
    blocks: &[ModelBlock],
) -> Result<(DMatrix<f64>, DVector<f64>), CpmError> {
    if blocks.is_empty() {
        return Err(CpmError::Precondition(
            "pixel model has no blocks; add a cpm, poly or custom model first".into(),
        ));
    }
    let n_cadences = data.n_cadences();
    let n_columns: usize = blocks.iter().map(ModelBlock::n_columns).sum();

    let mut design = DMatrix::zeros(n_cadences, n_columns);
    let mut reg = DVector::zeros(n_columns);
    for (block, range) in blocks.iter().zip(block_ranges(blocks)) {
        let strength = block.reg().ok_or_else(|| {
            CpmError::Precondition(format!(
                "regularization for the {} block is unset; call set_regs first",
                block.label()
            ))
        })?;
        reg.rows_mut(range.start, range.len()).fill(strength);

        match block {
            ModelBlock::Cpm { predictors, .. } => {
                for (j, &pixel) in predictors.pixels().iter().enumerate() {
                    design.set_column(range.start + j, &data.normalized_pixel(pixel));
                }
            }
            ModelBlock::Poly { settings, .. } => {
                let basis = poly_design_matrix(data.time(), settings)?;
                design
                    .view_mut((0, range.start), (n_cadences, range.len()))
                    .copy_from(&basis);
            }
            ModelBlock::Custom { name, series, .. } => {
                if series.len() != n_cadences {
                    return Err(CpmError::DataLoad(format!(
                        "custom model '{name}' has {} samples but the cutout keeps {} cadences",
                        series.len(),
                        n_cadences
                    )));
                }
                design.set_column(range.start, series);
            }
        }
    }
    Ok((design, reg))
}
