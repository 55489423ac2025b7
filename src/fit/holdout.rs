//! Contiguous holdout sections for out-of-sample prediction.
//!
//! Fitting and predicting on the same cadences would let the model absorb
//! the very signal the subtraction is meant to keep. The cadence axis is
//! therefore cut into `k` contiguous sections; each section is predicted by
//! a model trained on the other `k - 1`. Contiguity matters: systematics are
//! correlated in time, and a randomly interleaved holdout would leak them.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::CpmError;

/// A partition of `n` cadences into `k` contiguous sections.
///
/// Section lengths follow the `array_split` convention: with `n = q*k + r`
/// the first `r` sections get `q + 1` cadences and the rest get `q`, so no
/// two sections differ by more than one cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldoutSplit {
    n: usize,
    sections: Vec<Range<usize>>,
}

impl HoldoutSplit {
    pub fn new(n: usize, k: usize) -> Result<Self, CpmError> {
        if k < 2 || k > n {
            return Err(CpmError::InvalidSplit { k, n_valid: n });
        }
        let base = n / k;
        let extra = n % k;
        let mut sections = Vec::with_capacity(k);
        let mut start = 0;
        for i in 0..k {
            let len = if i < extra { base + 1 } else { base };
            sections.push(start..start + len);
            start += len;
        }
        Ok(Self { n, sections })
    }

    pub fn k(&self) -> usize {
        self.sections.len()
    }

    /// Total number of cadences covered.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn sections(&self) -> &[Range<usize>] {
        &self.sections
    }

    pub fn section(&self, i: usize) -> Range<usize> {
        self.sections[i].clone()
    }

    /// Training mask for section `i`: true everywhere except inside it.
    pub fn train_mask(&self, i: usize) -> Vec<bool> {
        let held_out = self.section(i);
        (0..self.n).map(|c| !held_out.contains(&c)).collect()
    }

    /// View a full-length series as per-section slices, in section order.
    pub fn split_series<'a, T>(&'a self, values: &'a [T]) -> impl Iterator<Item = &'a [T]> {
        self.sections.iter().map(move |s| &values[s.clone()])
    }
}

/// Resolve an optional keep-mask into the cadence indices that stay in play.
///
/// `None` keeps everything. A mask must have one entry per cadence; cadences
/// flagged `false` are dropped before the split, so they are neither trained
/// on nor predicted.
pub fn keep_indices(n_cadences: usize, mask: Option<&[bool]>) -> Result<Vec<usize>, CpmError> {
    match mask {
        None => Ok((0..n_cadences).collect()),
        Some(mask) => {
            if mask.len() != n_cadences {
                return Err(CpmError::DataLoad(format!(
                    "cadence mask has {} entries for {} cadences",
                    mask.len(),
                    n_cadences
                )));
            }
            Ok(mask
                .iter()
                .enumerate()
                .filter_map(|(i, &keep)| keep.then_some(i))
                .collect())
        }
    }
}
