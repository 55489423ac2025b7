//! CPM regularization search.
//!
//! Too little regularization lets the predictors absorb real astrophysics;
//! too much leaves systematics in. The sweet spot minimizes the noise of
//! the detrended curve, measured as CDPP per holdout section so that a
//! single noisy stretch cannot dominate the choice.

use log::{debug, info};

use crate::domain::LightCurveKind;
use crate::error::CpmError;
use crate::math::{CdppSettings, estimate_cdpp, mean};
use crate::source::Source;

/// Outcome of [`Source::calc_min_cpm_reg`].
#[derive(Debug, Clone)]
pub struct RegSearchResult {
    /// The candidate with the lowest section-averaged CDPP.
    pub best_reg: f64,
    /// CDPP in ppm per candidate and holdout section, `NaN` where a section
    /// was too short or too degenerate to measure.
    pub cdpp: Vec<Vec<f64>>,
    /// Section-averaged CDPP per candidate, over the measurable sections.
    pub averages: Vec<f64>,
}

impl Source {
    /// Try each candidate CPM regularization, score the detrended aperture
    /// curve by section-averaged CDPP and keep the minimizer (first wins on
    /// ties). The source is left fitted at the winning value.
    pub fn calc_min_cpm_reg(
        &mut self,
        regs: &[f64],
        k: usize,
        mask: Option<&[bool]>,
    ) -> Result<RegSearchResult, CpmError> {
        self.calc_min_cpm_reg_with(regs, k, mask, &CdppSettings::default())
    }

    pub fn calc_min_cpm_reg_with(
        &mut self,
        regs: &[f64],
        k: usize,
        mask: Option<&[bool]>,
        cdpp_settings: &CdppSettings,
    ) -> Result<RegSearchResult, CpmError> {
        if regs.is_empty() {
            return Err(CpmError::Precondition(
                "regularization search needs at least one candidate".into(),
            ));
        }
        let aperture_flux = self.aperture_median_flux()?;

        let mut cdpp = Vec::with_capacity(regs.len());
        let mut averages = Vec::with_capacity(regs.len());
        for &reg in regs {
            self.set_cpm_reg(reg)?;
            self.holdout_fit_predict(k, mask)?;
            let sections = self.get_aperture_lc_split(LightCurveKind::CpmSubtractedFlux)?;

            let row: Vec<f64> = sections
                .iter()
                .map(|lc| {
                    let relative: Vec<f64> =
                        lc.flux.iter().map(|f| 1.0 + f / aperture_flux).collect();
                    estimate_cdpp(&relative, cdpp_settings).unwrap_or(f64::NAN)
                })
                .collect();
            let measurable: Vec<f64> = row.iter().copied().filter(|c| c.is_finite()).collect();
            let avg = mean(&measurable).unwrap_or(f64::NAN);
            debug!("reg {reg:.3e}: section-averaged cdpp {avg:.1} ppm");
            cdpp.push(row);
            averages.push(avg);
        }

        // First index wins on ties.
        let mut best_index = None;
        for (i, &avg) in averages.iter().enumerate() {
            if !avg.is_finite() {
                continue;
            }
            match best_index {
                None => best_index = Some(i),
                Some(b) if avg < averages[b] => best_index = Some(i),
                _ => {}
            }
        }
        let best_index = best_index.ok_or_else(|| {
            CpmError::Precondition(
                "no holdout section was long enough for a CDPP estimate".into(),
            )
        })?;
        let best_reg = regs[best_index];
        info!(
            "regularization search over {} candidates: best {best_reg:.3e} at {:.1} ppm",
            regs.len(),
            averages[best_index]
        );

        // Leave the source in the winning state.
        self.set_cpm_reg(best_reg)?;
        self.holdout_fit_predict(k, mask)?;
        Ok(RegSearchResult {
            best_reg,
            cdpp,
            averages,
        })
    }

    /// Summed median flux of the valid aperture pixels, used to turn summed
    /// median-subtracted flux into relative flux for CDPP.
    fn aperture_median_flux(&self) -> Result<f64, CpmError> {
        let aperture = self.aperture().ok_or_else(|| {
            CpmError::Precondition("aperture is unset; call set_aperture first".into())
        })?;
        let total: f64 = aperture
            .pixels()
            .filter(|&p| self.data().is_valid_pixel(p))
            .map(|p| self.data().flux_median(p))
            .sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(CpmError::DataLoad(format!(
                "aperture median flux {total} is not positive; cannot form relative flux"
            )));
        }
        Ok(total)
    }
}
