//! Combined Differential Photometric Precision (CDPP).
//!
//! CDPP is the standard transit-survey noise metric: the scatter of the
//! light curve after averaging over a transit-length window, in parts per
//! million. A 100 ppm CDPP at a 13-cadence duration means a 100 ppm deep
//! transit of that duration would be a one-sigma event.
//!
//! The estimate follows the usual recipe:
//!
//! 1. detrend against a wide running median (removes residual ramps)
//! 2. sigma-clip the ratio residuals
//! 3. running mean over `transit_duration` cadences
//! 4. scatter of that averaged series, scaled to ppm
//!
//! Input is relative flux near 1.0. Detrended aperture fluxes are centered
//! at zero, so callers shift by +1 first.

use serde::{Deserialize, Serialize};

use crate::math::stats::{mean, median_filter, running_mean, std_dev};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CdppSettings {
    /// Averaging window in cadences. 13 is the conventional half-hour
    /// transit duration at the 2-minute TESS cadence.
    pub transit_duration: usize,
    /// Width of the running-median detrend filter in cadences.
    pub detrend_window: usize,
    /// Clip threshold for the ratio residuals, in sigma.
    pub sigma: f64,
}

impl Default for CdppSettings {
    fn default() -> Self {
        Self {
            transit_duration: 13,
            detrend_window: 101,
            sigma: 5.0,
        }
    }
}

/// Estimate CDPP in ppm. `None` when the series is too short or too
/// degenerate (zero scatter, all samples clipped) to measure.
pub fn estimate_cdpp(flux: &[f64], settings: &CdppSettings) -> Option<f64> {
    if settings.transit_duration == 0 || flux.len() < settings.transit_duration.max(3) {
        return None;
    }

    let trend = median_filter(flux, settings.detrend_window);
    let ratios: Vec<f64> = flux
        .iter()
        .zip(trend.iter())
        .map(|(&f, &t)| f / t)
        .filter(|r| r.is_finite())
        .collect();
    if ratios.len() < settings.transit_duration {
        return None;
    }

    let center = mean(&ratios)?;
    let scatter = std_dev(&ratios)?;
    let kept: Vec<f64> = if scatter > 0.0 {
        ratios
            .iter()
            .copied()
            .filter(|r| (r - center).abs() <= settings.sigma * scatter)
            .collect()
    } else {
        ratios
    };

    let averaged = running_mean(&kept, settings.transit_duration);
    if averaged.len() < 2 {
        return None;
    }
    std_dev(&averaged).map(|s| s * 1e6)
}
