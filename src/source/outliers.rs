//! Aperture-level outlier flagging.
//!
//! Astrophysical outbursts and uncorrected glitches both survive
//! detrending. Flagging them from the detrended aperture curve gives a
//! cadence mask that can be fed back into `holdout_fit_predict`, so the
//! refit never trains on the outliers it is meant to preserve.

use log::debug;

use crate::domain::OutlierSettings;
use crate::error::CpmError;
use crate::math::{mean, median_filter, std_dev};
use crate::source::Source;

/// Clipping stops at a fixed point, but a pathological series can keep
/// revealing one new outlier per pass as sigma shrinks.
const MAX_CLIP_ITERATIONS: usize = 100;

impl Source {
    /// Flag outlier cadences of the aperture light curve, aligned with the
    /// clipped cadence axis (`true` = outlier).
    ///
    /// The curve is detrended against a running median, then sigma-clipped
    /// iteratively: each pass re-estimates the scatter from the samples not
    /// yet flagged, so one giant outlier cannot hide smaller ones. The
    /// flagged set only ever grows.
    pub fn get_outliers(&self, settings: &OutlierSettings) -> Result<Vec<bool>, CpmError> {
        let lc = self.get_aperture_lc(settings.kind)?;
        let flagged = clip_outliers(&lc.flux, settings);
        debug!(
            "{} of {} cadences flagged as outliers",
            flagged.iter().filter(|&&f| f).count(),
            flagged.len()
        );
        Ok(flagged)
    }
}

fn clip_outliers(values: &[f64], settings: &OutlierSettings) -> Vec<bool> {
    let trend = median_filter(values, settings.window);
    let deviation: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();

    let mut flagged = vec![false; values.len()];
    for _ in 0..MAX_CLIP_ITERATIONS {
        let kept: Vec<f64> = deviation
            .iter()
            .zip(&flagged)
            .filter_map(|(&d, &f)| (!f).then_some(d))
            .collect();
        let (Some(center), Some(scatter)) = (mean(&kept), std_dev(&kept)) else {
            break;
        };
        if !(scatter.is_finite() && scatter > 0.0) {
            break;
        }

        let upper = center + settings.sigma_upper * scatter;
        let lower = center - settings.sigma_lower * scatter;
        let mut grew = false;
        for (i, &d) in deviation.iter().enumerate() {
            if !flagged[i] && (d > upper || d < lower) {
                flagged[i] = true;
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LightCurveKind;

    #[test]
    fn injected_spike_is_flagged() {
        let mut values: Vec<f64> = (0..300).map(|i| (i as f64 * 0.05).sin() * 2.0).collect();
        values[120] += 50.0;
        let flagged = clip_outliers(&values, &OutlierSettings::with_sigma(5.0));
        assert!(flagged[120]);
        assert!(flagged.iter().filter(|&&f| f).count() <= 2);
    }

    #[test]
    fn shrinking_sigma_reveals_hidden_outliers() {
        // The giant spike inflates the first-pass scatter enough to shield
        // the medium one; only re-estimation catches both.
        let mut values = vec![0.0; 200];
        values[60] = 100.0;
        values[140] = 10.0;
        let settings = OutlierSettings {
            window: 20,
            ..OutlierSettings::with_sigma(5.0)
        };
        let flagged = clip_outliers(&values, &settings);
        assert!(flagged[60]);
        assert!(flagged[140]);
        assert_eq!(flagged.iter().filter(|&&f| f).count(), 2);
    }

    #[test]
    fn asymmetric_thresholds_clip_one_side() {
        let mut values = vec![0.0; 200];
        values[50] = 4.0;
        values[150] = -4.0;
        // Background wobble keeps sigma nonzero without tripping the clip.
        for (i, v) in values.iter_mut().enumerate() {
            *v += if i % 2 == 0 { 0.5 } else { -0.5 };
        }
        let settings = OutlierSettings {
            window: 20,
            sigma_upper: 30.0,
            sigma_lower: 3.0,
            ..OutlierSettings::default()
        };
        let flagged = clip_outliers(&values, &settings);
        assert!(!flagged[50], "positive excursion within the loose bound");
        assert!(flagged[150], "negative excursion beyond the tight bound");
    }

    #[test]
    fn adversarial_cascade_terminates() {
        // Each flagged point shrinks sigma enough to expose the next; the
        // iteration cap keeps this bounded.
        let values: Vec<f64> = (0..150).map(|i| 1.5_f64.powi(i)).collect();
        let flagged = clip_outliers(&values, &OutlierSettings::with_sigma(3.0));
        assert_eq!(flagged.len(), 150);
        assert!(flagged.iter().any(|&f| f));
    }

    #[test]
    fn outlier_kind_follows_the_settings() {
        // Routed through a Source so the kind lookup is exercised too.
        use crate::data::{CutoutData, SyntheticSettings, generate_cutout};
        use crate::domain::CpmSettings;

        let cube = generate_cutout(&SyntheticSettings {
            n_cadences: 120,
            n_rows: 10,
            n_cols: 10,
            noise_sigma: 0.3,
            systematic_amplitude: 20.0,
            seed: 9,
            ..SyntheticSettings::default()
        })
        .unwrap();
        let mut source = Source::new(CutoutData::new(cube, true).unwrap());
        source.set_aperture(4..6, 4..6).unwrap();
        source
            .add_cpm_model(&CpmSettings {
                exclusion_size: 2,
                n_predictors: 6,
                ..CpmSettings::default()
            })
            .unwrap();
        source.set_regs(&[0.1]).unwrap();
        source.holdout_fit_predict(4, None).unwrap();

        let flags = source
            .get_outliers(&OutlierSettings {
                kind: LightCurveKind::CpmSubtractedFlux,
                ..OutlierSettings::with_sigma(4.0)
            })
            .unwrap();
        assert_eq!(flags.len(), 120);

        // A poly-only kind is unavailable for this fit and must error.
        let err = source.get_outliers(&OutlierSettings {
            kind: LightCurveKind::PolyPrediction,
            ..OutlierSettings::default()
        });
        assert!(matches!(err, Err(CpmError::Precondition(_))));
    }
}
