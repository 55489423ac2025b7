//! Polynomial trend basis.
//!
//! Long-term trends (spacecraft drift, scattered-light ramps) are modeled by
//! a low-order polynomial in time. The basis is Chebyshev rather than raw
//! powers:
//!
//! - columns are `T_0(x) .. T_{num_terms-1}(x)` via the three-term
//!   recurrence `T_n = 2x T_{n-1} - T_{n-2}`
//! - `x = scale * (t - t_mid) / (t_max - t_min)` is scaled centered time,
//!   so the default `scale = 2` puts the full baseline exactly on `[-1, 1]`
//!
//! Raw vandermonde columns become near-collinear by degree four or five;
//! the Chebyshev recurrence spans the same polynomial space with bounded
//! conditioning.

use nalgebra::DMatrix;

use crate::domain::PolySettings;
use crate::error::CpmError;

/// Guard for degenerate baselines (a single cadence, or identical stamps).
const RANGE_EPS: f64 = 1e-12;

/// Build the `time.len() x num_terms` polynomial design block.
pub fn poly_design_matrix(
    time: &[f64],
    settings: &PolySettings,
) -> Result<DMatrix<f64>, CpmError> {
    if settings.num_terms == 0 {
        return Err(CpmError::Precondition(
            "poly basis needs num_terms >= 1".into(),
        ));
    }
    if !(settings.scale.is_finite() && settings.scale > 0.0) {
        return Err(CpmError::Precondition(format!(
            "poly basis scale must be finite and > 0, got {}",
            settings.scale
        )));
    }
    if time.is_empty() {
        return Err(CpmError::Precondition("poly basis needs a time axis".into()));
    }

    let (t_min, t_max) = time
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
            (lo.min(t), hi.max(t))
        });
    let range = (t_max - t_min).max(RANGE_EPS);
    let mid = 0.5 * (t_min + t_max);

    let n = time.len();
    let p = settings.num_terms;
    let mut m = DMatrix::<f64>::zeros(n, p);
    let mut row = vec![0.0; p];
    for i in 0..n {
        let x = settings.scale * (time[i] - mid) / range;
        chebyshev_row(x, &mut row);
        for j in 0..p {
            m[(i, j)] = row[j];
        }
    }
    Ok(m)
}

/// Fill `out` with `T_0(x) .. T_{p-1}(x)`.
fn chebyshev_row(x: f64, out: &mut [f64]) {
    for j in 0..out.len() {
        out[j] = match j {
            0 => 1.0,
            1 => x,
            _ => 2.0 * x * out[j - 1] - out[j - 2],
        };
    }
}
