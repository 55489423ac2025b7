//! Small statistical helpers shared across the crate.
//!
//! All of these are deterministic and allocation-light. Degenerate inputs
//! (empty slices, all-NaN data) return `None` rather than panicking so
//! callers can decide how to surface the failure.

use crate::error::CpmError;

/// Mean of the finite entries. `None` if there are none.
pub fn mean(values: &[f64]) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if v.is_finite() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 { None } else { Some(sum / n as f64) }
}

/// Population standard deviation of the finite entries (ddof = 0).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let mut sum_sq = 0.0;
    let mut n = 0usize;
    for &v in values {
        if v.is_finite() {
            let d = v - m;
            sum_sq += d * d;
            n += 1;
        }
    }
    if n == 0 { None } else { Some((sum_sq / n as f64).sqrt()) }
}

/// Median of the finite entries. `None` if there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    median_mut(&mut finite)
}

fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Robust sigma estimate via the median absolute deviation.
///
/// `MAD / 0.6745` equals the standard deviation for Gaussian data, without
/// a handful of flares or cosmic-ray hits dragging the estimate.
pub fn mad_std(values: &[f64]) -> Option<f64> {
    let med = median(values)?;
    let mut abs_dev: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - med).abs())
        .collect();
    let mad = median_mut(&mut abs_dev)?;
    Some(mad / 0.6745)
}

/// Running median with total width `window`, centered on each sample and
/// truncated near the edges. Output has the same length as the input.
pub fn median_filter(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || window <= 1 {
        return values.to_vec();
    }
    let half = window / 2;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + window - half).min(n);
        out.push(median(&values[lo..hi]).unwrap_or(values[i]));
    }
    out
}

/// Running mean with width `window`, valid-mode: the output has
/// `n - window + 1` entries, or is empty when the input is shorter than the
/// window.
pub fn running_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if window == 0 || n < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(n - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..n {
        sum += values[i] - values[i - window];
        out.push(sum / window as f64);
    }
    out
}

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
///
/// Regularization strengths live on a log axis, so sweeps over candidate
/// values use this rather than a linear grid.
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, CpmError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(CpmError::Precondition(format!(
            "invalid log grid: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(CpmError::Precondition(
            "log grid needs at least 2 steps".into(),
        ));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn median_skips_nan() {
        let v = [1.0, f64::NAN, 3.0];
        assert_eq!(median(&v), Some(2.0));
    }

    #[test]
    fn mad_std_matches_gaussian_sigma_roughly() {
        // For the symmetric set {-2,-1,0,1,2}, MAD = 1.
        let v = [-2.0, -1.0, 0.0, 1.0, 2.0];
        let s = mad_std(&v).unwrap();
        assert!((s - 1.0 / 0.6745).abs() < 1e-12);
    }

    #[test]
    fn median_filter_flattens_a_spike() {
        let mut v = vec![1.0; 11];
        v[5] = 100.0;
        let filtered = median_filter(&v, 5);
        assert_eq!(filtered.len(), v.len());
        assert!((filtered[5] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn median_filter_truncates_at_edges() {
        let v = [1.0, 2.0, 3.0, 4.0];
        let filtered = median_filter(&v, 3);
        // First window is [1,2], median 1.5.
        assert!((filtered[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn running_mean_valid_mode_length() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let rm = running_mean(&v, 3);
        assert_eq!(rm.len(), 3);
        assert!((rm[0] - 2.0).abs() < 1e-12);
        assert!((rm[2] - 4.0).abs() < 1e-12);
        assert!(running_mean(&v, 6).is_empty());
    }

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(0.01, 100.0, 5).unwrap();
        assert!((v[0] - 0.01).abs() < 1e-12);
        assert!((v[v.len() - 1] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn log_space_rejects_bad_ranges() {
        assert!(log_space(-1.0, 10.0, 5).is_err());
        assert!(log_space(1.0, 1.0, 5).is_err());
        assert!(log_space(0.1, 10.0, 1).is_err());
    }
}
