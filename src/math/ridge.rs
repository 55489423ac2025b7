//! Ridge-regularized least squares.
//!
//! Every pixel fit solves the same shape of problem:
//!
//! ```text
//! (M^T M + Lambda) w = M^T y      over the training rows only
//! prediction = M w                over all rows
//! ```
//!
//! where `Lambda = diag(reg)` carries one regularization value per design
//! column. The normal matrix is symmetric positive definite whenever any
//! regularization is present, so Cholesky is the fast path; LU covers the
//! unregularized full-rank case where rounding can nudge the matrix off
//! positive definiteness. There is no explicit matrix inversion anywhere.

use nalgebra::{DMatrix, DVector};

use crate::error::CpmError;

/// Solve the regularized normal equations over the masked-in rows.
///
/// `train_mask[i] = true` marks row `i` as part of the training set. The
/// returned weight vector has one entry per design column; callers score
/// held-out rows via `m * w`.
pub fn solve_ridge(
    m: &DMatrix<f64>,
    y: &DVector<f64>,
    reg: &DVector<f64>,
    train_mask: &[bool],
) -> Result<DVector<f64>, CpmError> {
    let n = m.nrows();
    let p = m.ncols();
    if y.len() != n || train_mask.len() != n {
        return Err(CpmError::DataLoad(format!(
            "design matrix has {n} rows but y has {} and mask has {}",
            y.len(),
            train_mask.len()
        )));
    }
    if reg.len() != p {
        return Err(CpmError::DataLoad(format!(
            "design matrix has {p} columns but reg vector has {}",
            reg.len()
        )));
    }
    if reg.iter().any(|r| !r.is_finite() || *r < 0.0) {
        return Err(CpmError::Precondition(
            "regularization values must be finite and >= 0".into(),
        ));
    }

    let train_rows: Vec<usize> = train_mask
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect();
    if train_rows.is_empty() {
        return Err(CpmError::Precondition("training set is empty".into()));
    }

    let m_train = m.select_rows(train_rows.iter());
    let y_train = y.select_rows(train_rows.iter());

    let mut normal = m_train.transpose() * &m_train;
    for j in 0..p {
        normal[(j, j)] += reg[j];
    }
    let rhs = m_train.transpose() * y_train;

    if let Some(chol) = normal.clone().cholesky() {
        let w = chol.solve(&rhs);
        if w.iter().all(|v| v.is_finite()) {
            return Ok(w);
        }
    }

    // Cholesky refuses matrices that are not numerically positive definite;
    // LU still solves the merely ill-scaled ones.
    if let Some(w) = normal.lu().solve(&rhs) {
        if w.iter().all(|v| v.is_finite()) {
            return Ok(w);
        }
    }

    Err(CpmError::SingularSystem(format!(
        "normal matrix ({p}x{p}, {} training rows) could not be factorized",
        train_rows.len()
    )))
}
