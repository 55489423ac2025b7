//! Crate-wide error type.
//!
//! Setup and input errors (`DataLoad`, `InvalidSplit`, `Precondition`,
//! `InsufficientPredictors`) surface immediately to the caller. The numeric
//! `SingularSystem` failure is collected per pixel during aperture fits so
//! one degenerate pixel cannot abort the rest of the grid.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CpmError {
    /// Malformed or missing input data, including any array-shape mismatch.
    #[error("data load failed: {0}")]
    DataLoad(String),

    /// The predictor candidate pool is smaller than the requested count.
    #[error("insufficient predictors: requested {requested}, pool has {available}")]
    InsufficientPredictors { requested: usize, available: usize },

    /// Holdout section count incompatible with the valid cadence count.
    #[error("invalid holdout split: k={k} with {n_valid} valid cadences")]
    InvalidSplit { k: usize, n_valid: usize },

    /// The regularized normal matrix could not be factorized.
    #[error("singular system: {0}")]
    SingularSystem(String),

    /// An operation was invoked before its required setup.
    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl From<std::io::Error> for CpmError {
    fn from(err: std::io::Error) -> Self {
        CpmError::DataLoad(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for CpmError {
    fn from(err: serde_json::Error) -> Self {
        CpmError::DataLoad(format!("json: {err}"))
    }
}
