//! Mathematical utilities: statistics, the polynomial basis, the ridge
//! solver, and the CDPP noise metric.

pub mod cdpp;
pub mod poly;
pub mod ridge;
pub mod stats;

pub use cdpp::*;
pub use poly::*;
pub use ridge::*;
pub use stats::*;
