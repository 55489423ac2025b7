//! Cutout data handling.
//!
//! - validated cube input + bad-cadence removal (`cutout`)
//! - seeded synthetic cube generation (`synthetic`)

pub mod cutout;
pub mod synthetic;

pub use cutout::*;
pub use synthetic::*;
