//! Compute module - feature extraction, statistics and the analysis passes.

mod comparator;
mod encoding;
mod invariants;

pub mod evolution;
pub mod features;
pub mod stats;

pub use comparator::*;
pub use encoding::*;
pub use invariants::*;
