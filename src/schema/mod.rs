//! Schema module - Configuration, dataset and result types.

mod artifact;
mod config;
mod dataset;
mod evolution;
mod family;
mod fingerprint;
mod report;

pub use artifact::*;
pub use config::*;
pub use dataset::*;
pub use evolution::*;
pub use family::*;
pub use fingerprint::Fingerprint;
pub use report::*;
