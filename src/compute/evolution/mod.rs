//! Evolutionary search for scoring formulas.
//!
//! # Overview
//!
//! - **Fitness** (`fitness`): correlation of a weighted feature combination
//!   against a dataset's outcomes
//! - **Weight Operations** (`genome`): random generation, crossover, and mutation
//!   of weight vectors
//! - **Search** (`search`): the genetic optimizer that seals an [`EvolutionRun`]
//! - **Run Archive** (`archive`): run cache and bounded history
//!
//! # Example
//!
//! ```rust,no_run
//! use formula_forge::compute::evolution::{FitnessEvaluator, GeneticOptimizer};
//! use formula_forge::compute::features::PhoneticExtractor;
//! use formula_forge::schema::{Dataset, OptimizerConfig};
//!
//! # fn demo(dataset: &Dataset) {
//! let optimizer = GeneticOptimizer::for_dataset(
//!     OptimizerConfig::default(),
//!     FitnessEvaluator::default(),
//!     &PhoneticExtractor,
//!     dataset,
//! );
//! let run = optimizer.run_with_callback(|progress| {
//!     println!("Generation {}: best fitness = {:.3}",
//!         progress.generation, progress.best_fitness);
//! });
//! println!("Converged: {}", run.converged);
//! # }
//! ```
//!
//! [`EvolutionRun`]: crate::schema::EvolutionRun

mod archive;
mod fitness;
mod genome;
mod search;

pub use archive::{HISTORY_FILE, RunArchive, RunKey, config_fingerprint};
pub use fitness::{FeatureMatrix, FitnessEvaluator};
pub use genome::{WeightRng, weight_distance};
pub use search::{Candidate, GeneticOptimizer, derive_seed};
