//! Formula Forge - Evolution and validation engine for label scoring formulas.
//!
//! This crate evolves weighted scoring formulas over fixed feature families
//! extracted from entity labels, validates them statistically against
//! real-world outcomes per domain, compares families across domains, mines
//! recurring numeric relationships among evolved weights and measures how
//! much information each feature encoding carries.
//!
//! # Architecture
//!
//! The crate is split into three main modules:
//!
//! - `schema`: Configuration, dataset and result types (all serde-serializable)
//! - `compute`: Feature extraction, statistics, the genetic optimizer and the
//!   analysis passes
//! - `orchestrator`: Scheduled runs with per-domain isolation, locking and
//!   atomic artifact publication
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use formula_forge::{
//!     orchestrator::{DirectoryProvider, FsResultSink, Orchestrator},
//!     schema::{ArtifactMode, EngineConfig},
//! };
//!
//! let provider = Arc::new(DirectoryProvider::new("data"));
//! let sink = Arc::new(FsResultSink::new("out").unwrap());
//! let orchestrator = Orchestrator::new(EngineConfig::default(), provider, sink).unwrap();
//!
//! let report = orchestrator.run(ArtifactMode::Daily);
//! print!("{}", report.status_table());
//! ```

pub mod compute;
pub mod orchestrator;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{FitnessEvaluator, GeneticOptimizer, RunArchive};
pub use orchestrator::{Orchestrator, RunOutcome, RunReport};
pub use schema::{AnalysisArtifact, ArtifactMode, Dataset, EngineConfig, EvolutionRun, FamilyId};
