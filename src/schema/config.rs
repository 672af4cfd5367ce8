//! Configuration types for the evolution and validation engine.

use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use super::{ArtifactMode, DomainId, FamilyId, OptimizerConfig};

/// Top-level engine configuration.
///
/// Every section has defaults, so a partial JSON document is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Genetic optimizer settings.
    pub optimizer: OptimizerConfig,
    /// Fitness evaluation settings.
    pub fitness: FitnessConfig,
    /// Cross-formula comparison settings.
    pub comparator: ComparatorConfig,
    /// Invariant mining settings.
    pub invariants: InvariantConfig,
    /// Encoding property test settings.
    pub encoding: EncodingConfig,
    /// Trigger times and per-mode budgets.
    pub schedule: ScheduleConfig,
    /// Artifact sink retry policy.
    pub sink: SinkConfig,
    /// Families to evolve.
    pub families: Vec<FamilyId>,
    /// Domains to run. Empty means every domain the provider lists.
    pub domains: Vec<DomainId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            fitness: FitnessConfig::default(),
            comparator: ComparatorConfig::default(),
            invariants: InvariantConfig::default(),
            encoding: EncodingConfig::default(),
            schedule: ScheduleConfig::default(),
            sink: SinkConfig::default(),
            families: FamilyId::ALL.to_vec(),
            domains: Vec::new(),
        }
    }
}

/// Fitness evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessConfig {
    /// Minimum number of entities for a valid correlation.
    pub min_samples: usize,
    /// Significance level for p-value tests.
    pub significance: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            significance: 0.05,
        }
    }
}

/// Cross-formula comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorConfig {
    /// Best fitness at or above which a family counts as strong in a domain.
    pub strong_fitness: f64,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            strong_fitness: 0.3,
        }
    }
}

/// Invariant mining settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvariantConfig {
    /// Relative tolerance band around reference constants.
    pub tolerance: f64,
    /// Minimum occurrence rate for a relation to be reported.
    pub min_support: f64,
    /// Minimum number of converged runs behind a reported invariant.
    pub min_runs: usize,
    /// Maximum sealed runs retained in history for mining.
    pub max_history_runs: usize,
}

impl Default for InvariantConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.02,
            min_support: 0.5,
            min_runs: 10,
            max_history_runs: 1000,
        }
    }
}

/// Encoding property test settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Maximum number of reference labels sampled per family.
    pub sample_size: usize,
    /// Normalized distance below which two vectors collide.
    pub collision_tolerance: f64,
    /// Normalized change above which a component counts as flipped.
    pub avalanche_threshold: f64,
    /// Fraction of variance the retained principal axes must explain.
    pub variance_explained: f64,
    /// Standard deviation of the Gaussian noise added to a label's vector
    /// before looking its identity back up.
    pub reconstruction_noise: f64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            sample_size: 200,
            collision_tolerance: 1e-3,
            avalanche_threshold: 0.01,
            variance_explained: 0.95,
            reconstruction_noise: 1e-3,
        }
    }
}

/// Budget for one run mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Generation cap for each optimizer run.
    pub max_generations: usize,
    /// Per-domain time budget in seconds.
    pub timeout_secs: u64,
    /// Population size override for this mode.
    #[serde(default)]
    pub population_size: Option<usize>,
}

impl ModeConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Trigger times (UTC) and per-mode budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily trigger time, "HH:MM:SS".
    pub daily_at: NaiveTime,
    /// Weekday of the weekly trigger.
    pub weekly_on: Weekday,
    /// Weekly trigger time, "HH:MM:SS".
    pub weekly_at: NaiveTime,
    pub daily: ModeConfig,
    pub weekly: ModeConfig,
    pub on_demand: ModeConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or_default(),
            weekly_on: Weekday::Sun,
            weekly_at: NaiveTime::from_hms_opt(4, 0, 0).unwrap_or_default(),
            daily: ModeConfig {
                max_generations: 15,
                timeout_secs: 600,
                population_size: None,
            },
            weekly: ModeConfig {
                max_generations: 50,
                timeout_secs: 3600,
                population_size: None,
            },
            on_demand: ModeConfig {
                max_generations: 15,
                timeout_secs: 600,
                population_size: None,
            },
        }
    }
}

impl ScheduleConfig {
    /// Budget of one run mode.
    pub fn budget(&self, mode: ArtifactMode) -> &ModeConfig {
        match mode {
            ArtifactMode::Daily => &self.daily,
            ArtifactMode::Weekly => &self.weekly,
            ArtifactMode::OnDemand => &self.on_demand,
        }
    }
}

/// Bounded retry policy for sink writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Total attempts per operation (first try included).
    pub max_attempts: u32,
    /// Backoff before the second attempt, doubled after each failure.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl SinkConfig {
    /// Backoff to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

impl EngineConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.optimizer.validate()?;

        if self.fitness.min_samples < 3 {
            return Err(ConfigError::InvalidMinSamples(self.fitness.min_samples));
        }
        if !(self.fitness.significance > 0.0 && self.fitness.significance < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "fitness.significance",
                value: self.fitness.significance,
            });
        }
        if self.families.is_empty() {
            return Err(ConfigError::NoFamilies);
        }

        let unit_fields = [
            ("invariants.tolerance", self.invariants.tolerance),
            ("invariants.min_support", self.invariants.min_support),
            ("encoding.variance_explained", self.encoding.variance_explained),
            ("encoding.avalanche_threshold", self.encoding.avalanche_threshold),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        for (field, value) in [
            ("encoding.collision_tolerance", self.encoding.collision_tolerance),
            ("encoding.reconstruction_noise", self.encoding.reconstruction_noise),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }

        for (mode, budget) in [
            ("daily", &self.schedule.daily),
            ("weekly", &self.schedule.weekly),
            ("on_demand", &self.schedule.on_demand),
        ] {
            if budget.max_generations == 0 || budget.timeout_secs == 0 {
                return Err(ConfigError::InvalidModeBudget(mode));
            }
            if budget.population_size.is_some_and(|size| size < 2) {
                return Err(ConfigError::PopulationTooSmall);
            }
        }

        if self.sink.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Maximum generations must be positive")]
    InvalidGenerations,
    #[error("Minimum sample count must be at least 3, got {0}")]
    InvalidMinSamples(usize),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Convergence window must be positive")]
    InvalidWindow,
    #[error("No formula families configured")]
    NoFamilies,
    #[error("Mode '{0}' needs positive generation and timeout budgets")]
    InvalidModeBudget(&'static str),
    #[error("Sink retry policy needs at least one attempt")]
    InvalidRetryPolicy,
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EngineConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}
