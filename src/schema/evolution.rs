//! Evolution configuration and run record types.
//!
//! This module holds the value types produced by fitness evaluation and the
//! genetic optimizer: [`FitnessResult`], [`FormulaCandidate`] and the sealed
//! [`EvolutionRun`], plus the optimizer's configuration.

use serde::{Deserialize, Serialize};

use super::{ConfigError, DomainId, FamilyId};

// ============================================================================
// Optimizer configuration
// ============================================================================

/// Top-level configuration for the genetic optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Population and generation settings.
    pub population: PopulationConfig,
    /// Selection, crossover and mutation settings.
    pub genetic: GeneticAlgorithmConfig,
    /// Convergence and abort detection.
    pub convergence: ConvergenceConfig,
    /// Bounds every weight component is sampled and clamped within.
    pub weight_bounds: (f64, f64),
    /// Random seed for reproducibility.
    pub random_seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population: PopulationConfig::default(),
            genetic: GeneticAlgorithmConfig::default(),
            convergence: ConvergenceConfig::default(),
            weight_bounds: (-1.0, 1.0),
            random_seed: None,
        }
    }
}

/// Population and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of individuals in population.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Maximum number of evaluated generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            max_generations: default_max_generations(),
        }
    }
}

fn default_population_size() -> usize {
    50
}
fn default_max_generations() -> usize {
    15
}

/// Genetic Algorithm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticAlgorithmConfig {
    /// Selection method.
    #[serde(default)]
    pub selection: SelectionMethod,
    /// Crossover operator.
    #[serde(default)]
    pub crossover: CrossoverMethod,
    /// Crossover probability (0.0-1.0).
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Mutation probability per component (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Mutation strength, as a fraction of the weight range.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
    /// Fraction of the population carried over unchanged.
    #[serde(default = "default_elitism_fraction")]
    pub elitism_fraction: f64,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        Self {
            selection: SelectionMethod::default(),
            crossover: CrossoverMethod::default(),
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            mutation_strength: default_mutation_strength(),
            elitism_fraction: default_elitism_fraction(),
        }
    }
}

impl GeneticAlgorithmConfig {
    /// Number of elites for a population of the given size (at least one).
    pub fn elite_count(&self, population: usize) -> usize {
        ((population as f64 * self.elitism_fraction).round() as usize).clamp(1, population.max(1))
    }
}

fn default_crossover_rate() -> f64 {
    0.8
}
fn default_mutation_rate() -> f64 {
    0.1
}
fn default_mutation_strength() -> f64 {
    0.1
}
fn default_elitism_fraction() -> f64 {
    0.15
}

/// Selection method for genetic algorithm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "method")]
pub enum SelectionMethod {
    /// Roulette wheel (fitness-proportionate) selection.
    #[default]
    FitnessProportional,
    /// Tournament selection with configurable size.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Rank-based selection.
    RankBased,
}

fn default_tournament_size() -> usize {
    3
}

/// Crossover operator for weight vectors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverMethod {
    /// Weighted average of both parents with a random blend factor.
    #[default]
    Blend,
    /// Each component taken from either parent with equal probability.
    UniformSwap,
}

/// Convergence and abort detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Sliding window of generations for the improvement test.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Minimum best-fitness improvement over the window.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Population fitness variance below which the run has converged.
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: f64,
    /// Fraction of invalid evaluations that marks a generation as starved.
    #[serde(default = "default_invalid_fraction")]
    pub invalid_fraction: f64,
    /// Consecutive starved generations before the run aborts.
    #[serde(default = "default_invalid_patience")]
    pub invalid_patience: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            epsilon: default_epsilon(),
            variance_threshold: default_variance_threshold(),
            invalid_fraction: default_invalid_fraction(),
            invalid_patience: default_invalid_patience(),
        }
    }
}

fn default_window() -> usize {
    5
}
fn default_epsilon() -> f64 {
    0.001
}
fn default_variance_threshold() -> f64 {
    1e-6
}
fn default_invalid_fraction() -> f64 {
    0.5
}
fn default_invalid_patience() -> usize {
    2
}

impl OptimizerConfig {
    /// Validate optimizer configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population.size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if self.population.max_generations == 0 {
            return Err(ConfigError::InvalidGenerations);
        }
        if self.convergence.window == 0 {
            return Err(ConfigError::InvalidWindow);
        }

        let (lo, hi) = self.weight_bounds;
        if !(lo.is_finite() && hi.is_finite()) || lo >= hi {
            return Err(ConfigError::InvalidBounds(format!(
                "weight min ({lo}) must be below max ({hi})"
            )));
        }

        let rates = [
            ("genetic.crossover_rate", self.genetic.crossover_rate),
            ("genetic.mutation_rate", self.genetic.mutation_rate),
            ("genetic.elitism_fraction", self.genetic.elitism_fraction),
            ("convergence.invalid_fraction", self.convergence.invalid_fraction),
        ];
        for (field, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        if self.genetic.mutation_strength < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "genetic.mutation_strength",
                value: self.genetic.mutation_strength,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Fitness
// ============================================================================

/// Effect size bucket of a correlation (Cohen's thresholds).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    None,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    /// Bucket for a correlation coefficient.
    pub fn from_correlation(r: f64) -> Self {
        let r = r.abs();
        if r < 0.1 {
            EffectSize::None
        } else if r < 0.3 {
            EffectSize::Small
        } else if r < 0.5 {
            EffectSize::Medium
        } else {
            EffectSize::Large
        }
    }
}

/// Why a fitness result carries no statistical weight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Fewer entities than the configured minimum.
    TooFewSamples,
    /// All outcomes identical.
    ZeroOutcomeVariance,
    /// All weighted scores identical.
    ZeroScoreVariance,
    /// Weight vector length differs from the family schema.
    WeightMismatch,
}

/// Correlation of a weighted feature combination against outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitnessResult {
    /// Pearson (or point-biserial) correlation in [-1, 1].
    pub correlation: f64,
    /// Two-sided p-value in [0, 1].
    pub p_value: f64,
    pub effect_size: EffectSize,
    /// Number of entities evaluated.
    pub n: usize,
    pub domain_id: DomainId,
    pub family_id: FamilyId,
    /// Set when the statistics are degenerate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid: Option<InvalidReason>,
}

impl FitnessResult {
    /// Sentinel result for degenerate statistics.
    pub fn invalid(
        reason: InvalidReason,
        n: usize,
        domain_id: impl Into<DomainId>,
        family_id: FamilyId,
    ) -> Self {
        Self {
            correlation: 0.0,
            p_value: 1.0,
            effect_size: EffectSize::None,
            n,
            domain_id: domain_id.into(),
            family_id,
            invalid: Some(reason),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }

    /// Fitness used during optimization; invalid results score 0.
    #[inline]
    pub fn fitness(&self) -> f64 {
        if self.is_valid() { self.correlation } else { 0.0 }
    }

    /// Whether the result is valid and significant at `alpha`.
    #[inline]
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.is_valid() && self.p_value < alpha
    }
}

// ============================================================================
// Run records
// ============================================================================

/// A weight vector for one family and its fitness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormulaCandidate {
    pub family_id: FamilyId,
    pub weights: Vec<f64>,
    /// Generation in which this candidate was created.
    pub generation: usize,
    pub fitness: f64,
}

/// Phase of an optimizer run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerPhase {
    /// Population sampled, nothing evaluated yet.
    #[default]
    Initialized,
    /// Generations are being evaluated and bred.
    Evolving,
    /// Improvement fell below the stability threshold.
    Converged,
    /// Generation cap reached without convergence.
    Exhausted,
    /// Aborted because most evaluations were invalid.
    Aborted,
    /// Stopped through the cancellation handle.
    Cancelled,
}

impl OptimizerPhase {
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, OptimizerPhase::Initialized | OptimizerPhase::Evolving)
    }
}

/// How a sealed run terminated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Converged,
    Exhausted,
    /// More than the allowed fraction of evaluations were invalid.
    InsufficientData,
    Cancelled,
}

/// Single-feature correlation of one schema component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentScreen {
    pub component: String,
    pub correlation: f64,
    pub p_value: f64,
    pub valid: bool,
}

/// Sealed record of one optimizer run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvolutionRun {
    pub family_id: FamilyId,
    pub domain_id: DomainId,
    pub population_size: usize,
    pub generations_run: usize,
    /// Best fitness found so far, per evaluated generation.
    pub best_fitness_trace: Vec<f64>,
    /// Mean population fitness per evaluated generation.
    pub mean_fitness_trace: Vec<f64>,
    /// Mean pairwise weight distance per evaluated generation.
    pub diversity_trace: Vec<f64>,
    pub converged: bool,
    pub convergence_generation: Option<usize>,
    pub termination: Termination,
    pub best_candidate: FormulaCandidate,
    /// Full statistics of the best candidate.
    pub best_result: FitnessResult,
    /// Single-feature screen of each component on this run's dataset.
    pub feature_screen: Vec<ComponentScreen>,
    /// Seed the run's RNG was created from.
    pub seed: u64,
}

impl EvolutionRun {
    /// Run aborted because evaluations were mostly invalid.
    #[inline]
    pub fn insufficient_data(&self) -> bool {
        self.termination == Termination::InsufficientData
    }

    #[inline]
    pub fn cancelled(&self) -> bool {
        self.termination == Termination::Cancelled
    }

    #[inline]
    pub fn best_fitness(&self) -> f64 {
        self.best_candidate.fitness
    }

    /// Whether the run may feed comparator and invariant statistics.
    #[inline]
    pub fn is_countable(&self) -> bool {
        self.best_result.is_valid() && !self.insufficient_data()
    }
}

/// Snapshot of optimizer progress, reported once per generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionProgress {
    pub family_id: FamilyId,
    pub domain_id: DomainId,
    pub generation: usize,
    pub max_generations: usize,
    pub best_fitness: f64,
    pub generation_best: f64,
    pub mean_fitness: f64,
    /// Fraction of this generation's evaluations that were invalid.
    pub invalid_fraction: f64,
    pub phase: OptimizerPhase,
}
