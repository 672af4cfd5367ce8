//! Genetic search over weight vectors for one (domain, family) pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use rayon::prelude::*;

use crate::compute::features::FeatureExtractor;
use crate::compute::stats;
use crate::schema::{
    Dataset, EvolutionProgress, EvolutionRun, FamilyId, Fingerprint, FitnessResult,
    FormulaCandidate, OptimizerConfig, OptimizerPhase, SelectionMethod, Termination,
};

use super::fitness::{FeatureMatrix, FitnessEvaluator};
use super::genome::{WeightRng, weight_distance};

/// A candidate individual in the population.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The weight vector.
    pub weights: Vec<f64>,
    /// Evaluation result, `None` until evaluated.
    pub result: Option<FitnessResult>,
    /// Generation created.
    pub generation: usize,
}

impl Candidate {
    fn new(weights: Vec<f64>, generation: usize) -> Self {
        Self {
            weights,
            result: None,
            generation,
        }
    }

    /// Fitness used for selection; unevaluated and invalid candidates score 0.
    #[inline]
    pub fn fitness(&self) -> f64 {
        self.result.as_ref().map_or(0.0, FitnessResult::fitness)
    }

    #[inline]
    fn is_invalid(&self) -> bool {
        self.result.as_ref().is_some_and(|r| !r.is_valid())
    }

    fn to_formula(&self, family_id: FamilyId) -> FormulaCandidate {
        FormulaCandidate {
            family_id,
            weights: self.weights.clone(),
            generation: self.generation,
            fitness: self.fitness(),
        }
    }
}

/// Derive a per-run seed from a base seed, the domain and the family.
pub fn derive_seed(base: u64, domain_id: &str, family: FamilyId) -> u64 {
    Fingerprint::new()
        .u64(base)
        .str(domain_id)
        .u64(family.index() as u64)
        .finish()
}

/// Genetic optimizer that owns one run from initialization until sealing.
pub struct GeneticOptimizer {
    config: OptimizerConfig,
    evaluator: FitnessEvaluator,
    matrix: FeatureMatrix,
    rng: WeightRng,
    seed: u64,
    phase: OptimizerPhase,
    population: Vec<Candidate>,
    best: Option<Candidate>,
    generation: usize,
    best_trace: Vec<f64>,
    mean_trace: Vec<f64>,
    diversity_trace: Vec<f64>,
    starved_generations: usize,
    cancelled: Arc<AtomicBool>,
}

impl GeneticOptimizer {
    /// Create an optimizer over pre-extracted features.
    pub fn new(config: OptimizerConfig, evaluator: FitnessEvaluator, matrix: FeatureMatrix) -> Self {
        let seed = config.random_seed.unwrap_or_else(rand::random);
        Self {
            rng: WeightRng::new(seed),
            seed,
            config,
            evaluator,
            matrix,
            phase: OptimizerPhase::Initialized,
            population: Vec::new(),
            best: None,
            generation: 0,
            best_trace: Vec::new(),
            mean_trace: Vec::new(),
            diversity_trace: Vec::new(),
            starved_generations: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an optimizer for a dataset, extracting its features first.
    pub fn for_dataset(
        config: OptimizerConfig,
        evaluator: FitnessEvaluator,
        extractor: &dyn FeatureExtractor,
        dataset: &Dataset,
    ) -> Self {
        Self::new(config, evaluator, FeatureMatrix::build(extractor, dataset))
    }

    /// Share an external cancellation flag.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn phase(&self) -> OptimizerPhase {
        self.phase
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Initialize the population.
    pub fn initialize(&mut self) {
        let dims = self.matrix.dimensions();
        let bounds = self.config.weight_bounds;

        self.population = (0..self.config.population.size)
            .map(|_| Candidate::new(self.rng.random_weights(dims, bounds), 0))
            .collect();
        self.generation = 0;
        self.best = None;
        self.best_trace.clear();
        self.mean_trace.clear();
        self.diversity_trace.clear();
        self.starved_generations = 0;
        self.phase = OptimizerPhase::Initialized;
    }

    /// Evaluate all unevaluated candidates in parallel.
    fn evaluate_population(&mut self) {
        let evaluator = &self.evaluator;
        let matrix = &self.matrix;

        self.population
            .par_iter_mut()
            .filter(|c| c.result.is_none())
            .for_each(|candidate| {
                candidate.result = Some(evaluator.evaluate_matrix(&candidate.weights, matrix));
            });
    }

    /// Fold the evaluated generation into the run history.
    ///
    /// Returns the fraction of invalid evaluations.
    fn record_generation(&mut self) -> f64 {
        let size = self.population.len().max(1) as f64;

        let mut gen_best_index = 0;
        for (i, candidate) in self.population.iter().enumerate() {
            if candidate.fitness() > self.population[gen_best_index].fitness() {
                gen_best_index = i;
            }
        }
        let gen_best = &self.population[gen_best_index];
        let improved = self
            .best
            .as_ref()
            .is_none_or(|best| gen_best.fitness() > best.fitness());
        if improved {
            self.best = Some(gen_best.clone());
        }

        let fitness: Vec<f64> = self.population.iter().map(Candidate::fitness).collect();
        let best_fitness = self.best.as_ref().map_or(0.0, Candidate::fitness);
        self.best_trace.push(best_fitness);
        self.mean_trace.push(stats::mean(&fitness));
        self.diversity_trace.push(self.compute_diversity());

        let invalid = self.population.iter().filter(|c| c.is_invalid()).count();
        self.generation += 1;
        invalid as f64 / size
    }

    /// Decide whether the run stops after the generation just recorded.
    fn check_termination(&mut self, invalid_fraction: f64) -> Option<Termination> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(Termination::Cancelled);
        }

        let convergence = &self.config.convergence;
        if invalid_fraction > convergence.invalid_fraction {
            self.starved_generations += 1;
            if self.starved_generations >= convergence.invalid_patience {
                return Some(Termination::InsufficientData);
            }
        } else {
            self.starved_generations = 0;

            let window = convergence.window;
            if self.best_trace.len() > window {
                let last = self.best_trace.len() - 1;
                let improvement = self.best_trace[last] - self.best_trace[last - window];
                if improvement < convergence.epsilon {
                    return Some(Termination::Converged);
                }
            }

            let fitness: Vec<f64> = self.population.iter().map(Candidate::fitness).collect();
            if stats::variance(&fitness) < convergence.variance_threshold {
                return Some(Termination::Converged);
            }
        }

        if self.generation >= self.config.population.max_generations {
            return Some(Termination::Exhausted);
        }
        None
    }

    /// Breed the next generation: elites survive, the rest are offspring.
    fn step_generation(&mut self) {
        let ga = self.config.genetic.clone();
        let bounds = self.config.weight_bounds;
        let size = self.config.population.size;

        // Stable sort keeps index order among ties.
        self.population
            .sort_by(|a, b| b.fitness().total_cmp(&a.fitness()));

        let mut next_gen = Vec::with_capacity(size);
        let elites = ga.elite_count(self.population.len());
        next_gen.extend(self.population.iter().take(elites).cloned());

        while next_gen.len() < size {
            let idx1 = self.select_index(&ga.selection);
            let idx2 = self.select_index(&ga.selection);

            let mut child = if self.rng.unit() < ga.crossover_rate {
                self.rng.crossover(
                    &self.population[idx1].weights,
                    &self.population[idx2].weights,
                    ga.crossover,
                )
            } else {
                self.population[idx1].weights.clone()
            };
            self.rng
                .mutate(&mut child, ga.mutation_rate, ga.mutation_strength, bounds);

            next_gen.push(Candidate::new(child, self.generation));
        }

        self.population = next_gen;
    }

    /// Select a parent index from the fitness-sorted population.
    fn select_index(&mut self, method: &SelectionMethod) -> usize {
        let len = self.population.len();
        match method {
            SelectionMethod::FitnessProportional => {
                let total: f64 = self.population.iter().map(|c| c.fitness().max(0.0)).sum();
                if total <= 0.0 {
                    return self.rng.index(len);
                }

                let target = self.rng.unit() * total;
                let mut cumulative = 0.0;
                for (i, candidate) in self.population.iter().enumerate() {
                    cumulative += candidate.fitness().max(0.0);
                    if cumulative >= target {
                        return i;
                    }
                }
                len - 1
            }
            SelectionMethod::Tournament { size } => {
                let mut best_idx = self.rng.index(len);
                for _ in 1..(*size).max(1) {
                    let idx = self.rng.index(len);
                    if self.population[idx].fitness() > self.population[best_idx].fitness() {
                        best_idx = idx;
                    }
                }
                best_idx
            }
            SelectionMethod::RankBased => {
                // Probability proportional to rank; population is sorted best first.
                let total_rank = len * (len + 1) / 2;
                let mut target = self.rng.index(total_rank);
                for i in 0..len {
                    let rank = len - i;
                    if target < rank {
                        return i;
                    }
                    target -= rank;
                }
                0
            }
        }
    }

    /// Compute population diversity.
    fn compute_diversity(&self) -> f64 {
        let n = self.population.len();
        if n < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                total += weight_distance(&self.population[i].weights, &self.population[j].weights);
                count += 1;
            }
        }
        total / count as f64
    }

    /// Get current progress.
    pub fn progress(&self, invalid_fraction: f64) -> EvolutionProgress {
        let fitness: Vec<f64> = self.population.iter().map(Candidate::fitness).collect();
        let generation_best = fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        EvolutionProgress {
            family_id: self.matrix.family(),
            domain_id: self.matrix.domain_id().to_string(),
            generation: self.generation,
            max_generations: self.config.population.max_generations,
            best_fitness: self.best.as_ref().map_or(0.0, Candidate::fitness),
            generation_best,
            mean_fitness: stats::mean(&fitness),
            invalid_fraction,
            phase: self.phase,
        }
    }

    /// Run evolution with progress callback and seal the result.
    pub fn run_with_callback<F>(mut self, callback: F) -> EvolutionRun
    where
        F: Fn(&EvolutionProgress),
    {
        self.initialize();
        self.phase = OptimizerPhase::Evolving;
        debug!(
            "Evolving {} / {} (population {}, seed {})",
            self.matrix.domain_id(),
            self.matrix.family(),
            self.population.len(),
            self.seed
        );

        let termination = loop {
            self.evaluate_population();
            let invalid_fraction = self.record_generation();
            callback(&self.progress(invalid_fraction));

            if let Some(termination) = self.check_termination(invalid_fraction) {
                break termination;
            }
            self.step_generation();
        };

        self.seal(termination)
    }

    /// Run evolution (blocking).
    pub fn run(self) -> EvolutionRun {
        self.run_with_callback(|_| {})
    }

    /// Freeze the run into an immutable record.
    fn seal(mut self, termination: Termination) -> EvolutionRun {
        self.phase = match termination {
            Termination::Converged => OptimizerPhase::Converged,
            Termination::Exhausted => OptimizerPhase::Exhausted,
            Termination::InsufficientData => OptimizerPhase::Aborted,
            Termination::Cancelled => OptimizerPhase::Cancelled,
        };

        let family = self.matrix.family();
        let best = match self.best.take() {
            Some(best) => best,
            None => Candidate::new(vec![0.0; self.matrix.dimensions()], 0),
        };
        let best_result = match &best.result {
            Some(result) => result.clone(),
            None => self.evaluator.evaluate_matrix(&best.weights, &self.matrix),
        };
        let converged = termination == Termination::Converged;

        info!(
            "Sealed {} / {}: {:?} after {} generations, best fitness {:.4}",
            self.matrix.domain_id(),
            family,
            termination,
            self.generation,
            best.fitness()
        );

        EvolutionRun {
            family_id: family,
            domain_id: self.matrix.domain_id().to_string(),
            population_size: self.config.population.size,
            generations_run: self.generation,
            best_fitness_trace: self.best_trace,
            mean_fitness_trace: self.mean_trace,
            diversity_trace: self.diversity_trace,
            converged,
            convergence_generation: converged.then(|| self.generation - 1),
            termination,
            best_candidate: best.to_formula(family),
            best_result,
            feature_screen: self.evaluator.screen_components(&self.matrix),
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::features::StructuralExtractor;
    use crate::schema::{ConvergenceConfig, Entity, Outcome, OutcomeKind, PopulationConfig};
    use proptest::prelude::*;
    use std::cell::Cell;

    fn length_dataset(n: usize) -> Dataset {
        let entities = (0..n)
            .map(|i| Entity::new("x".repeat(i + 1), Outcome::Numeric(i as f64)))
            .collect();
        Dataset::new("lengths", OutcomeKind::Continuous, entities)
    }

    fn test_config(max_generations: usize, seed: u64) -> OptimizerConfig {
        OptimizerConfig {
            population: PopulationConfig {
                size: 20,
                max_generations,
            },
            convergence: ConvergenceConfig {
                variance_threshold: 0.0,
                ..Default::default()
            },
            random_seed: Some(seed),
            ..Default::default()
        }
    }

    fn optimizer(config: OptimizerConfig, dataset: &Dataset) -> GeneticOptimizer {
        GeneticOptimizer::for_dataset(
            config,
            FitnessEvaluator::default(),
            &StructuralExtractor,
            dataset,
        )
    }

    #[test]
    fn test_optimizer_initialize() {
        let dataset = length_dataset(20);
        let mut opt = optimizer(test_config(5, 1), &dataset);
        opt.initialize();
        assert_eq!(opt.population.len(), 20);
        assert_eq!(opt.phase(), OptimizerPhase::Initialized);
        assert!(opt.population.iter().all(|c| c.weights.len() == 8));
    }

    #[test]
    fn test_same_seed_same_run() {
        let dataset = length_dataset(25);
        let a = optimizer(test_config(8, 42), &dataset).run();
        let b = optimizer(test_config(8, 42), &dataset).run();
        assert_eq!(a, b);
        assert_eq!(a.seed, 42);
    }

    #[test]
    fn test_exhaustion_is_not_an_error() {
        let dataset = length_dataset(20);
        let run = optimizer(test_config(3, 9), &dataset).run();
        assert_eq!(run.termination, Termination::Exhausted);
        assert_eq!(run.generations_run, 3);
        assert_eq!(run.best_fitness_trace.len(), 3);
        assert!(!run.converged);
        assert_eq!(run.convergence_generation, None);
    }

    #[test]
    fn test_convergence_detected() {
        // Fitness lives in [-1, 1]: nine windows each gaining 0.25 cannot fit,
        // so the improvement test must fire before the cap.
        let dataset = length_dataset(20);
        let mut config = test_config(50, 5);
        config.convergence.epsilon = 0.25;
        let run = optimizer(config, &dataset).run();

        assert!(run.converged);
        assert_eq!(run.termination, Termination::Converged);
        let at = run.convergence_generation.unwrap();
        assert_eq!(at + 1, run.generations_run);
        assert!(run.best_fitness() >= run.best_fitness_trace[0]);
        assert!(run.best_result.is_valid());
    }

    #[test]
    fn test_small_dataset_aborts_with_insufficient_data() {
        let dataset = length_dataset(3);
        let run = optimizer(test_config(15, 3), &dataset).run();

        assert!(run.insufficient_data());
        assert!(!run.converged);
        assert_eq!(run.generations_run, 2);
        assert_eq!(run.best_fitness(), 0.0);
        assert!(!run.best_result.is_valid());
        assert!(!run.is_countable());
    }

    #[test]
    fn test_cancellation_seals_partial_run() {
        let dataset = length_dataset(20);
        let opt = optimizer(test_config(100, 4), &dataset);
        let cancel = opt.cancel_handle();
        cancel.store(true, Ordering::Relaxed);

        let run = opt.run();
        assert!(run.cancelled());
        assert!(!run.converged);
        assert_eq!(run.generations_run, 1);
        assert_eq!(run.best_candidate.weights.len(), 8);
    }

    #[test]
    fn test_progress_callback_per_generation() {
        let dataset = length_dataset(20);
        let calls = Cell::new(0);
        let run = optimizer(test_config(4, 11), &dataset).run_with_callback(|progress| {
            calls.set(calls.get() + 1);
            assert_eq!(progress.phase, OptimizerPhase::Evolving);
            assert_eq!(progress.family_id, FamilyId::Structural);
        });
        assert_eq!(calls.get(), run.generations_run);
    }

    #[test]
    fn test_selection_methods_run() {
        let dataset = length_dataset(20);
        for selection in [
            SelectionMethod::FitnessProportional,
            SelectionMethod::Tournament { size: 3 },
            SelectionMethod::RankBased,
        ] {
            let mut config = test_config(4, 2);
            config.genetic.selection = selection;
            let run = optimizer(config, &dataset).run();
            assert_eq!(run.generations_run, 4);
        }
    }

    #[test]
    fn test_feature_screen_recorded() {
        let dataset = length_dataset(20);
        let run = optimizer(test_config(2, 6), &dataset).run();
        assert_eq!(run.feature_screen.len(), 8);
        assert_eq!(run.feature_screen[0].component, "length");
    }

    #[test]
    fn test_derive_seed_is_stable_and_distinct() {
        let a = derive_seed(1, "films", FamilyId::Phonetic);
        assert_eq!(a, derive_seed(1, "films", FamilyId::Phonetic));
        assert_ne!(a, derive_seed(1, "films", FamilyId::Semantic));
        assert_ne!(a, derive_seed(1, "books", FamilyId::Phonetic));
        // Pinned so a configured seed reproduces across toolchains.
        assert_eq!(a, 0x9a8c_c725_8445_8ed4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_best_trace_non_decreasing(seed in any::<u64>()) {
            let dataset = length_dataset(15);
            let run = optimizer(test_config(6, seed), &dataset).run();
            for pair in run.best_fitness_trace.windows(2) {
                prop_assert!(pair[1] >= pair[0]);
            }
        }
    }
}
