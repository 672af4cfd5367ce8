//! Quick evolution performance test

use formula_forge::{
    compute::{
        evolution::{FeatureMatrix, FitnessEvaluator, GeneticOptimizer},
        features::FamilyRegistry,
    },
    schema::{
        Dataset, Entity, FamilyId, GeneticAlgorithmConfig, OptimizerConfig, Outcome, OutcomeKind,
        PopulationConfig, SelectionMethod,
    },
};
use std::time::Instant;

const SYLLABLES: [&str; 10] = ["ar", "bel", "cor", "di", "en", "fa", "gul", "ho", "ix", "jo"];

fn synthetic_dataset(size: usize) -> Dataset {
    let entities = (0..size)
        .map(|i| {
            let label: String = (0..1 + i % 5)
                .map(|j| SYLLABLES[(i * 3 + j * 7) % SYLLABLES.len()])
                .collect();
            let outcome = label.len() as f64 + (i % 3) as f64;
            Entity::new(format!("{label}-{i}"), Outcome::Numeric(outcome))
        })
        .collect();
    Dataset::new("perf", OutcomeKind::Continuous, entities)
}

fn config(population: usize, generations: usize) -> OptimizerConfig {
    OptimizerConfig {
        population: PopulationConfig {
            size: population,
            max_generations: generations,
        },
        genetic: GeneticAlgorithmConfig {
            mutation_rate: 0.2,
            mutation_strength: 0.3,
            crossover_rate: 0.8,
            selection: SelectionMethod::Tournament { size: 3 },
            ..Default::default()
        },
        random_seed: Some(42),
        ..Default::default()
    }
}

fn main() {
    println!("=== Evolution Performance Test ===\n");

    let registry = FamilyRegistry::builtin();
    let evaluator = FitnessEvaluator::default();

    // Test different dataset sizes
    for size in [100, 500, 2000] {
        println!("Dataset size: {}", size);
        let dataset = synthetic_dataset(size);

        for family in [FamilyId::Phonetic, FamilyId::Structural, FamilyId::Hybrid] {
            let Some(extractor) = registry.get(family) else {
                continue;
            };
            let start = Instant::now();
            let matrix = FeatureMatrix::build(extractor.as_ref(), &dataset);
            let extract_time = start.elapsed();

            let optimizer = GeneticOptimizer::new(config(40, 30), evaluator.clone(), matrix);
            let run = optimizer.run();
            let elapsed = start.elapsed();

            let evals = run.population_size * run.generations_run;
            println!(
                "  {:<12} gens={:<3} evals={:<5} extract={:.3}s total={:.2}s ({:.0} evals/sec) best={:.4} {:?}",
                family,
                run.generations_run,
                evals,
                extract_time.as_secs_f64(),
                elapsed.as_secs_f64(),
                evals as f64 / elapsed.as_secs_f64(),
                run.best_fitness(),
                run.termination
            );
        }
        println!();
    }

    println!("=== Scalability Test (fixed 500 entities) ===\n");

    let dataset = synthetic_dataset(500);
    let Some(extractor) = registry.get(FamilyId::Hybrid) else {
        return;
    };
    let matrix = FeatureMatrix::build(extractor.as_ref(), &dataset);

    // Test different population sizes
    for pop_size in [10, 20, 40, 80] {
        let start = Instant::now();
        let optimizer = GeneticOptimizer::new(config(pop_size, 10), evaluator.clone(), matrix.clone());
        let run = optimizer.run();
        let elapsed = start.elapsed();

        let total_evals = run.population_size * run.generations_run;
        println!(
            "Population {}: {} evals in {:.2}s ({:.1} evals/sec)",
            pop_size,
            total_evals,
            elapsed.as_secs_f64(),
            total_evals as f64 / elapsed.as_secs_f64()
        );
    }
}
