//! Benchmarks for feature extraction and the genetic optimizer.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use formula_forge::{
    compute::{
        EncodingTester,
        evolution::{FeatureMatrix, FitnessEvaluator, GeneticOptimizer},
        features::{HybridExtractor, PhoneticExtractor, extract},
    },
    schema::{Dataset, Entity, EncodingConfig, FamilyId, OptimizerConfig, Outcome, OutcomeKind},
};

const SYLLABLES: [&str; 12] = [
    "ka", "lo", "mi", "ren", "tor", "va", "sel", "qui", "dra", "no", "phi", "zu",
];

fn synthetic_dataset(size: usize) -> Dataset {
    let entities = (0..size)
        .map(|i| {
            let label: String = (0..2 + i % 4)
                .map(|j| SYLLABLES[(i * 7 + j * 5) % SYLLABLES.len()])
                .collect();
            Entity::new(format!("{label}{i}"), Outcome::Numeric((i % 17) as f64))
        })
        .collect();
    Dataset::new("bench", OutcomeKind::Continuous, entities)
}

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    let labels: Vec<String> = synthetic_dataset(200)
        .labels()
        .map(str::to_string)
        .collect();

    for family in [FamilyId::Phonetic, FamilyId::Structural, FamilyId::Hybrid] {
        group.bench_with_input(BenchmarkId::from_parameter(family), &family, |b, &family| {
            b.iter(|| {
                for label in &labels {
                    black_box(extract(label, family));
                }
            });
        });
    }

    group.finish();
}

fn bench_fitness(c: &mut Criterion) {
    let mut group = c.benchmark_group("fitness");
    let evaluator = FitnessEvaluator::default();

    for size in [50, 200, 1000] {
        let dataset = synthetic_dataset(size);
        let matrix = FeatureMatrix::build(&PhoneticExtractor, &dataset);
        let weights = vec![0.25; matrix.dimensions()];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(evaluator.evaluate_matrix(black_box(&weights), &matrix)));
        });
    }

    group.finish();
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer_run");
    group.sample_size(10);
    let dataset = synthetic_dataset(200);
    let matrix = FeatureMatrix::build(&HybridExtractor, &dataset);

    for population in [20, 50, 100] {
        let mut config = OptimizerConfig::default();
        config.population.size = population;
        config.population.max_generations = 20;
        config.random_seed = Some(42);

        group.bench_with_input(
            BenchmarkId::from_parameter(population),
            &population,
            |b, _| {
                b.iter(|| {
                    let optimizer = GeneticOptimizer::new(
                        config.clone(),
                        FitnessEvaluator::default(),
                        matrix.clone(),
                    );
                    black_box(optimizer.run())
                });
            },
        );
    }

    group.finish();
}

fn bench_encoding(c: &mut Criterion) {
    let labels: Vec<String> = synthetic_dataset(200)
        .labels()
        .map(str::to_string)
        .collect();
    let tester = EncodingTester::new(EncodingConfig::default());

    c.bench_function("encoding_hybrid_200", |b| {
        b.iter(|| black_box(tester.test(&HybridExtractor, &labels)));
    });
}

criterion_group!(
    benches,
    bench_extraction,
    bench_fitness,
    bench_optimizer,
    bench_encoding
);
criterion_main!(benches);
