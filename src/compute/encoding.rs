//! Hash-like property tests of a family's label encoding.
//!
//! All analyses are pure functions of the extractor and a fixed label
//! sample. Distances are Euclidean over schema-normalized vectors divided by
//! √dimensions, so they lie in [0, 1].

use std::collections::HashSet;

use rayon::prelude::*;

use crate::compute::evolution::WeightRng;
use crate::compute::features::FeatureExtractor;
use crate::compute::stats;
use crate::schema::{EncodingConfig, EncodingReport, EncodingStrength};

/// Runs the encoding property tests for one extractor.
#[derive(Debug, Clone, Default)]
pub struct EncodingTester {
    config: EncodingConfig,
}

/// Key-space estimate from the principal axes of the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeySpace {
    pub effective_dimensionality: usize,
    pub variance_explained: f64,
    pub log10_size: f64,
}

impl EncodingTester {
    pub fn new(config: EncodingConfig) -> Self {
        Self { config }
    }

    /// Test an extractor over the first `sample_size` distinct labels.
    pub fn test<S: AsRef<str>>(&self, extractor: &dyn FeatureExtractor, labels: &[S]) -> EncodingReport {
        let sample = self.sample(labels);
        let vectors: Vec<Vec<f64>> = sample
            .iter()
            .map(|label| extractor.extract(label).normalized())
            .collect();

        let nearest = nearest_other_distances(&vectors);
        let reconstruction_accuracy = self.reconstruction_accuracy(&vectors);
        let collision_rate = collision_rate(&nearest, self.config.collision_tolerance);
        let avalanche_ratio = self.avalanche_ratio(extractor, &sample, &vectors);
        let key_space = self.key_space(&vectors);

        EncodingReport {
            family_id: extractor.family(),
            sample_size: sample.len(),
            reconstruction_accuracy,
            collision_rate,
            avalanche_ratio,
            effective_dimensionality: key_space.effective_dimensionality,
            variance_explained: key_space.variance_explained,
            key_space_log10: key_space.log10_size,
            strength: classify(avalanche_ratio, collision_rate),
        }
    }

    fn sample<S: AsRef<str>>(&self, labels: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        labels
            .iter()
            .map(|label| label.as_ref())
            .filter(|label| seen.insert(*label))
            .take(self.config.sample_size)
            .map(str::to_string)
            .collect()
    }

    /// Fraction of labels recovered by nearest-neighbor lookup from a noisy
    /// copy of their own vector. Ties count as failures.
    pub fn reconstruction_accuracy(&self, vectors: &[Vec<f64>]) -> f64 {
        if vectors.is_empty() {
            return 0.0;
        }
        let sigma = self.config.reconstruction_noise;
        let recovered = (0..vectors.len())
            .into_par_iter()
            .filter(|&i| {
                // Seeded per label so the score does not depend on scheduling.
                let mut rng = WeightRng::new(i as u64);
                let query: Vec<f64> = vectors[i]
                    .iter()
                    .map(|&v| rng.gaussian_mutate(v, sigma, (0.0, 1.0)))
                    .collect();
                let own = distance(&query, &vectors[i]);
                vectors
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .all(|(_, other)| own < distance(&query, other))
            })
            .count();
        recovered as f64 / vectors.len() as f64
    }

    /// Mean fraction of components that move past the threshold when one
    /// character is replaced by its successor.
    pub fn avalanche_ratio(
        &self,
        extractor: &dyn FeatureExtractor,
        labels: &[String],
        vectors: &[Vec<f64>],
    ) -> f64 {
        let threshold = self.config.avalanche_threshold;
        let per_label: Vec<Option<f64>> = labels
            .par_iter()
            .zip(vectors.par_iter())
            .map(|(label, base)| {
                let chars: Vec<char> = label.chars().collect();
                if chars.is_empty() || base.is_empty() {
                    return None;
                }
                let ratios: Vec<f64> = (0..chars.len())
                    .map(|pos| {
                        let perturbed = perturb(&chars, pos);
                        let changed = extractor.extract(&perturbed).normalized();
                        let flipped = base
                            .iter()
                            .zip(&changed)
                            .filter(|(a, b)| (*a - *b).abs() > threshold)
                            .count();
                        flipped as f64 / base.len() as f64
                    })
                    .collect();
                Some(stats::mean(&ratios))
            })
            .collect();

        let ratios: Vec<f64> = per_label.into_iter().flatten().collect();
        stats::mean(&ratios)
    }

    /// Effective dimensionality and reachable-vector estimate.
    pub fn key_space(&self, vectors: &[Vec<f64>]) -> KeySpace {
        let eigenvalues = stats::symmetric_eigenvalues(&stats::covariance_matrix(vectors));
        let total: f64 = eigenvalues.iter().sum();
        if total <= 0.0 {
            return KeySpace {
                effective_dimensionality: 0,
                variance_explained: 0.0,
                log10_size: 0.0,
            };
        }

        let delta = self.config.collision_tolerance;
        let mut cumulative = 0.0;
        let mut retained = 0;
        let mut log10_size = 0.0;
        for &lambda in &eigenvalues {
            if lambda <= 0.0 {
                break;
            }
            cumulative += lambda;
            retained += 1;
            log10_size += (1.0 + 4.0 * lambda.sqrt() / delta).log10();
            if cumulative / total >= self.config.variance_explained {
                break;
            }
        }

        KeySpace {
            effective_dimensionality: retained,
            variance_explained: (cumulative / total).min(1.0),
            log10_size,
        }
    }
}

/// Replace the character at `pos` with its successor.
fn perturb(chars: &[char], pos: usize) -> String {
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| if i == pos { successor(c) } else { c })
        .collect()
}

/// Next letter or digit with wrap-around; anything else becomes 'a'.
fn successor(c: char) -> char {
    match c {
        'z' => 'a',
        'Z' => 'A',
        '9' => '0',
        'a'..='y' | 'A'..='Y' | '0'..='8' => char::from(c as u8 + 1),
        _ => 'a',
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (sum / a.len() as f64).sqrt()
}

/// Distance from each vector to its nearest other vector.
fn nearest_other_distances(vectors: &[Vec<f64>]) -> Vec<f64> {
    (0..vectors.len())
        .into_par_iter()
        .map(|i| {
            vectors
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, v)| distance(&vectors[i], v))
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}

/// Fraction of labels within `tolerance` of some other label.
fn collision_rate(nearest: &[f64], tolerance: f64) -> f64 {
    if nearest.is_empty() {
        return 0.0;
    }
    nearest.iter().filter(|&&d| d <= tolerance).count() as f64 / nearest.len() as f64
}

fn classify(avalanche_ratio: f64, collision_rate: f64) -> EncodingStrength {
    if avalanche_ratio > 0.5 && collision_rate < 0.05 {
        EncodingStrength::Strong
    } else if avalanche_ratio > 0.2 && collision_rate < 0.25 {
        EncodingStrength::Moderate
    } else {
        EncodingStrength::Weak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::features::StructuralExtractor;
    use crate::schema::{ComponentSpec, FamilyId, FeatureSchema};

    const CONSTANT: &[ComponentSpec] = &[
        ComponentSpec::new("a", 0.0, 1.0),
        ComponentSpec::new("b", 0.0, 1.0),
    ];

    struct ConstantExtractor;

    impl FeatureExtractor for ConstantExtractor {
        fn schema(&self) -> FeatureSchema {
            FeatureSchema {
                family: FamilyId::Hybrid,
                components: CONSTANT,
            }
        }

        fn extract_raw(&self, _label: &str) -> Vec<f64> {
            vec![0.5, 0.25]
        }
    }

    fn labels() -> Vec<String> {
        (1..=20).map(|n| "q".repeat(n)).collect()
    }

    #[test]
    fn test_constant_family_is_degenerate() {
        let report = EncodingTester::default().test(&ConstantExtractor, &labels());
        assert_eq!(report.collision_rate, 1.0);
        assert_eq!(report.avalanche_ratio, 0.0);
        assert_eq!(report.reconstruction_accuracy, 0.0);
        assert_eq!(report.effective_dimensionality, 0);
        assert_eq!(report.key_space_log10, 0.0);
        assert_eq!(report.strength, EncodingStrength::Weak);
    }

    #[test]
    fn test_distinct_lengths_do_not_collide() {
        let report = EncodingTester::default().test(&StructuralExtractor, &labels());
        assert_eq!(report.sample_size, 20);
        assert_eq!(report.collision_rate, 0.0);
        assert_eq!(report.reconstruction_accuracy, 1.0);
        assert!((0.0..=1.0).contains(&report.avalanche_ratio));
        assert!(report.effective_dimensionality >= 1);
        assert!(report.key_space_log10 > 0.0);
    }

    #[test]
    fn test_reconstruction_fails_on_shared_vectors() {
        let tester = EncodingTester::default();
        // Two labels share a vector; the third stands apart.
        let vectors = vec![vec![0.2, 0.2], vec![0.2, 0.2], vec![0.9, 0.1]];
        let accuracy = tester.reconstruction_accuracy(&vectors);
        assert!((accuracy - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(tester.reconstruction_accuracy(&[]), 0.0);
    }

    #[test]
    fn test_reconstruction_degrades_with_noise() {
        let tester = EncodingTester::new(EncodingConfig {
            reconstruction_noise: 0.5,
            ..Default::default()
        });
        let report = tester.test(&StructuralExtractor, &labels());
        assert!(report.reconstruction_accuracy < 1.0);
    }

    #[test]
    fn test_sample_dedupes_and_caps() {
        let tester = EncodingTester::new(EncodingConfig {
            sample_size: 3,
            ..Default::default()
        });
        let report = tester.test(&StructuralExtractor, &["x", "x", "yy", "zzz", "wwww"]);
        assert_eq!(report.sample_size, 3);
    }

    #[test]
    fn test_empty_sample() {
        let report = EncodingTester::default().test::<&str>(&StructuralExtractor, &[]);
        assert_eq!(report.sample_size, 0);
        assert_eq!(report.collision_rate, 0.0);
        assert_eq!(report.avalanche_ratio, 0.0);
    }

    #[test]
    fn test_successor_wraps() {
        assert_eq!(successor('a'), 'b');
        assert_eq!(successor('z'), 'a');
        assert_eq!(successor('Z'), 'A');
        assert_eq!(successor('9'), '0');
        assert_eq!(successor(' '), 'a');
        assert_eq!(perturb(&['a', 'b'], 1), "ac");
    }

    #[test]
    fn test_key_space_of_one_axis() {
        let tester = EncodingTester::default();
        let vectors: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64 / 10.0, 0.3]).collect();
        let key_space = tester.key_space(&vectors);
        assert_eq!(key_space.effective_dimensionality, 1);
        assert!((key_space.variance_explained - 1.0).abs() < 1e-9);
    }
}
