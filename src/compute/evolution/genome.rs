//! Weight-vector manipulation utilities for evolutionary search.
//!
//! Provides random generation, crossover, and mutation operations.

use rand::prelude::*;

use crate::schema::CrossoverMethod;

/// Random number generator wrapper for weight-vector operations.
pub struct WeightRng {
    rng: StdRng,
}

impl WeightRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Independent uniform sample of every component within bounds.
    pub fn random_weights(&mut self, len: usize, bounds: (f64, f64)) -> Vec<f64> {
        (0..len).map(|_| self.uniform(bounds)).collect()
    }

    /// Uniform random in bounds.
    fn uniform(&mut self, bounds: (f64, f64)) -> f64 {
        self.rng.gen_range(bounds.0..=bounds.1)
    }

    /// Uniform float in [0, 1).
    pub fn unit(&mut self) -> f64 {
        self.rng.r#gen::<f64>()
    }

    /// Uniform index below `len` (which must be positive).
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Gaussian mutation: add noise scaled to the bounds width.
    pub fn gaussian_mutate(&mut self, value: f64, strength: f64, bounds: (f64, f64)) -> f64 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        let mutated = value + noise * strength * (bounds.1 - bounds.0);
        mutated.clamp(bounds.0, bounds.1)
    }

    /// Perform crossover between two weight vectors.
    pub fn crossover(&mut self, parent1: &[f64], parent2: &[f64], method: CrossoverMethod) -> Vec<f64> {
        match method {
            CrossoverMethod::Blend => {
                let t = self.unit();
                parent1
                    .iter()
                    .zip(parent2)
                    .map(|(&a, &b)| blend(a, b, t))
                    .collect()
            }
            CrossoverMethod::UniformSwap => parent1
                .iter()
                .zip(parent2)
                .map(|(&a, &b)| if self.rng.gen_bool(0.5) { a } else { b })
                .collect(),
        }
    }

    /// Mutate each component with probability `rate`.
    pub fn mutate(&mut self, weights: &mut [f64], rate: f64, strength: f64, bounds: (f64, f64)) {
        for w in weights.iter_mut() {
            if self.unit() < rate {
                *w = self.gaussian_mutate(*w, strength, bounds);
            }
        }
    }
}

/// Linear blend between two values.
fn blend(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// Mean absolute component difference between two weight vectors.
pub fn weight_distance(w1: &[f64], w2: &[f64]) -> f64 {
    let count = w1.len().min(w2.len());
    if count == 0 {
        return 0.0;
    }
    w1.iter()
        .zip(w2)
        .map(|(a, b)| (a - b).abs())
        .sum::<f64>()
        / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: (f64, f64) = (-1.0, 1.0);

    #[test]
    fn test_random_weights() {
        let mut rng = WeightRng::new(42);
        let w = rng.random_weights(8, BOUNDS);
        assert_eq!(w.len(), 8);
        assert!(w.iter().all(|v| (BOUNDS.0..=BOUNDS.1).contains(v)));
    }

    #[test]
    fn test_seeded_rng_reproducible() {
        let mut a = WeightRng::new(7);
        let mut b = WeightRng::new(7);
        assert_eq!(a.random_weights(5, BOUNDS), b.random_weights(5, BOUNDS));
        assert_eq!(a.unit(), b.unit());
    }

    #[test]
    fn test_blend_crossover_stays_between_parents() {
        let mut rng = WeightRng::new(42);
        let p1 = vec![-1.0, 0.0, 0.5];
        let p2 = vec![1.0, 0.0, -0.5];
        let child = rng.crossover(&p1, &p2, CrossoverMethod::Blend);
        assert_eq!(child.len(), 3);
        for ((c, a), b) in child.iter().zip(&p1).zip(&p2) {
            assert!(*c >= a.min(*b) - 1e-12 && *c <= a.max(*b) + 1e-12);
        }
    }

    #[test]
    fn test_uniform_swap_takes_parent_values() {
        let mut rng = WeightRng::new(3);
        let p1 = vec![1.0; 16];
        let p2 = vec![-1.0; 16];
        let child = rng.crossover(&p1, &p2, CrossoverMethod::UniformSwap);
        assert!(child.iter().all(|&v| v == 1.0 || v == -1.0));
    }

    #[test]
    fn test_mutation_respects_bounds() {
        let mut rng = WeightRng::new(42);
        let mut w = vec![0.99, -0.99, 0.0, 0.5];
        rng.mutate(&mut w, 1.0, 5.0, BOUNDS);
        assert!(w.iter().all(|v| (BOUNDS.0..=BOUNDS.1).contains(v)));
    }

    #[test]
    fn test_zero_rate_mutation_is_identity() {
        let mut rng = WeightRng::new(42);
        let original = vec![0.1, 0.2, 0.3];
        let mut w = original.clone();
        rng.mutate(&mut w, 0.0, 0.5, BOUNDS);
        assert_eq!(w, original);
    }

    #[test]
    fn test_weight_distance() {
        let a = vec![0.0, 1.0];
        let b = vec![1.0, 0.0];
        assert!((weight_distance(&a, &a)).abs() < 1e-12);
        assert!((weight_distance(&a, &b) - 1.0).abs() < 1e-12);
    }
}
