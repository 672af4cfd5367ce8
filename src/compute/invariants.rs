//! Invariant mining over the best weight vectors of converged runs.
//!
//! Relations are tested per family against a fixed catalog of reference
//! constants. A relation is reported only when it recurs in at least the
//! minimum support fraction of qualifying runs and enough runs qualify;
//! otherwise it is listed as insufficient evidence.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::{E, PI, SQRT_2};

use crate::compute::features;
use crate::schema::{
    EvolutionRun, FamilyId, InsufficientEvidence, Invariant, InvariantConfig, MiningReport,
};

const PHI: f64 = 1.618_033_988_749_895;
const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Magnitudes below this are treated as zero.
const ZERO: f64 = 1e-9;

/// Reference constants for magnitude ratios, larger over smaller.
pub const RATIO_CATALOG: &[(&str, f64)] = &[
    ("φ", PHI),
    ("2", 2.0),
    ("3/2", 1.5),
    ("4/3", 4.0 / 3.0),
    ("3", 3.0),
    ("π", PI),
    ("e", E),
    ("√2", SQRT_2),
    ("√3", SQRT_3),
];

/// Reference constants for pairwise weight sums.
pub const SUM_CATALOG: &[(&str, f64)] = &[("1", 1.0), ("φ", PHI), ("1/φ", 1.0 / PHI)];

/// One relation observed in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub description: String,
    /// Reference constant, or the observed common step for sequences.
    pub value: f64,
}

/// Whether `value` lies within a relative `tolerance` of `target`.
#[inline]
pub fn within(value: f64, target: f64, tolerance: f64) -> bool {
    target.abs() > ZERO && ((value - target) / target).abs() <= tolerance
}

/// Every catalog relation one weight vector satisfies.
pub fn observe(weights: &[f64], names: &[&str], tolerance: f64) -> Vec<Observation> {
    let name = |i: usize| names.get(i).map_or_else(|| format!("w{i}"), |n| n.to_string());
    let mut found = Vec::new();

    for i in 0..weights.len() {
        for j in (i + 1)..weights.len() {
            let (a, b) = (weights[i].abs(), weights[j].abs());
            let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
            if lo > ZERO {
                let ratio = hi / lo;
                for &(label, constant) in RATIO_CATALOG {
                    if within(ratio, constant, tolerance) {
                        found.push(Observation {
                            description: format!("|{}| : |{}| ≈ {label}", name(i), name(j)),
                            value: constant,
                        });
                    }
                }
            }

            let sum = weights[i] + weights[j];
            for &(label, constant) in SUM_CATALOG {
                if within(sum, constant, tolerance) {
                    found.push(Observation {
                        description: format!("{} + {} ≈ {label}", name(i), name(j)),
                        value: constant,
                    });
                }
            }
        }
    }

    let total: f64 = weights.iter().sum();
    if within(total, 1.0, tolerance) {
        found.push(Observation {
            description: "sum of weights ≈ 1".to_string(),
            value: 1.0,
        });
    }

    let mut magnitudes: Vec<f64> = weights.iter().map(|w| w.abs()).collect();
    magnitudes.sort_by(|a, b| b.total_cmp(a));
    if let Some(step) = arithmetic_step(&magnitudes, tolerance) {
        found.push(Observation {
            description: "sorted weight magnitudes form an arithmetic sequence".to_string(),
            value: step,
        });
    }
    if let Some(ratio) = geometric_ratio(&magnitudes, tolerance) {
        found.push(Observation {
            description: "sorted weight magnitudes form a geometric sequence".to_string(),
            value: ratio,
        });
    }

    found
}

/// Common difference of a descending sequence, if all steps agree.
fn arithmetic_step(sorted: &[f64], tolerance: f64) -> Option<f64> {
    if sorted.len() < 3 {
        return None;
    }
    let steps: Vec<f64> = sorted.windows(2).map(|w| w[0] - w[1]).collect();
    let mean = steps.iter().sum::<f64>() / steps.len() as f64;
    steps
        .iter()
        .all(|&s| within(s, mean, tolerance))
        .then_some(mean)
}

/// Common ratio of a descending sequence, if all ratios agree.
fn geometric_ratio(sorted: &[f64], tolerance: f64) -> Option<f64> {
    if sorted.len() < 3 || sorted.iter().any(|&m| m <= ZERO) {
        return None;
    }
    let ratios: Vec<f64> = sorted.windows(2).map(|w| w[0] / w[1]).collect();
    let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
    // A constant sequence is arithmetic with step 0, not geometric.
    if within(mean, 1.0, tolerance) {
        return None;
    }
    ratios
        .iter()
        .all(|&r| within(r, mean, tolerance))
        .then_some(mean)
}

/// Mines recurring relations across runs.
#[derive(Debug, Clone, Default)]
pub struct InvariantMiner {
    config: InvariantConfig,
}

impl InvariantMiner {
    pub fn new(config: InvariantConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InvariantConfig {
        &self.config
    }

    /// Mine every family present in `runs`.
    ///
    /// Only converged runs with valid statistics qualify.
    pub fn mine<'a, I>(&self, runs: I) -> MiningReport
    where
        I: IntoIterator<Item = &'a EvolutionRun>,
    {
        let mut total_runs = 0;
        let mut by_family: BTreeMap<FamilyId, Vec<&EvolutionRun>> = BTreeMap::new();
        for run in runs {
            total_runs += 1;
            if run.converged && run.is_countable() {
                by_family.entry(run.family_id).or_default().push(run);
            }
        }

        let mut report = MiningReport {
            total_runs,
            ..Default::default()
        };
        for (family, runs) in by_family {
            report.qualifying_runs += runs.len();
            self.mine_family(family, &runs, &mut report);
        }

        report.invariants.sort_by(|a, b| {
            a.family_id
                .cmp(&b.family_id)
                .then(b.occurrence_rate.total_cmp(&a.occurrence_rate))
                .then_with(|| a.description.cmp(&b.description))
        });
        report
    }

    fn mine_family(&self, family: FamilyId, runs: &[&EvolutionRun], report: &mut MiningReport) {
        let names: Vec<&str> = features::schema_of(family).component_names().collect();
        let qualifying = runs.len();

        // description -> (runs exhibiting, summed value)
        let mut hits: BTreeMap<String, (usize, f64)> = BTreeMap::new();
        for run in runs {
            let mut seen = BTreeSet::new();
            for obs in observe(&run.best_candidate.weights, &names, self.config.tolerance) {
                if seen.insert(obs.description.clone()) {
                    let entry = hits.entry(obs.description).or_insert((0, 0.0));
                    entry.0 += 1;
                    entry.1 += obs.value;
                }
            }
        }

        for (description, (count, value_sum)) in hits {
            let occurrence_rate = count as f64 / qualifying as f64;
            if occurrence_rate < self.config.min_support {
                continue;
            }
            let numeric_value = value_sum / count as f64;

            if qualifying >= self.config.min_runs {
                report.invariants.push(Invariant {
                    family_id: family,
                    description,
                    numeric_value,
                    occurrence_rate,
                    supporting_runs: count,
                });
            } else {
                report.insufficient_evidence.push(InsufficientEvidence {
                    family_id: family,
                    description,
                    numeric_value,
                    occurrence_rate,
                    qualifying_runs: qualifying,
                    required_runs: self.config.min_runs,
                });
            }
        }
    }
}
