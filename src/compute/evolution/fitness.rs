//! Fitness evaluation: correlation of weighted features against outcomes.
//!
//! Features of a dataset are extracted once into a [`FeatureMatrix`]; a
//! candidate is then scored as `Σ weight_i × feature_i` per entity and
//! correlated with the outcomes. Degenerate statistics yield an invalid
//! [`FitnessResult`] instead of an error.

use crate::compute::features::{self, FeatureExtractor};
use crate::compute::stats;
use crate::schema::{
    ComponentScreen, Dataset, DomainId, EffectSize, FamilyId, FitnessConfig, FitnessResult,
    InvalidReason,
};

/// Normalized features of every entity of one dataset under one family.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    domain_id: DomainId,
    family: FamilyId,
    component_names: Vec<&'static str>,
    rows: Vec<Vec<f64>>,
    outcomes: Vec<f64>,
}

impl FeatureMatrix {
    /// Extract features of every entity with the given extractor.
    pub fn build(extractor: &dyn FeatureExtractor, dataset: &Dataset) -> Self {
        let schema = extractor.schema();
        let rows = dataset
            .entities
            .iter()
            .map(|e| extractor.extract(&e.label).normalized())
            .collect();

        Self {
            domain_id: dataset.domain_id.clone(),
            family: schema.family,
            component_names: schema.component_names().collect(),
            rows,
            outcomes: dataset.outcome_values(),
        }
    }

    #[inline]
    pub fn family(&self) -> FamilyId {
        self.family
    }

    #[inline]
    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    /// Number of entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of feature components.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.component_names.len()
    }

    pub fn component_names(&self) -> &[&'static str] {
        &self.component_names
    }

    /// Weighted score of every entity.
    pub fn scores(&self, weights: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(weights).map(|(f, w)| f * w).sum())
            .collect()
    }

    /// Values of one component across entities.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[index]).collect()
    }

    pub fn outcomes(&self) -> &[f64] {
        &self.outcomes
    }
}

/// Scores candidate weight vectors against a dataset.
#[derive(Debug, Clone, Default)]
pub struct FitnessEvaluator {
    config: FitnessConfig,
}

impl FitnessEvaluator {
    /// Create a new fitness evaluator.
    pub fn new(config: FitnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitnessConfig {
        &self.config
    }

    /// Evaluate weights for a built-in family directly against a dataset.
    pub fn evaluate(&self, weights: &[f64], family: FamilyId, dataset: &Dataset) -> FitnessResult {
        let extractor = BuiltinExtractor(family);
        let matrix = FeatureMatrix::build(&extractor, dataset);
        self.evaluate_matrix(weights, &matrix)
    }

    /// Evaluate weights against pre-extracted features.
    pub fn evaluate_matrix(&self, weights: &[f64], matrix: &FeatureMatrix) -> FitnessResult {
        let n = matrix.len();
        let invalid =
            |reason| FitnessResult::invalid(reason, n, matrix.domain_id.clone(), matrix.family);

        if weights.len() != matrix.dimensions() {
            return invalid(InvalidReason::WeightMismatch);
        }
        if n < self.config.min_samples {
            return invalid(InvalidReason::TooFewSamples);
        }
        if stats::variance(&matrix.outcomes) <= 0.0 {
            return invalid(InvalidReason::ZeroOutcomeVariance);
        }

        let scores = matrix.scores(weights);
        match stats::pearson(&scores, &matrix.outcomes) {
            Some(r) => FitnessResult {
                correlation: r,
                p_value: stats::correlation_p_value(r, n),
                effect_size: EffectSize::from_correlation(r),
                n,
                domain_id: matrix.domain_id.clone(),
                family_id: matrix.family,
                invalid: None,
            },
            None => invalid(InvalidReason::ZeroScoreVariance),
        }
    }

    /// Correlate each component on its own (weight 1, all others 0).
    pub fn screen_components(&self, matrix: &FeatureMatrix) -> Vec<ComponentScreen> {
        let dims = matrix.dimensions();
        (0..dims)
            .map(|i| {
                let mut weights = vec![0.0; dims];
                weights[i] = 1.0;
                let result = self.evaluate_matrix(&weights, matrix);
                ComponentScreen {
                    component: matrix.component_names[i].to_string(),
                    correlation: result.correlation,
                    p_value: result.p_value,
                    valid: result.is_valid(),
                }
            })
            .collect()
    }
}

/// Adapter exposing a built-in family through the extractor trait.
#[derive(Debug, Clone, Copy)]
struct BuiltinExtractor(FamilyId);

impl FeatureExtractor for BuiltinExtractor {
    fn schema(&self) -> crate::schema::FeatureSchema {
        features::schema_of(self.0)
    }

    fn extract_raw(&self, label: &str) -> Vec<f64> {
        features::extract(label, self.0).values().to_vec()
    }
}
