//! Derived report types: cross-formula comparison, mined invariants and
//! encoding properties.

use serde::{Deserialize, Serialize};

use super::{DomainId, FamilyId};

/// Score of one family within one domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamilyScore {
    pub family_id: FamilyId,
    pub best_fitness: f64,
    pub p_value: f64,
}

/// Families of one domain ranked by best fitness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainRanking {
    pub domain_id: DomainId,
    /// Highest fitness first; ties go to the lower family index.
    pub ranking: Vec<FamilyScore>,
}

impl DomainRanking {
    pub fn winner(&self) -> Option<FamilyId> {
        self.ranking.first().map(|s| s.family_id)
    }
}

/// Mean fitness of one family with every domain weighted equally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamilyAggregate {
    pub family_id: FamilyId,
    pub mean_fitness: f64,
    pub domains: usize,
    /// Domains in which the family reached the strong-fitness threshold.
    pub strong_domains: usize,
}

/// A feature component significant on its own in a majority of domains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniversalProperty {
    pub family_id: FamilyId,
    pub component: String,
    pub significant_domains: usize,
    pub total_domains: usize,
    pub mean_correlation: f64,
}

/// Cross-formula comparison derived from sealed runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ComparisonReport {
    pub rankings: Vec<DomainRanking>,
    pub aggregates: Vec<FamilyAggregate>,
    pub best_family: Option<FamilyId>,
    /// Families strong in a majority of domains.
    pub universal_families: Vec<FamilyId>,
    pub universal_properties: Vec<UniversalProperty>,
    /// Runs left out because their statistics were invalid.
    pub excluded_runs: usize,
}

/// A recurring numeric relationship among converged weights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invariant {
    pub family_id: FamilyId,
    pub description: String,
    /// Reference constant the relation matches.
    pub numeric_value: f64,
    /// Fraction of qualifying runs exhibiting the relation.
    pub occurrence_rate: f64,
    pub supporting_runs: usize,
}

/// A relation that met the support rate on too few runs to be reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsufficientEvidence {
    pub family_id: FamilyId,
    pub description: String,
    pub numeric_value: f64,
    pub occurrence_rate: f64,
    pub qualifying_runs: usize,
    pub required_runs: usize,
}

/// Outcome of one invariant mining pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MiningReport {
    pub invariants: Vec<Invariant>,
    pub insufficient_evidence: Vec<InsufficientEvidence>,
    /// Runs inspected in total.
    pub total_runs: usize,
    /// Converged, valid runs the rates are computed over.
    pub qualifying_runs: usize,
}

/// Coarse strength verdict of an encoding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStrength {
    Weak,
    Moderate,
    Strong,
}

/// Hash-like properties of one family's label encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingReport {
    pub family_id: FamilyId,
    pub sample_size: usize,
    /// Fraction of labels whose vector is uniquely nearest to itself.
    pub reconstruction_accuracy: f64,
    /// Fraction of distinct labels colliding with another label.
    pub collision_rate: f64,
    /// Mean fraction of components flipped by a one-character change.
    pub avalanche_ratio: f64,
    /// Principal axes needed to reach the variance-explained target.
    pub effective_dimensionality: usize,
    /// Variance explained by the retained axes.
    pub variance_explained: f64,
    /// Order-of-magnitude estimate of distinct reachable vectors.
    pub key_space_log10: f64,
    pub strength: EncodingStrength,
}
