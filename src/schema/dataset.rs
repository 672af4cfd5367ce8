//! Dataset types consumed by the engine.
//!
//! A [`Dataset`] is an immutable snapshot of one domain: a list of labelled
//! entities and the outcome each one achieved. Collectors outside this crate
//! produce them; the engine only reads them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Fingerprint;

/// Identifier of a domain (an independent dataset).
pub type DomainId = String;

/// Kind of outcome metric a domain measures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Real-valued outcome (market value, severity score, ...).
    Continuous,
    /// Win/loss style flag.
    Binary,
}

/// Outcome of a single entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Outcome {
    Binary(bool),
    Numeric(f64),
}

impl Outcome {
    /// Numeric view of the outcome; binary outcomes map to 0/1.
    #[inline]
    pub fn value(self) -> f64 {
        match self {
            Outcome::Numeric(v) => v,
            Outcome::Binary(true) => 1.0,
            Outcome::Binary(false) => 0.0,
        }
    }

    fn kind(self) -> OutcomeKind {
        match self {
            Outcome::Numeric(_) => OutcomeKind::Continuous,
            Outcome::Binary(_) => OutcomeKind::Binary,
        }
    }
}

/// A labelled entity with its observed outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// The name being scored.
    pub label: String,
    /// Observed outcome.
    pub outcome: Outcome,
    /// Collector-specific extras; never interpreted by the engine.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    pub fn new(label: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            label: label.into(),
            outcome,
            metadata: BTreeMap::new(),
        }
    }
}

/// Immutable snapshot of one domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub domain_id: DomainId,
    pub outcome_kind: OutcomeKind,
    pub entities: Vec<Entity>,
}

impl Dataset {
    pub fn new(
        domain_id: impl Into<DomainId>,
        outcome_kind: OutcomeKind,
        entities: Vec<Entity>,
    ) -> Self {
        Self {
            domain_id: domain_id.into(),
            outcome_kind,
            entities,
        }
    }

    /// Number of entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Outcomes as numbers, in entity order.
    pub fn outcome_values(&self) -> Vec<f64> {
        self.entities.iter().map(|e| e.outcome.value()).collect()
    }

    /// Labels in entity order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.label.as_str())
    }

    /// Check the snapshot invariants: at least `min_entities` entities, every
    /// outcome finite and of the declared kind.
    pub fn validate(&self, min_entities: usize) -> Result<(), DataError> {
        if self.entities.is_empty() {
            return Err(DataError::Empty {
                domain: self.domain_id.clone(),
            });
        }
        if self.entities.len() < min_entities {
            return Err(DataError::TooSmall {
                domain: self.domain_id.clone(),
                found: self.entities.len(),
                required: min_entities,
            });
        }
        for (index, entity) in self.entities.iter().enumerate() {
            if entity.outcome.kind() != self.outcome_kind {
                return Err(DataError::OutcomeMismatch {
                    domain: self.domain_id.clone(),
                    index,
                });
            }
            if !entity.outcome.value().is_finite() {
                return Err(DataError::NonFiniteOutcome {
                    domain: self.domain_id.clone(),
                    index,
                });
            }
        }
        Ok(())
    }

    /// Content hash used to decide whether cached runs are still current.
    pub fn fingerprint(&self) -> u64 {
        let mut fingerprint = Fingerprint::new()
            .str(&self.domain_id)
            .u64(self.outcome_kind as u64);
        for entity in &self.entities {
            fingerprint = fingerprint
                .str(&entity.label)
                .u64(entity.outcome.value().to_bits());
        }
        fingerprint.finish()
    }
}

/// Typed "no data" conditions. The orchestrator treats each as a per-domain
/// `DataUnavailable` error.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("No dataset registered for domain '{domain}'")]
    UnknownDomain { domain: DomainId },
    #[error("Dataset for domain '{domain}' is empty")]
    Empty { domain: DomainId },
    #[error("Dataset for domain '{domain}' has {found} entities, at least {required} required")]
    TooSmall {
        domain: DomainId,
        found: usize,
        required: usize,
    },
    #[error("Entity {index} in domain '{domain}' does not match the declared outcome kind")]
    OutcomeMismatch { domain: DomainId, index: usize },
    #[error("Entity {index} in domain '{domain}' has a non-finite outcome")]
    NonFiniteOutcome { domain: DomainId, index: usize },
    #[error("Failed to read dataset for domain '{domain}': {source}")]
    Io {
        domain: DomainId,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed dataset for domain '{domain}': {source}")]
    Malformed {
        domain: DomainId,
        #[source]
        source: serde_json::Error,
    },
}
