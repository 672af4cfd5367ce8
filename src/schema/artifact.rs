//! Persisted analysis artifact format.
//!
//! Artifacts are append-only JSON records. The orchestrator writes one per
//! scheduled run and only then moves the "latest" pointer to it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ComparisonReport, DomainId, EncodingReport, EvolutionRun, FamilyId, FitnessResult,
    MiningReport, OutcomeKind, Termination,
};

/// Current artifact format version.
pub const ARTIFACT_VERSION: u32 = 1;

/// Which job produced an artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactMode {
    Daily,
    Weekly,
    OnDemand,
}

impl ArtifactMode {
    pub fn name(self) -> &'static str {
        match self {
            ArtifactMode::Daily => "daily",
            ArtifactMode::Weekly => "weekly",
            ArtifactMode::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for ArtifactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque key of a written artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error taxonomy recorded in artifacts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Dataset missing or too small.
    DataUnavailable,
    /// Degenerate statistics.
    InvalidFitness,
    /// Optimizer aborted for lack of valid data.
    RunAborted,
    /// Domain exceeded its time budget.
    Timeout,
    /// Storage error.
    SinkWriteFailure,
    /// Domain already running.
    LockContention,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::InvalidFitness => "invalid_fitness",
            ErrorKind::RunAborted => "run_aborted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::SinkWriteFailure => "sink_write_failure",
            ErrorKind::LockContention => "lock_contention",
        };
        f.write_str(name)
    }
}

/// A per-domain failure recorded in the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEntry {
    pub domain_id: DomainId,
    pub error_kind: ErrorKind,
    pub message: String,
}

/// A domain skipped because another run held its lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedDomain {
    pub domain_id: DomainId,
    pub reason: ErrorKind,
}

/// Validation results of one domain: the best candidate of each family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainValidation {
    pub domain_id: DomainId,
    pub outcome_kind: OutcomeKind,
    pub entity_count: usize,
    pub best_family: Option<FamilyId>,
    pub results: Vec<FitnessResult>,
}

/// Compact record of one sealed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvolutionSummary {
    pub domain_id: DomainId,
    pub family_id: FamilyId,
    pub generations_run: usize,
    pub best_fitness_trace: Vec<f64>,
    pub converged: bool,
    pub convergence_generation: Option<usize>,
    pub termination: Termination,
    pub best_weights: Vec<f64>,
    pub best_fitness: f64,
}

impl From<&EvolutionRun> for EvolutionSummary {
    fn from(run: &EvolutionRun) -> Self {
        Self {
            domain_id: run.domain_id.clone(),
            family_id: run.family_id,
            generations_run: run.generations_run,
            best_fitness_trace: run.best_fitness_trace.clone(),
            converged: run.converged,
            convergence_generation: run.convergence_generation,
            termination: run.termination,
            best_weights: run.best_candidate.weights.clone(),
            best_fitness: run.best_candidate.fitness,
        }
    }
}

/// Everything a job produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ArtifactPayload {
    pub validations: Vec<DomainValidation>,
    pub evolutions: Vec<EvolutionSummary>,
    pub comparisons: Option<ComparisonReport>,
    #[serde(default)]
    pub invariants: Option<MiningReport>,
    #[serde(default)]
    pub encodings: Vec<EncodingReport>,
    #[serde(default)]
    pub skipped: Vec<SkippedDomain>,
    pub errors: Vec<ErrorEntry>,
}

/// Versioned, timestamped result record of one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisArtifact {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub mode: ArtifactMode,
    pub payload: ArtifactPayload,
}

impl AnalysisArtifact {
    pub fn new(mode: ArtifactMode, timestamp: DateTime<Utc>, payload: ArtifactPayload) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            timestamp,
            mode,
            payload,
        }
    }

    /// Storage key: sortable timestamp plus mode.
    pub fn storage_key(&self) -> String {
        format!(
            "{}_{}",
            self.timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            self.mode.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_storage_key_sorts_by_time() {
        let early = AnalysisArtifact::new(
            ArtifactMode::Daily,
            Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            ArtifactPayload::default(),
        );
        let late = AnalysisArtifact::new(
            ArtifactMode::Weekly,
            Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap(),
            ArtifactPayload::default(),
        );
        assert_eq!(early.storage_key(), "20260102T030405.000Z_daily");
        assert!(early.storage_key() < late.storage_key());
    }

    #[test]
    fn test_error_kind_serialization() {
        let entry = ErrorEntry {
            domain_id: "films".into(),
            error_kind: ErrorKind::DataUnavailable,
            message: "missing".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"data_unavailable\""));
    }

    #[test]
    fn test_artifact_serialization() {
        let artifact = AnalysisArtifact::new(
            ArtifactMode::OnDemand,
            Utc::now(),
            ArtifactPayload::default(),
        );
        let json = serde_json::to_string_pretty(&artifact).unwrap();
        let parsed: AnalysisArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, artifact);
        assert_eq!(parsed.version, ARTIFACT_VERSION);
    }
}
