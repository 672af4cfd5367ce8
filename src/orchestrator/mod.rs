//! Orchestrator: runs the pipeline for every domain of a job and publishes
//! one artifact per job.
//!
//! Each domain runs on its own worker thread inside a time budget and a
//! failure boundary. Failures become error entries in the artifact; they
//! never abort the other domains. The artifact is written first and the
//! "latest" pointer moves only after the write succeeded.

mod locks;
mod provider;
mod schedule;
mod sink;

pub use locks::{DomainGuard, ModeGuard, RunLocks};
pub use provider::{DatasetProvider, DirectoryProvider, InMemoryProvider};
pub use schedule::{Scheduler, next_daily, next_trigger, next_weekly};
pub use sink::{FsResultSink, LATEST_FILE, MemorySink, ResultSink, SinkError, with_retry};

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::compute::evolution::{
    FitnessEvaluator, GeneticOptimizer, RunArchive, RunKey, config_fingerprint, derive_seed,
};
use crate::compute::features::{FamilyRegistry, FeatureExtractor};
use crate::compute::{CrossFormulaComparator, EncodingTester, InvariantMiner};
use crate::schema::{
    AnalysisArtifact, ArtifactMode, ArtifactPayload, ArtifactRef, ConfigError, Dataset,
    DomainId, DomainValidation, EncodingReport, EngineConfig, ErrorEntry, ErrorKind,
    EvolutionRun, EvolutionSummary, OptimizerConfig, SkippedDomain,
};

use locks::lock;

/// Every domain succeeded and the artifact was published.
pub const EXIT_SUCCESS: i32 = 0;
/// Bad invocation or configuration.
pub const EXIT_USAGE: i32 = 1;
/// Published, but one or more domains failed.
pub const EXIT_PARTIAL: i32 = 2;
/// No artifact was published.
pub const EXIT_NOT_PUBLISHED: i32 = 3;

/// Errors building or maintaining an orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Result sink unavailable: {0}")]
    Sink(#[from] SinkError),
    #[error("Failed to persist run history: {0}")]
    History(#[from] std::io::Error),
}

/// Final state of one domain within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainStatus {
    Succeeded,
    Failed(ErrorKind),
    /// Another run held the domain lock.
    Skipped,
}

/// One row of the per-domain status table.
#[derive(Debug, Clone)]
pub struct DomainReport {
    pub domain_id: DomainId,
    pub status: DomainStatus,
    pub detail: String,
}

/// What happened to a job's artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Published {
        reference: ArtifactRef,
        /// At least one domain failed.
        partial: bool,
    },
    /// Storage failed; "latest" is unchanged.
    NotPublished { reason: String },
    /// A run of the same mode was already in progress.
    Rejected,
}

/// Summary of one job.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: ArtifactMode,
    pub outcome: RunOutcome,
    pub domains: Vec<DomainReport>,
    pub artifact: Option<AnalysisArtifact>,
}

impl RunReport {
    fn rejected(mode: ArtifactMode) -> Self {
        Self {
            mode,
            outcome: RunOutcome::Rejected,
            domains: Vec::new(),
            artifact: None,
        }
    }

    /// Process exit code for this job.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Published { partial: false, .. } => EXIT_SUCCESS,
            RunOutcome::Published { partial: true, .. } => EXIT_PARTIAL,
            RunOutcome::NotPublished { .. } | RunOutcome::Rejected => EXIT_NOT_PUBLISHED,
        }
    }

    /// Human-readable per-domain status table.
    pub fn status_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<24} {:<10} DETAIL", "DOMAIN", "STATUS");
        for row in &self.domains {
            let status = match row.status {
                DomainStatus::Succeeded => "ok",
                DomainStatus::Failed(_) => "failed",
                DomainStatus::Skipped => "skipped",
            };
            let _ = writeln!(out, "{:<24} {:<10} {}", row.domain_id, status, row.detail);
        }
        let summary = match &self.outcome {
            RunOutcome::Published { reference, partial } => {
                let kind = if *partial { "partial" } else { "complete" };
                format!("{} run published {} artifact {}", self.mode, kind, reference)
            }
            RunOutcome::NotPublished { reason } => {
                format!("{} run not published: {}", self.mode, reason)
            }
            RunOutcome::Rejected => {
                format!("{} run rejected: another {} run is in progress", self.mode, self.mode)
            }
        };
        let _ = writeln!(out, "{summary}");
        out
    }
}

/// Mutable state shared by every job of one orchestrator.
#[derive(Debug)]
pub struct OrchestratorState {
    locks: RunLocks,
    last_published: Mutex<Option<ArtifactRef>>,
    archive: Arc<Mutex<RunArchive>>,
}

impl OrchestratorState {
    pub fn new(archive: RunArchive, last_published: Option<ArtifactRef>) -> Self {
        Self {
            locks: RunLocks::new(),
            last_published: Mutex::new(last_published),
            archive: Arc::new(Mutex::new(archive)),
        }
    }

    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Reference of the last artifact this orchestrator published.
    pub fn last_published(&self) -> Option<ArtifactRef> {
        lock(&self.last_published).clone()
    }

    /// Read access to the run archive.
    pub fn with_archive<R>(&self, f: impl FnOnce(&RunArchive) -> R) -> R {
        f(&lock(&self.archive))
    }
}

/// Runs scheduled and on-demand jobs.
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    registry: FamilyRegistry,
    provider: Arc<dyn DatasetProvider>,
    sink: Arc<dyn ResultSink>,
    state: OrchestratorState,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in families and an empty archive.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn DatasetProvider>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let archive = RunArchive::new(config.invariants.max_history_runs);
        let latest = sink.latest()?;
        Ok(Self {
            config: Arc::new(config),
            registry: FamilyRegistry::builtin(),
            provider,
            sink,
            state: OrchestratorState::new(archive, latest),
        })
    }

    pub fn with_registry(mut self, registry: FamilyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the run archive, e.g. with one loaded from disk.
    pub fn with_archive(mut self, archive: RunArchive) -> Self {
        self.state.archive = Arc::new(Mutex::new(archive));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    /// Run a scheduled job over the configured (or all provided) domains.
    pub fn run(&self, mode: ArtifactMode) -> RunReport {
        let domains = if self.config.domains.is_empty() {
            self.provider.domains()
        } else {
            self.config.domains.clone()
        };
        self.run_domains(mode, &domains)
    }

    /// Run a single domain on request.
    pub fn run_on_demand(&self, domain_id: &str) -> RunReport {
        self.run_domains(ArtifactMode::OnDemand, &[domain_id.to_string()])
    }

    /// Run a job over an explicit domain list.
    pub fn run_domains(&self, mode: ArtifactMode, domains: &[DomainId]) -> RunReport {
        let Some(_mode_guard) = self.state.locks.try_mode(mode) else {
            warn!("Rejecting {} trigger: a {} run is already in progress", mode, mode);
            return RunReport::rejected(mode);
        };

        let budget = self.config.schedule.budget(mode);
        info!(
            "Starting {} run over {} domains ({} generations, {}s budget each)",
            mode,
            domains.len(),
            budget.max_generations,
            budget.timeout_secs
        );
        let optimizer = self.optimizer_config(mode);
        let extractors = self.extractors();

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        for domain_id in domains.iter().filter(|d| seen.insert(d.as_str())) {
            let Some(guard) = self.state.locks.try_domain(domain_id) else {
                debug!("Domain {} is locked by another run, skipping", domain_id);
                skipped.push(SkippedDomain {
                    domain_id: domain_id.clone(),
                    reason: ErrorKind::LockContention,
                });
                continue;
            };
            let job = DomainJob {
                domain_id: domain_id.clone(),
                mode,
                config: Arc::clone(&self.config),
                optimizer: optimizer.clone(),
                extractors: extractors.clone(),
                provider: Arc::clone(&self.provider),
                archive: Arc::clone(&self.state.archive),
                cancel: Arc::new(AtomicBool::new(false)),
            };
            pending.push((domain_id.clone(), job.spawn(guard, budget.timeout())));
        }

        let outcomes: Vec<(DomainId, DomainOutcome)> = pending
            .into_iter()
            .map(|(domain_id, handle)| {
                let outcome = match handle {
                    Ok(pending) => pending.wait(&domain_id),
                    Err(entry) => DomainOutcome::failed(entry),
                };
                (domain_id, outcome)
            })
            .collect();

        let (payload, mut reports) = self.assemble(mode, outcomes, &extractors);
        reports.extend(skipped.iter().map(|s| DomainReport {
            domain_id: s.domain_id.clone(),
            status: DomainStatus::Skipped,
            detail: s.reason.to_string(),
        }));
        let payload = ArtifactPayload { skipped, ..payload };

        // An aborted family leaves its domain validated but the run incomplete.
        // Degenerate statistics only score zero.
        let partial = payload
            .errors
            .iter()
            .any(|e| e.error_kind != ErrorKind::InvalidFitness)
            || reports
                .iter()
                .any(|r| matches!(r.status, DomainStatus::Failed(_)));
        let artifact = AnalysisArtifact::new(mode, Utc::now(), payload);
        let outcome = self.publish(&artifact, partial);
        self.persist_history();

        RunReport {
            mode,
            outcome,
            domains: reports,
            artifact: Some(artifact),
        }
    }

    /// Optimizer settings with the mode's budget applied.
    fn optimizer_config(&self, mode: ArtifactMode) -> OptimizerConfig {
        let budget = self.config.schedule.budget(mode);
        let mut optimizer = self.config.optimizer.clone();
        optimizer.population.max_generations = budget.max_generations;
        if let Some(size) = budget.population_size {
            optimizer.population.size = size;
        }
        optimizer
    }

    fn extractors(&self) -> Vec<Arc<dyn FeatureExtractor>> {
        self.config
            .families
            .iter()
            .filter_map(|&family| {
                let extractor = self.registry.get(family);
                if extractor.is_none() {
                    warn!("Family {} is not registered, skipping", family);
                }
                extractor
            })
            .collect()
    }

    /// Fold domain outcomes into the artifact payload and status rows.
    fn assemble(
        &self,
        mode: ArtifactMode,
        outcomes: Vec<(DomainId, DomainOutcome)>,
        extractors: &[Arc<dyn FeatureExtractor>],
    ) -> (ArtifactPayload, Vec<DomainReport>) {
        let mut payload = ArtifactPayload::default();
        let mut reports = Vec::new();
        let mut runs: Vec<EvolutionRun> = Vec::new();
        let mut labels: Vec<String> = Vec::new();

        for (domain_id, outcome) in outcomes {
            for entry in &outcome.errors {
                warn!("{}: {} ({})", entry.domain_id, entry.error_kind, entry.message);
            }

            let report = match &outcome.validation {
                Some(validation) => DomainReport {
                    domain_id: domain_id.clone(),
                    status: DomainStatus::Succeeded,
                    detail: describe_validation(validation),
                },
                None => {
                    let (kind, message) = outcome
                        .errors
                        .first()
                        .map(|e| (e.error_kind, e.message.clone()))
                        .unwrap_or((ErrorKind::RunAborted, "no result".to_string()));
                    DomainReport {
                        domain_id: domain_id.clone(),
                        status: DomainStatus::Failed(kind),
                        detail: format!("{kind}: {message}"),
                    }
                }
            };
            reports.push(report);

            {
                let mut archive = lock(&self.state.archive);
                for sealed in &outcome.runs {
                    if sealed.fresh {
                        archive.record(sealed.key.clone(), sealed.run.clone());
                    }
                }
            }
            payload
                .evolutions
                .extend(outcome.runs.iter().map(|s| EvolutionSummary::from(&s.run)));
            runs.extend(outcome.runs.into_iter().map(|s| s.run));
            payload.validations.extend(outcome.validation);
            payload.errors.extend(outcome.errors);
            labels.extend(outcome.labels);
        }

        if !runs.is_empty() {
            let comparator = CrossFormulaComparator::new(
                self.config.comparator.clone(),
                self.config.fitness.significance,
            );
            payload.comparisons = Some(comparator.compare(&runs));
        }

        if mode == ArtifactMode::Weekly {
            let miner = InvariantMiner::new(self.config.invariants.clone());
            payload.invariants = Some(self.state.with_archive(|archive| miner.mine(archive.history())));
            payload.encodings = self.test_encodings(extractors, &labels);
        }

        (payload, reports)
    }

    fn test_encodings(
        &self,
        extractors: &[Arc<dyn FeatureExtractor>],
        labels: &[String],
    ) -> Vec<EncodingReport> {
        if labels.is_empty() {
            return Vec::new();
        }
        let tester = EncodingTester::new(self.config.encoding.clone());
        extractors
            .iter()
            .map(|extractor| {
                let report = tester.test(extractor.as_ref(), labels);
                info!(
                    "Encoding {}: collision {:.3}, avalanche {:.3}, {:?}",
                    report.family_id, report.collision_rate, report.avalanche_ratio, report.strength
                );
                report
            })
            .collect()
    }

    /// Write the artifact, then move "latest" to it.
    fn publish(&self, artifact: &AnalysisArtifact, partial: bool) -> RunOutcome {
        let policy = &self.config.sink;

        let reference = match with_retry(policy, "Artifact write", || self.sink.write_artifact(artifact)) {
            Ok(reference) => reference,
            Err(e) => {
                error!(
                    "Artifact write failed after {} attempts, latest unchanged: {}",
                    policy.max_attempts, e
                );
                return RunOutcome::NotPublished {
                    reason: format!("{}: {}", ErrorKind::SinkWriteFailure, e),
                };
            }
        };

        if let Err(e) = with_retry(policy, "Publish latest", || self.sink.publish_latest(&reference)) {
            error!(
                "Publishing {} failed after {} attempts, latest unchanged: {}",
                reference, policy.max_attempts, e
            );
            return RunOutcome::NotPublished {
                reason: format!("{}: {}", ErrorKind::SinkWriteFailure, e),
            };
        }

        info!("Published {} as latest", reference);
        *lock(&self.state.last_published) = Some(reference.clone());
        RunOutcome::Published { reference, partial }
    }

    fn persist_history(&self) {
        let archive = lock(&self.state.archive);
        if archive.output_dir().is_none() {
            return;
        }
        if let Err(e) = archive.save() {
            warn!("Failed to persist run history: {}", e);
        }
    }
}

fn describe_validation(validation: &DomainValidation) -> String {
    let best = validation.best_family.and_then(|family| {
        validation
            .results
            .iter()
            .find(|r| r.family_id == family)
            .map(|r| format!("best {} (r={:.3}, p={:.4})", family, r.correlation, r.p_value))
    });
    match best {
        Some(best) => format!("{} entities, {}", validation.entity_count, best),
        None => format!("{} entities", validation.entity_count),
    }
}

// ============================================================================
// Per-domain work
// ============================================================================

/// A sealed run and where it came from.
struct SealedRun {
    key: RunKey,
    run: EvolutionRun,
    /// Evolved in this job rather than taken from the cache.
    fresh: bool,
}

/// Everything one domain produced.
struct DomainOutcome {
    validation: Option<DomainValidation>,
    runs: Vec<SealedRun>,
    errors: Vec<ErrorEntry>,
    labels: Vec<String>,
}

impl DomainOutcome {
    fn failed(entry: ErrorEntry) -> Self {
        Self {
            validation: None,
            runs: Vec::new(),
            errors: vec![entry],
            labels: Vec::new(),
        }
    }
}

fn error_entry(domain_id: &str, error_kind: ErrorKind, message: impl Into<String>) -> ErrorEntry {
    ErrorEntry {
        domain_id: domain_id.to_string(),
        error_kind,
        message: message.into(),
    }
}

/// A domain pipeline running on a worker thread.
struct PendingDomain {
    receiver: Receiver<DomainOutcome>,
    cancel: Arc<AtomicBool>,
    deadline: Instant,
    timeout: Duration,
}

impl PendingDomain {
    /// Wait for the worker until the deadline. On timeout the worker is
    /// cancelled and its partial results are discarded.
    fn wait(self, domain_id: &str) -> DomainOutcome {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(remaining) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.cancel.store(true, Ordering::Relaxed);
                DomainOutcome::failed(error_entry(
                    domain_id,
                    ErrorKind::Timeout,
                    format!("exceeded {}s budget", self.timeout.as_secs()),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => DomainOutcome::failed(error_entry(
                domain_id,
                ErrorKind::RunAborted,
                "worker terminated unexpectedly",
            )),
        }
    }
}

struct DomainJob {
    domain_id: DomainId,
    mode: ArtifactMode,
    config: Arc<EngineConfig>,
    optimizer: OptimizerConfig,
    extractors: Vec<Arc<dyn FeatureExtractor>>,
    provider: Arc<dyn DatasetProvider>,
    archive: Arc<Mutex<RunArchive>>,
    cancel: Arc<AtomicBool>,
}

impl DomainJob {
    /// Start the pipeline on its own thread. The domain lock is held until
    /// the worker finishes, even past a timeout.
    fn spawn(self, guard: DomainGuard, timeout: Duration) -> Result<PendingDomain, ErrorEntry> {
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::clone(&self.cancel);
        let domain_id = self.domain_id.clone();

        thread::Builder::new()
            .name(format!("domain-{domain_id}"))
            .spawn(move || {
                let _guard = guard;
                // The receiver is gone after a timeout; the result is dropped.
                let _ = sender.send(self.execute());
            })
            .map_err(|e| error_entry(&domain_id, ErrorKind::RunAborted, format!("cannot start worker: {e}")))?;

        Ok(PendingDomain {
            receiver,
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        })
    }

    fn execute(self) -> DomainOutcome {
        let min_samples = self.config.fitness.min_samples;
        let dataset = match self
            .provider
            .get_dataset(&self.domain_id)
            .and_then(|dataset| dataset.validate(min_samples).map(|()| dataset))
        {
            Ok(dataset) => dataset,
            Err(e) => {
                return DomainOutcome::failed(error_entry(
                    &self.domain_id,
                    ErrorKind::DataUnavailable,
                    e.to_string(),
                ));
            }
        };

        let evaluator = FitnessEvaluator::new(self.config.fitness.clone());
        let dataset_fingerprint = dataset.fingerprint();
        let config_fingerprint = config_fingerprint(&self.optimizer, &self.config.fitness);

        let mut runs = Vec::new();
        let mut errors = Vec::new();
        for extractor in &self.extractors {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            let family = extractor.family();
            let key = RunKey::new(
                self.domain_id.clone(),
                family,
                dataset_fingerprint,
                config_fingerprint,
            );

            let cached = lock(&self.archive).cached(&key).cloned();
            let (run, fresh) = match cached {
                Some(run) => {
                    debug!("Reusing cached run for {} / {}", self.domain_id, family);
                    (run, false)
                }
                None => (self.evolve(extractor.as_ref(), &dataset, &evaluator), true),
            };

            if run.insufficient_data() {
                errors.push(error_entry(
                    &self.domain_id,
                    ErrorKind::RunAborted,
                    format!(
                        "{family}: aborted after {} generations with mostly invalid evaluations",
                        run.generations_run
                    ),
                ));
            } else if !run.best_result.is_valid() && !run.cancelled() {
                errors.push(error_entry(
                    &self.domain_id,
                    ErrorKind::InvalidFitness,
                    format!("{family}: no candidate produced valid statistics"),
                ));
            }
            runs.push(SealedRun { key, run, fresh });
        }

        let validation = self.validation(&dataset, &runs);
        if validation.is_none() && errors.is_empty() {
            errors.push(error_entry(
                &self.domain_id,
                ErrorKind::RunAborted,
                "no formula family produced a run",
            ));
        }
        DomainOutcome {
            validation,
            runs,
            errors,
            labels: dataset.labels().map(str::to_string).collect(),
        }
    }

    fn evolve(
        &self,
        extractor: &dyn FeatureExtractor,
        dataset: &Dataset,
        evaluator: &FitnessEvaluator,
    ) -> EvolutionRun {
        let mut config = self.optimizer.clone();
        config.random_seed = config
            .random_seed
            .map(|seed| derive_seed(seed, &self.domain_id, extractor.family()));

        let mode = self.mode;
        GeneticOptimizer::for_dataset(config, evaluator.clone(), extractor, dataset)
            .with_cancel_flag(Arc::clone(&self.cancel))
            .run_with_callback(|p| {
                debug!(
                    "[{}] {} / {} generation {}/{}: best {:.4}, mean {:.4}, invalid {:.0}%",
                    mode,
                    p.domain_id,
                    p.family_id,
                    p.generation,
                    p.max_generations,
                    p.best_fitness,
                    p.mean_fitness,
                    p.invalid_fraction * 100.0
                );
            })
    }

    /// Validation entry, or `None` when no run produced usable statistics.
    fn validation(&self, dataset: &Dataset, runs: &[SealedRun]) -> Option<DomainValidation> {
        let countable: Vec<&EvolutionRun> = runs
            .iter()
            .map(|s| &s.run)
            .filter(|r| r.is_countable())
            .collect();
        if countable.is_empty() {
            return None;
        }

        let best_family = countable
            .iter()
            .max_by(|a, b| {
                a.best_fitness()
                    .total_cmp(&b.best_fitness())
                    .then(b.family_id.cmp(&a.family_id))
            })
            .map(|r| r.family_id);

        Some(DomainValidation {
            domain_id: self.domain_id.clone(),
            outcome_kind: dataset.outcome_kind,
            entity_count: dataset.len(),
            best_family,
            results: runs.iter().map(|s| s.run.best_result.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::features::StructuralExtractor;
    use crate::schema::{
        ComponentSpec, DataError, Entity, FamilyId, FeatureSchema, Outcome, OutcomeKind,
    };

    fn healthy(domain: &str) -> Dataset {
        let entities = (0..20)
            .map(|i| Entity::new(format!("{}{}", "q".repeat(i + 1), domain), Outcome::Numeric(i as f64)))
            .collect();
        Dataset::new(domain, OutcomeKind::Continuous, entities)
    }

    fn tiny(domain: &str) -> Dataset {
        let entities = (0..3)
            .map(|i| Entity::new("x".repeat(i + 1), Outcome::Numeric(i as f64)))
            .collect();
        Dataset::new(domain, OutcomeKind::Continuous, entities)
    }

    fn test_config(domains: &[&str]) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.families = vec![FamilyId::Structural];
        config.domains = domains.iter().map(|d| d.to_string()).collect();
        config.optimizer.population.size = 10;
        config.optimizer.random_seed = Some(7);
        config.schedule.daily.max_generations = 3;
        config.schedule.weekly.max_generations = 3;
        config.schedule.on_demand.max_generations = 3;
        config.sink.initial_backoff_ms = 1;
        config.sink.max_backoff_ms = 2;
        config
    }

    fn orchestrator(
        config: EngineConfig,
        provider: impl DatasetProvider + 'static,
    ) -> (Orchestrator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::new(config, Arc::new(provider), sink.clone()).unwrap();
        (orchestrator, sink)
    }

    /// Provider that stalls longer than any test budget.
    struct SlowProvider;

    impl DatasetProvider for SlowProvider {
        fn get_dataset(&self, domain_id: &str) -> Result<Dataset, DataError> {
            thread::sleep(Duration::from_millis(1500));
            Ok(healthy(domain_id))
        }

        fn domains(&self) -> Vec<DomainId> {
            vec!["slow".to_string()]
        }
    }

    #[test]
    fn test_healthy_domain_publishes() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, sink) = orchestrator(test_config(&["films"]), provider);

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        let RunOutcome::Published { reference, partial } = &report.outcome else {
            panic!("not published: {:?}", report.outcome);
        };
        assert!(!partial);
        assert_eq!(sink.latest().unwrap().as_ref(), Some(reference));
        assert_eq!(orch.state().last_published().as_ref(), Some(reference));

        let artifact = sink.read_artifact(reference).unwrap();
        assert_eq!(artifact.payload.validations.len(), 1);
        assert_eq!(artifact.payload.evolutions.len(), 1);
        assert!(artifact.payload.comparisons.is_some());
        assert!(artifact.payload.invariants.is_none());
        assert!(artifact.payload.errors.is_empty());
    }

    #[test]
    fn test_missing_domain_is_partial_success() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, _sink) = orchestrator(test_config(&["films", "missing"]), provider);

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        let payload = &report.artifact.as_ref().unwrap().payload;
        assert_eq!(payload.validations.len(), 1);
        assert_eq!(payload.validations[0].domain_id, "films");
        assert_eq!(payload.errors.len(), 1);
        assert_eq!(payload.errors[0].domain_id, "missing");
        assert_eq!(payload.errors[0].error_kind, ErrorKind::DataUnavailable);
        assert_eq!(
            report.domains[1].status,
            DomainStatus::Failed(ErrorKind::DataUnavailable)
        );
    }

    #[test]
    fn test_too_small_dataset_is_data_unavailable() {
        let provider = InMemoryProvider::new().with_dataset(tiny("tiny"));
        let (orch, _sink) = orchestrator(test_config(&["tiny"]), provider);

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        let payload = &report.artifact.unwrap().payload;
        assert!(payload.validations.is_empty());
        assert_eq!(payload.errors[0].error_kind, ErrorKind::DataUnavailable);
    }

    #[test]
    fn test_locked_domain_is_skipped() {
        let provider = InMemoryProvider::new()
            .with_dataset(healthy("busy"))
            .with_dataset(healthy("free"));
        let (orch, _sink) = orchestrator(test_config(&["busy", "free"]), provider);
        let _held = orch.state().locks().try_domain("busy").unwrap();

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        let payload = &report.artifact.as_ref().unwrap().payload;
        assert_eq!(payload.skipped.len(), 1);
        assert_eq!(payload.skipped[0].domain_id, "busy");
        assert_eq!(payload.skipped[0].reason, ErrorKind::LockContention);
        assert_eq!(payload.validations.len(), 1);
        assert_eq!(payload.validations[0].domain_id, "free");
        assert!(payload.errors.is_empty());
        assert!(report.domains.iter().any(|d| d.status == DomainStatus::Skipped));
    }

    #[test]
    fn test_overlapping_trigger_rejected() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, sink) = orchestrator(test_config(&["films"]), provider);
        let _running = orch.state().locks().try_mode(ArtifactMode::Daily).unwrap();

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.outcome, RunOutcome::Rejected);
        assert_eq!(report.exit_code(), EXIT_NOT_PUBLISHED);
        assert_eq!(sink.artifact_count(), 0);

        // Other modes are independent.
        assert_eq!(orch.run_on_demand("films").exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn test_sink_failure_keeps_previous_latest() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, sink) = orchestrator(test_config(&["films"]), provider);

        let first = orch.run(ArtifactMode::Daily);
        let RunOutcome::Published { reference: previous, .. } = first.outcome else {
            panic!("first run not published");
        };

        sink.fail_next_writes(3);
        let second = orch.run(ArtifactMode::Daily);
        assert!(matches!(second.outcome, RunOutcome::NotPublished { .. }));
        assert_eq!(second.exit_code(), EXIT_NOT_PUBLISHED);
        assert_eq!(sink.latest().unwrap(), Some(previous.clone()));
        assert!(sink.read_artifact(&previous).is_ok());
        assert_eq!(orch.state().last_published(), Some(previous.clone()));

        sink.fail_next_publishes(3);
        let third = orch.run(ArtifactMode::Daily);
        assert_eq!(third.exit_code(), EXIT_NOT_PUBLISHED);
        assert_eq!(sink.latest().unwrap(), Some(previous));
    }

    #[test]
    fn test_transient_sink_failure_is_retried() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, sink) = orchestrator(test_config(&["films"]), provider);
        sink.fail_next_writes(2);
        assert_eq!(orch.run(ArtifactMode::Daily).exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn test_timeout_discards_domain() {
        let mut config = test_config(&["slow"]);
        config.schedule.daily.timeout_secs = 1;
        let (orch, _sink) = orchestrator(config, SlowProvider);

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        let payload = &report.artifact.unwrap().payload;
        assert!(payload.validations.is_empty());
        assert!(payload.evolutions.is_empty());
        assert_eq!(payload.errors[0].error_kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_weekly_adds_invariants_and_encodings() {
        let provider = InMemoryProvider::new()
            .with_dataset(healthy("films"))
            .with_dataset(healthy("books"));
        let (orch, _sink) = orchestrator(test_config(&[]), provider);

        let report = orch.run(ArtifactMode::Weekly);
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        let payload = &report.artifact.unwrap().payload;
        assert_eq!(payload.validations.len(), 2);
        let comparisons = payload.comparisons.as_ref().unwrap();
        assert_eq!(comparisons.rankings.len(), 2);
        let mining = payload.invariants.as_ref().unwrap();
        assert!(mining.invariants.is_empty());
        assert_eq!(payload.encodings.len(), 1);
        assert_eq!(payload.encodings[0].family_id, FamilyId::Structural);
        assert_eq!(payload.encodings[0].sample_size, 40);
    }

    #[test]
    fn test_unchanged_dataset_reuses_cached_run() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, _sink) = orchestrator(test_config(&["films"]), provider);

        let first = orch.run(ArtifactMode::Daily);
        let second = orch.run(ArtifactMode::Daily);
        assert_eq!(
            first.artifact.unwrap().payload.evolutions,
            second.artifact.unwrap().payload.evolutions
        );
        let (history, cached) = orch.state().with_archive(|a| (a.len(), a.cache_len()));
        assert_eq!((history, cached), (1, 1));
    }

    #[test]
    fn test_status_table_lists_every_domain() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, _sink) = orchestrator(test_config(&["films", "missing"]), provider);
        let table = orch.run(ArtifactMode::Daily).status_table();
        assert!(table.contains("films"));
        assert!(table.contains("missing"));
        assert!(table.contains("data_unavailable"));
        assert!(table.contains("partial"));
    }

    #[test]
    fn test_unregistered_family_is_reported() {
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, _sink) = orchestrator(test_config(&["films"]), provider);
        let orch = orch.with_registry(FamilyRegistry::new());

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        let payload = &report.artifact.unwrap().payload;
        assert!(payload.validations.is_empty());
        assert_eq!(payload.errors.len(), 1);
        assert_eq!(payload.errors[0].error_kind, ErrorKind::RunAborted);
    }

    /// Same value for every label, so every candidate's correlation is undefined.
    struct ConstantExtractor;

    const CONSTANT: &[ComponentSpec] = &[ComponentSpec::new("flat", 0.0, 1.0)];

    impl FeatureExtractor for ConstantExtractor {
        fn schema(&self) -> FeatureSchema {
            FeatureSchema {
                family: FamilyId::Hybrid,
                components: CONSTANT,
            }
        }

        fn extract_raw(&self, _label: &str) -> Vec<f64> {
            vec![0.5]
        }
    }

    #[test]
    fn test_aborted_family_makes_partial_success() {
        let mut registry = FamilyRegistry::new();
        registry.register(Arc::new(StructuralExtractor));
        registry.register(Arc::new(ConstantExtractor));

        let mut config = test_config(&["films"]);
        config.families = vec![FamilyId::Structural, FamilyId::Hybrid];
        let provider = InMemoryProvider::new().with_dataset(healthy("films"));
        let (orch, sink) = orchestrator(config, provider);
        let orch = orch.with_registry(registry);

        let report = orch.run(ArtifactMode::Daily);
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        assert!(matches!(
            report.outcome,
            RunOutcome::Published { partial: true, .. }
        ));
        assert_eq!(sink.publish_count(), 1);

        let payload = &report.artifact.unwrap().payload;
        assert_eq!(payload.validations.len(), 1);
        assert_eq!(payload.errors.len(), 1);
        assert_eq!(payload.errors[0].error_kind, ErrorKind::RunAborted);
        assert!(payload.errors[0].message.starts_with("hybrid"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config(&[]);
        config.families.clear();
        let result = Orchestrator::new(
            config,
            Arc::new(InMemoryProvider::new()),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }
}
