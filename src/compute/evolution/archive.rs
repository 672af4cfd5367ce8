//! Run archive: a cache of sealed runs plus the bounded history the
//! invariant miner reads.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::schema::{
    DomainId, EvolutionRun, FamilyId, FitnessConfig, Fingerprint, OptimizerConfig,
};

/// File name used when persisting the history.
pub const HISTORY_FILE: &str = "run_history.json";

/// Cache key of one sealed run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub domain_id: DomainId,
    pub family_id: FamilyId,
    pub dataset_fingerprint: u64,
    pub config_fingerprint: u64,
}

impl RunKey {
    pub fn new(
        domain_id: impl Into<DomainId>,
        family_id: FamilyId,
        dataset_fingerprint: u64,
        config_fingerprint: u64,
    ) -> Self {
        Self {
            domain_id: domain_id.into(),
            family_id,
            dataset_fingerprint,
            config_fingerprint,
        }
    }
}

/// Fingerprint of every setting that changes what a run produces.
pub fn config_fingerprint(optimizer: &OptimizerConfig, fitness: &FitnessConfig) -> u64 {
    // Serialized form covers floats, which do not implement Hash.
    Fingerprint::new()
        .str(&serde_json::to_string(optimizer).unwrap_or_default())
        .str(&serde_json::to_string(fitness).unwrap_or_default())
        .finish()
}

/// Sealed runs indexed by key, plus insertion-ordered history.
#[derive(Debug, Default)]
pub struct RunArchive {
    cache: HashMap<RunKey, EvolutionRun>,
    history: VecDeque<EvolutionRun>,
    max_history: usize,
    output_dir: Option<PathBuf>,
}

/// On-disk form of the history.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryExport {
    runs: Vec<EvolutionRun>,
}

impl RunArchive {
    /// Create a new archive keeping at most `max_history` runs of history.
    pub fn new(max_history: usize) -> Self {
        Self {
            cache: HashMap::new(),
            history: VecDeque::new(),
            max_history,
            output_dir: None,
        }
    }

    /// Set output directory for saving history.
    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> io::Result<Self> {
        let path = dir.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        self.output_dir = Some(path);
        Ok(self)
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Cached run for a key, if present.
    pub fn cached(&self, key: &RunKey) -> Option<&EvolutionRun> {
        self.cache.get(key)
    }

    /// Record a sealed run.
    ///
    /// Cancelled runs are neither cached nor kept in history; runs that
    /// cannot feed statistics are cached but not kept in history.
    pub fn record(&mut self, key: RunKey, run: EvolutionRun) {
        if run.cancelled() {
            return;
        }
        if run.is_countable() {
            self.history.push_back(run.clone());
            while self.history.len() > self.max_history {
                self.history.pop_front();
            }
        }
        self.cache.insert(key, run);
    }

    /// Runs in history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &EvolutionRun> {
        self.history.iter()
    }

    /// Runs in history for one family.
    pub fn by_family(&self, family: FamilyId) -> impl Iterator<Item = &EvolutionRun> {
        self.history.iter().filter(move |r| r.family_id == family)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Number of cached runs.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop the cache, keeping history.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Save the history to the output directory, replacing it atomically.
    pub fn save(&self) -> io::Result<PathBuf> {
        let output_dir = self
            .output_dir
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "No output directory set"))?;

        let path = output_dir.join(HISTORY_FILE);
        let export = HistoryExport {
            runs: self.history.iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&export)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Load history from a directory; a missing file yields an empty archive.
    pub fn load_from_dir<P: AsRef<Path>>(dir: P, max_history: usize) -> io::Result<Self> {
        let mut archive = Self::new(max_history).with_output_dir(&dir)?;
        let path = dir.as_ref().join(HISTORY_FILE);
        if !path.exists() {
            return Ok(archive);
        }

        let json = fs::read_to_string(&path)?;
        let export: HistoryExport = serde_json::from_str(&json)?;
        for run in export.runs {
            archive.history.push_back(run);
        }
        while archive.history.len() > max_history {
            archive.history.pop_front();
        }
        Ok(archive)
    }
}
