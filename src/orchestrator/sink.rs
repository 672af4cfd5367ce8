//! Durable artifact storage with an atomically replaced "latest" pointer.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::warn;
use serde::Serialize;

use crate::schema::{AnalysisArtifact, ArtifactRef, SinkConfig};

/// Name of the pointer file in a filesystem sink.
pub const LATEST_FILE: &str = "LATEST";

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Unknown artifact '{0}'")]
    UnknownRef(ArtifactRef),
}

/// Where artifacts are written and published.
pub trait ResultSink: Send + Sync {
    /// Durably store an artifact and return its key.
    fn write_artifact(&self, artifact: &AnalysisArtifact) -> Result<ArtifactRef, SinkError>;

    /// Atomically point "latest" at a written artifact. Publishing the
    /// current latest again is a no-op.
    fn publish_latest(&self, reference: &ArtifactRef) -> Result<(), SinkError>;

    /// Current "latest" pointer.
    fn latest(&self) -> Result<Option<ArtifactRef>, SinkError>;

    fn read_artifact(&self, reference: &ArtifactRef) -> Result<AnalysisArtifact, SinkError>;
}

/// Run `op` up to `policy.max_attempts` times, sleeping with exponential
/// backoff between failures. The last error is returned on exhaustion.
pub fn with_retry<T, F>(policy: &SinkConfig, what: &str, mut op: F) -> Result<T, SinkError>
where
    F: FnMut() -> Result<T, SinkError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, attempts, e, delay
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Write JSON to a temporary sibling, then rename over the target.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), SinkError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Distinguishes scratch files of concurrent writers in one process.
static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("{}.{}.tmp", std::process::id(), n));
    fs::write(&tmp_path, bytes)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

// ============================================================================
// Filesystem sink
// ============================================================================

/// Stores `artifacts/<key>.json` under a root with a `LATEST` pointer file.
#[derive(Debug, Clone)]
pub struct FsResultSink {
    root: PathBuf,
    // Serializes key allocation and pointer updates across clones.
    writer: Arc<Mutex<()>>,
}

impl FsResultSink {
    /// Open a sink, creating its directories.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, SinkError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self {
            root,
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, reference: &ArtifactRef) -> PathBuf {
        self.root
            .join("artifacts")
            .join(format!("{}.json", reference.as_str()))
    }
}

impl ResultSink for FsResultSink {
    fn write_artifact(&self, artifact: &AnalysisArtifact) -> Result<ArtifactRef, SinkError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let key = artifact.storage_key();
        let mut reference = ArtifactRef(key.clone());
        let mut suffix = 1;
        while self.artifact_path(&reference).exists() {
            reference = ArtifactRef(format!("{key}-{suffix}"));
            suffix += 1;
        }

        write_json_atomic(&self.artifact_path(&reference), artifact)?;
        Ok(reference)
    }

    fn publish_latest(&self, reference: &ArtifactRef) -> Result<(), SinkError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.latest()?.as_ref() == Some(reference) {
            return Ok(());
        }
        if !self.artifact_path(reference).exists() {
            return Err(SinkError::UnknownRef(reference.clone()));
        }
        write_atomic(&self.root.join(LATEST_FILE), reference.as_str().as_bytes())
    }

    fn latest(&self) -> Result<Option<ArtifactRef>, SinkError> {
        match fs::read_to_string(self.root.join(LATEST_FILE)) {
            Ok(text) => {
                let text = text.trim();
                Ok((!text.is_empty()).then(|| ArtifactRef(text.to_string())))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_artifact(&self, reference: &ArtifactRef) -> Result<AnalysisArtifact, SinkError> {
        let text = fs::read_to_string(self.artifact_path(reference)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                SinkError::UnknownRef(reference.clone())
            } else {
                SinkError::Io(e)
            }
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ============================================================================
// Memory sink
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    artifacts: BTreeMap<ArtifactRef, AnalysisArtifact>,
    latest: Option<ArtifactRef>,
    publishes: usize,
}

/// In-process sink with failure injection.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
    failing_writes: AtomicU32,
    failing_publishes: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` artifact writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Number of pointer updates that actually changed "latest".
    pub fn publish_count(&self) -> usize {
        self.lock().publishes
    }

    pub fn artifact_count(&self) -> usize {
        self.lock().artifacts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(counter: &AtomicU32) -> Result<(), SinkError> {
        let remaining = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(SinkError::Io(io::Error::other("injected failure"))),
            Err(_) => Ok(()),
        }
    }
}

impl ResultSink for MemorySink {
    fn write_artifact(&self, artifact: &AnalysisArtifact) -> Result<ArtifactRef, SinkError> {
        Self::injected(&self.failing_writes)?;
        let mut state = self.lock();
        let key = artifact.storage_key();
        let mut reference = ArtifactRef(key.clone());
        let mut suffix = 1;
        while state.artifacts.contains_key(&reference) {
            reference = ArtifactRef(format!("{key}-{suffix}"));
            suffix += 1;
        }
        state.artifacts.insert(reference.clone(), artifact.clone());
        Ok(reference)
    }

    fn publish_latest(&self, reference: &ArtifactRef) -> Result<(), SinkError> {
        Self::injected(&self.failing_publishes)?;
        let mut state = self.lock();
        if state.latest.as_ref() == Some(reference) {
            return Ok(());
        }
        if !state.artifacts.contains_key(reference) {
            return Err(SinkError::UnknownRef(reference.clone()));
        }
        state.latest = Some(reference.clone());
        state.publishes += 1;
        Ok(())
    }

    fn latest(&self) -> Result<Option<ArtifactRef>, SinkError> {
        Ok(self.lock().latest.clone())
    }

    fn read_artifact(&self, reference: &ArtifactRef) -> Result<AnalysisArtifact, SinkError> {
        self.lock()
            .artifacts
            .get(reference)
            .cloned()
            .ok_or_else(|| SinkError::UnknownRef(reference.clone()))
    }
}
