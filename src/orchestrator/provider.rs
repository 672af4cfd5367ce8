//! Dataset providers: where domain snapshots come from.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::schema::{DataError, Dataset, DomainId};

/// Source of domain datasets, resolved once when the orchestrator is built.
pub trait DatasetProvider: Send + Sync {
    /// Snapshot of one domain, or a typed "no data" condition.
    fn get_dataset(&self, domain_id: &str) -> Result<Dataset, DataError>;

    /// Every domain this provider can serve, sorted.
    fn domains(&self) -> Vec<DomainId>;
}

/// Reads `<root>/<domain>.json` files.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, domain_id: &str) -> PathBuf {
        self.root.join(format!("{domain_id}.json"))
    }
}

impl DatasetProvider for DirectoryProvider {
    fn get_dataset(&self, domain_id: &str) -> Result<Dataset, DataError> {
        let path = self.path_of(domain_id);
        let text = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                DataError::UnknownDomain {
                    domain: domain_id.to_string(),
                }
            } else {
                DataError::Io {
                    domain: domain_id.to_string(),
                    source,
                }
            }
        })?;

        let mut dataset: Dataset =
            serde_json::from_str(&text).map_err(|source| DataError::Malformed {
                domain: domain_id.to_string(),
                source,
            })?;
        if dataset.domain_id != domain_id {
            debug!(
                "{} declares domain '{}', using '{}'",
                path.display(),
                dataset.domain_id,
                domain_id
            );
            dataset.domain_id = domain_id.to_string();
        }
        Ok(dataset)
    }

    fn domains(&self) -> Vec<DomainId> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list data directory {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut domains: Vec<DomainId> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        domains.sort();
        domains
    }
}

/// Datasets held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    datasets: BTreeMap<DomainId, Dataset>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a dataset.
    pub fn insert(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.domain_id.clone(), dataset);
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.insert(dataset);
        self
    }
}

impl DatasetProvider for InMemoryProvider {
    fn get_dataset(&self, domain_id: &str) -> Result<Dataset, DataError> {
        self.datasets
            .get(domain_id)
            .cloned()
            .ok_or_else(|| DataError::UnknownDomain {
                domain: domain_id.to_string(),
            })
    }

    fn domains(&self) -> Vec<DomainId> {
        self.datasets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Entity, Outcome, OutcomeKind};
    use tempfile::TempDir;

    fn dataset(domain: &str) -> Dataset {
        Dataset::new(
            domain,
            OutcomeKind::Continuous,
            vec![Entity::new("Alpha", Outcome::Numeric(1.0))],
        )
    }

    #[test]
    fn test_directory_provider_reads_and_lists() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("films.json"),
            serde_json::to_string(&dataset("films")).unwrap(),
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let provider = DirectoryProvider::new(dir.path());
        assert_eq!(provider.domains(), vec!["films".to_string()]);
        let loaded = provider.get_dataset("films").unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_directory_provider_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let provider = DirectoryProvider::new(dir.path());

        assert!(matches!(
            provider.get_dataset("absent"),
            Err(DataError::UnknownDomain { .. })
        ));
        assert!(matches!(
            provider.get_dataset("broken"),
            Err(DataError::Malformed { .. })
        ));
    }

    #[test]
    fn test_file_name_wins_over_declared_domain() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("books.json"),
            serde_json::to_string(&dataset("other")).unwrap(),
        )
        .unwrap();
        let provider = DirectoryProvider::new(dir.path());
        assert_eq!(provider.get_dataset("books").unwrap().domain_id, "books");
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let provider = DirectoryProvider::new("/nonexistent/formula-forge-data");
        assert!(provider.domains().is_empty());
    }

    #[test]
    fn test_in_memory_provider() {
        let provider = InMemoryProvider::new()
            .with_dataset(dataset("b"))
            .with_dataset(dataset("a"));
        assert_eq!(provider.domains(), vec!["a".to_string(), "b".to_string()]);
        assert!(provider.get_dataset("c").is_err());
    }
}
