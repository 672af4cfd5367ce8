//! Run-scoped locks: one per scheduled mode, one per domain.
//!
//! Locks are try-only. A held lock means the caller skips or rejects, it
//! never waits. Guards release on drop and may be moved across threads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::schema::{ArtifactMode, DomainId};

#[derive(Debug, Default)]
struct LockTable {
    modes: Mutex<HashSet<ArtifactMode>>,
    domains: Mutex<HashSet<DomainId>>,
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle to the lock table.
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    table: Arc<LockTable>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a mode, or `None` if a run of that mode is in progress.
    pub fn try_mode(&self, mode: ArtifactMode) -> Option<ModeGuard> {
        lock(&self.table.modes).insert(mode).then(|| ModeGuard {
            table: Arc::clone(&self.table),
            mode,
        })
    }

    /// Claim a domain, or `None` if it is locked.
    pub fn try_domain(&self, domain_id: &str) -> Option<DomainGuard> {
        lock(&self.table.domains)
            .insert(domain_id.to_string())
            .then(|| DomainGuard {
                table: Arc::clone(&self.table),
                domain_id: domain_id.to_string(),
            })
    }

    pub fn is_mode_running(&self, mode: ArtifactMode) -> bool {
        lock(&self.table.modes).contains(&mode)
    }

    pub fn is_domain_locked(&self, domain_id: &str) -> bool {
        lock(&self.table.domains).contains(domain_id)
    }
}

/// Held while a mode is running.
#[derive(Debug)]
pub struct ModeGuard {
    table: Arc<LockTable>,
    mode: ArtifactMode,
}

impl ModeGuard {
    pub fn mode(&self) -> ArtifactMode {
        self.mode
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        lock(&self.table.modes).remove(&self.mode);
    }
}

/// Held while a domain's pipeline is live.
#[derive(Debug)]
pub struct DomainGuard {
    table: Arc<LockTable>,
    domain_id: DomainId,
}

impl DomainGuard {
    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }
}

impl Drop for DomainGuard {
    fn drop(&mut self) {
        lock(&self.table.domains).remove(&self.domain_id);
    }
}
