//! Per-resource mutual exclusion for mutating operations.
//!
//! Every create, refresh and delete holds a lease on the container name and
//! the volume path it mutates. Leases are in-process only.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// A leased resource. Containers order before volumes, so any two callers
/// take overlapping keys in the same order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LeaseKey {
    Container(String),
    Volume(PathBuf),
}

impl LeaseKey {
    pub fn container(name: impl Into<String>) -> Self {
        Self::Container(name.into())
    }

    pub fn volume(path: &Path) -> Self {
        Self::Volume(crate::paths::normalize(path))
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(name) => write!(f, "container:{}", name),
            Self::Volume(path) => write!(f, "volume:{}", path.display()),
        }
    }
}

/// Held leases; released on drop.
#[derive(Debug)]
pub struct Lease {
    keys: Vec<LeaseKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl Lease {
    #[must_use]
    pub fn keys(&self) -> &[LeaseKey] {
        &self.keys
    }
}

/// Table of per-key locks.
#[derive(Debug, Default)]
pub struct LeaseTable {
    locks: Mutex<HashMap<LeaseKey, Arc<AsyncMutex<()>>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &LeaseKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Entries nobody holds or waits on can go.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Acquire every key, waiting as needed. Keys are sorted and deduplicated
    /// first.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = LeaseKey>) -> Lease {
        let mut keys: Vec<LeaseKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            debug!(lease = %key, "Acquiring lease");
            guards.push(self.lock_for(key).lock_owned().await);
        }
        Lease { keys, _guards: guards }
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
