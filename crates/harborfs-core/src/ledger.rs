//! Content whose upload failed after the handle holding it was released.
//!
//! When write-back fails on release there is no handle left to retry from.
//! The bytes are parked here under their path until an upload succeeds, so the
//! divergence stays visible (and retryable) for exactly that path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::path::VirtualPath;

/// One parked body.
#[derive(Debug, Clone)]
pub struct Divergence {
    pub body: Bytes,
    pub since: SystemTime,
    pub reason: String,
    generation: u64,
}

impl Divergence {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Parked bodies keyed by path.
#[derive(Debug, Default)]
pub struct DivergenceLedger {
    parked: DashMap<VirtualPath, Divergence>,
    next_generation: AtomicU64,
}

impl DivergenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `body` for `path`, replacing anything parked before.
    pub fn park(&self, path: &VirtualPath, body: Bytes, reason: impl Into<String>) {
        let reason = reason.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        warn!(path = %path, size = body.len(), reason = %reason, "Parked divergent content");
        self.parked.insert(
            path.clone(),
            Divergence {
                body,
                since: SystemTime::now(),
                reason,
                generation,
            },
        );
    }

    pub fn get(&self, path: &VirtualPath) -> Option<Divergence> {
        self.parked.get(path).map(|d| d.clone())
    }

    /// Parked body for `path`.
    pub fn content(&self, path: &VirtualPath) -> Option<Bytes> {
        self.parked.get(path).map(|d| d.body.clone())
    }

    pub fn size(&self, path: &VirtualPath) -> Option<u64> {
        self.parked.get(path).map(|d| d.body.len() as u64)
    }

    /// Drops the entry for `path` after newer content reached the store.
    pub fn resolve(&self, path: &VirtualPath) {
        if self.parked.remove(path).is_some() {
            info!(path = %path, "Divergence resolved");
        }
    }

    /// Drops the entry only if it is still the one that was uploaded.
    pub fn resolve_generation(&self, path: &VirtualPath, generation: u64) -> bool {
        let removed = self
            .parked
            .remove_if(path, |_, d| d.generation == generation)
            .is_some();
        if removed {
            info!(path = %path, "Divergence resolved by retry");
        }
        removed
    }

    /// Drops entries at or below `path` (unlink, rmdir).
    pub fn forget_within(&self, path: &VirtualPath) {
        self.parked.retain(|parked, _| !parked.is_within(path));
    }

    /// Moves entries at or below `from` under `to`.
    pub fn rename(&self, from: &VirtualPath, to: &VirtualPath) {
        let moved: Vec<VirtualPath> = self
            .parked
            .iter()
            .filter(|e| e.key().is_within(from))
            .map(|e| e.key().clone())
            .collect();
        for old in moved {
            if let (Some(new), Some((_, entry))) = (old.rebase(from, to), self.parked.remove(&old))
            {
                self.parked.insert(new, entry);
            }
        }
    }

    /// Paths with parked content, sorted.
    pub fn paths(&self) -> Vec<VirtualPath> {
        let mut paths: Vec<VirtualPath> = self.parked.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
