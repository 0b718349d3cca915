//! Per-path locks for namespace operations.
//!
//! Operations that create, remove or move a name take a write lock on every
//! path they touch. Operations that hand out a handle (`open`, `create`)
//! first read-lock every ancestor of their path, so no handle can appear
//! under a directory while that directory is being renamed or removed.
//!
//! # Lock order
//!
//! 1. Path locks, always in ascending path order: [`PathLocks::write_ordered`]
//!    sorts, and [`PathLocks::read_within`] walks from the root down (a
//!    path sorts after all of its ancestors)
//! 2. Handle content locks (see [`crate::descriptor::DescriptorTable::quiesce`])
//!
//! Handle operations (read, write, flush) never take path locks.
//!
//! Entries live only while some guard holds them: the last guard to drop
//! removes its path from the map.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::path::VirtualPath;

/// Held lock on one path; unregisters the path when it is the last holder.
#[must_use]
#[derive(Debug)]
pub struct PathGuard<'a, G> {
    locks: &'a PathLocks,
    path: VirtualPath,
    guard: Option<G>,
}

pub type PathReadGuard<'a> = PathGuard<'a, OwnedRwLockReadGuard<()>>;
pub type PathWriteGuard<'a> = PathGuard<'a, OwnedRwLockWriteGuard<()>>;

impl<G> PathGuard<'_, G> {
    pub fn path(&self) -> &VirtualPath {
        &self.path
    }
}

impl<G> Drop for PathGuard<'_, G> {
    fn drop(&mut self) {
        // The owned guard holds a reference to the lock; release it first
        drop(self.guard.take());
        self.locks.unregister(&self.path);
    }
}

/// Lazily created reader-writer locks keyed by path.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<VirtualPath, Arc<RwLock<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &VirtualPath) -> Arc<RwLock<()>> {
        self.locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Removes `path` if the map holds the only reference.
    ///
    /// Runs under the shard lock, so no `lock_for` can clone the entry
    /// between the count check and the removal.
    fn unregister(&self, path: &VirtualPath) {
        self.locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub async fn read(&self, path: &VirtualPath) -> PathReadGuard<'_> {
        let guard = self.lock_for(path).read_owned().await;
        PathGuard {
            locks: self,
            path: path.clone(),
            guard: Some(guard),
        }
    }

    pub async fn write(&self, path: &VirtualPath) -> PathWriteGuard<'_> {
        let guard = self.lock_for(path).write_owned().await;
        PathGuard {
            locks: self,
            path: path.clone(),
            guard: Some(guard),
        }
    }

    /// Read-locks every ancestor of `path`, root first.
    ///
    /// `path` itself is not locked; the caller takes the mode it needs.
    pub async fn read_within(&self, path: &VirtualPath) -> Vec<PathReadGuard<'_>> {
        let mut ancestors = Vec::new();
        let mut current = path.parent();
        while let Some(dir) = current {
            current = dir.parent();
            ancestors.push(dir);
        }

        let mut guards = Vec::with_capacity(ancestors.len());
        for dir in ancestors.iter().rev() {
            guards.push(self.read(dir).await);
        }
        guards
    }

    /// Write-locks several paths in sorted order, skipping duplicates.
    pub async fn write_ordered(&self, paths: &[&VirtualPath]) -> Vec<PathWriteGuard<'_>> {
        let mut sorted: Vec<VirtualPath> = paths.iter().map(|&p| p.clone()).collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for path in &sorted {
            guards.push(self.write(path).await);
        }
        guards
    }

    /// Number of paths with a live lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn path(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_readers_share() {
        let locks = PathLocks::new();
        let _a = locks.read(&path("/f")).await;
        let b = timeout(Duration::from_millis(100), locks.read(&path("/f"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_writer_excludes_reader() {
        let locks = PathLocks::new();
        let guard = locks.write(&path("/f")).await;
        let blocked = timeout(Duration::from_millis(50), locks.read(&path("/f"))).await;
        assert!(blocked.is_err());
        drop(guard);
        let unblocked = timeout(Duration::from_millis(100), locks.read(&path("/f"))).await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn test_write_ordered_dedups() {
        let locks = PathLocks::new();
        let a = path("/a");
        let guards = locks.write_ordered(&[&a, &path("/b"), &a]).await;
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].path(), &a);
    }

    #[tokio::test]
    async fn test_opposite_order_does_not_deadlock() {
        let locks = Arc::new(PathLocks::new());
        let mut tasks = Vec::new();
        for flip in [false, true] {
            let locks = Arc::clone(&locks);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let (x, y) = (path("/x"), path("/y"));
                    let order = if flip { [&y, &x] } else { [&x, &y] };
                    let _guards = locks.write_ordered(&order).await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        let all = timeout(Duration::from_secs(5), async {
            for task in tasks {
                task.await.unwrap();
            }
        })
        .await;
        assert!(all.is_ok());
    }

    #[tokio::test]
    async fn test_entries_go_away_with_last_guard() {
        let locks = PathLocks::new();
        for i in 0..1000 {
            let p = path(&format!("/file-{i}"));
            drop(locks.write(&p).await);
            drop(locks.read(&p).await);
        }
        assert!(locks.is_empty());

        let first = locks.read(&path("/shared")).await;
        let second = locks.read(&path("/shared")).await;
        let _other = locks.write(&path("/other")).await;
        assert_eq!(locks.len(), 2);
        drop(first);
        assert_eq!(locks.len(), 2);
        drop(second);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_read_within_locks_ancestors_root_first() {
        let locks = PathLocks::new();
        let guards = locks.read_within(&path("/a/b/c")).await;
        let held: Vec<&str> = guards.iter().map(|g| g.path().as_str()).collect();
        assert_eq!(held, vec!["/", "/a", "/a/b"]);
        assert!(locks.read_within(&VirtualPath::root()).await.is_empty());
    }

    #[tokio::test]
    async fn test_directory_writer_blocks_descendants() {
        let locks = PathLocks::new();
        let dir = locks.write(&path("/d")).await;
        let blocked = timeout(Duration::from_millis(50), locks.read_within(&path("/d/x/y"))).await;
        assert!(blocked.is_err());
        let sibling = timeout(Duration::from_millis(100), locks.read_within(&path("/e/x"))).await;
        assert!(sibling.is_ok());
        drop(dir);
        let unblocked =
            timeout(Duration::from_millis(100), locks.read_within(&path("/d/x/y"))).await;
        assert!(unblocked.is_ok());
    }
}
