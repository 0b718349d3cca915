//! Runs bucket operations from synchronous FUSE callbacks.
//!
//! fuser invokes callbacks on its own session threads. Each callback spawns
//! its [`harborfs_core::HarborFs`] operation on the tokio runtime and blocks
//! on the task's `JoinHandle`. The wait is bounded: a request the bucket
//! never answers is aborted and reported as EIO, like a timed-out remote
//! call, so the kernel request always completes.
//!
//! Every task runs inside a `bridge` span tagged with the operation name, so
//! remote-store logs can be traced back to the kernel request that caused
//! them. A panic inside an operation is contained to its task and surfaces
//! as EIO for that one request.
//!
//! The runtime must be multi-threaded: the calling thread only waits, so the
//! runtime's workers have to drive the task and its timers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{Instrument, debug_span, error, warn};

/// Counters for bridged operations.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub operations_started: AtomicU64,
    pub operations_completed: AtomicU64,
    pub operations_timed_out: AtomicU64,
    pub operations_panicked: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Operations started but not yet finished in any way.
    pub fn in_flight(&self) -> u64 {
        let finished = self.operations_completed.load(Ordering::Relaxed)
            + self.operations_timed_out.load(Ordering::Relaxed)
            + self.operations_panicked.load(Ordering::Relaxed);
        self.operations_started
            .load(Ordering::Relaxed)
            .saturating_sub(finished)
    }

    fn record<T>(&self, outcome: &Result<T, BridgeError>) {
        let counter = match outcome {
            Ok(_) | Err(BridgeError::Cancelled(_)) => &self.operations_completed,
            Err(BridgeError::Timeout { .. }) => &self.operations_timed_out,
            Err(BridgeError::Panicked(_)) => &self.operations_panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Failure of the bridge itself, independent of the operation's result.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{op} did not finish within {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("{0} panicked")]
    Panicked(&'static str),

    /// The runtime shut down under the task.
    #[error("{0} was cancelled")]
    Cancelled(&'static str),
}

impl BridgeError {
    /// Timeouts and panics read as I/O errors to the caller.
    pub fn to_errno(&self) -> i32 {
        match self {
            BridgeError::Timeout { .. } | BridgeError::Panicked(_) => libc::EIO,
            BridgeError::Cancelled(_) => libc::ECANCELED,
        }
    }
}

/// Runs operation `op` on `handle` and blocks until it finishes or `timeout`
/// elapses.
///
/// On timeout the task is aborted so it releases the handle and path locks
/// it holds.
pub fn execute<F, T>(
    handle: &Handle,
    op: &'static str,
    timeout: Duration,
    stats: Option<&BridgeStats>,
    future: F,
) -> Result<T, BridgeError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    if let Some(s) = stats {
        s.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    let mut task = handle.spawn(future.instrument(debug_span!("bridge", op)));
    let outcome = match handle.block_on(tokio::time::timeout(timeout, &mut task)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join)) if join.is_panic() => {
            error!(op, "Filesystem operation panicked");
            Err(BridgeError::Panicked(op))
        }
        Ok(Err(_cancelled)) => Err(BridgeError::Cancelled(op)),
        Err(_elapsed) => {
            task.abort();
            warn!(op, timeout_ms = timeout.as_millis(), "Filesystem operation timed out");
            Err(BridgeError::Timeout { op, after: timeout })
        }
    };

    if let Some(s) = stats {
        s.record(&outcome);
    }
    outcome
}
