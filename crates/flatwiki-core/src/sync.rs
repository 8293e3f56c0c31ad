//! Mutual-exclusion primitives for the pipelines.
//!
//! [`LockMap`] serializes read-modify-write cycles against a named resource
//! (a metadata file path); [`SingleFlight`] admits at most one long-running
//! job process-wide, rejecting rather than queueing a second caller. Both
//! are owned state injected at construction, never module-level globals.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

/// Per-resource asynchronous exclusive lock, keyed by an arbitrary string
/// (conventionally a filesystem path).
///
/// Waiters on the same key are granted the lock in arrival order (the tokio
/// mutex is FIFO-fair). A task failing under the lock releases it and
/// propagates its error without blocking the next waiter.
#[derive(Clone, Default)]
pub struct LockMap {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` while holding the exclusive lock for `key`.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = {
            let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(key.to_string()).or_default().clone()
        };
        let _guard = lock.lock().await;
        task().await
    }
}

/// Process-wide single-flight guard: at most one job at a time, second
/// caller is turned away with no queueing.
#[derive(Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

/// RAII permit for a running job; dropping it frees the slot, whether the
/// job finished, failed, or panicked.
pub struct FlightPermit {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the job slot. Returns `None` when a job is already in flight.
    pub fn try_begin(&self) -> Option<FlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
