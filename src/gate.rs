//! Concurrency admission gate
//!
//! Bounds how many executions (and so containers) are in flight. Callers
//! wait for a slot instead of being rejected. Admitted work runs on its own
//! task holding the permit, so a caller that goes away cannot release the
//! slot before its container has been cleaned up.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::ExecutionError;

/// Fixed-capacity gate in front of the executor
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Callers currently queued for a slot
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Run `job` once a slot is free and return its output
    pub async fn run<F, T>(&self, job: F) -> Result<T, ExecutionError>
    where
        F: Future<Output = Result<T, ExecutionError>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = {
            let _queued = WaitingGuard::enter(&self.waiting);
            if self.permits.available_permits() == 0 {
                debug!(
                    "All {} execution slots busy, {} request(s) waiting",
                    self.capacity,
                    self.waiting()
                );
            }
            self.permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ExecutionError::Internal("admission gate closed".into()))?
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            job.await
        });

        handle
            .await
            .map_err(|e| ExecutionError::Internal(format!("execution task failed: {}", e)))?
    }
}

/// Counts a caller as waiting until it is admitted or dropped
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
