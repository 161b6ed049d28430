//! Bounded-concurrency primitive with cooperative cancellation
//!
//! A fixed pool of slots backed by a fair tokio semaphore, so waiting tasks
//! acquire slots in FIFO order. Slots are released when the task's future
//! finishes, fails or unwinds; in-flight tasks are never preempted.

use crate::error::{CancellationError, ErrorCode, PipelineError};
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Predicate polled to decide whether queued work should still start
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

fn is_cancelled(check: Option<&CancelCheck>) -> bool {
    check.is_some_and(|f| f())
}

/// Decrements the active counter when a running task ends
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Limits the number of simultaneously running async tasks
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    active: AtomicUsize,
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(Self::DEFAULT_MAX_CONCURRENCY)),
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            active: AtomicUsize::new(0),
        }
    }
}

impl ConcurrencyLimiter {
    pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

    /// Create a limiter; `max_concurrency` must be at least 1
    pub fn new(max_concurrency: usize) -> Result<Self, PipelineError> {
        if max_concurrency == 0 || max_concurrency > Semaphore::MAX_PERMITS {
            return Err(PipelineError::execution_with_code(
                ErrorCode::EXEC_INVALID_CONCURRENCY,
                format!(
                    "maxConcurrency must be between 1 and {}, got {}",
                    Semaphore::MAX_PERMITS,
                    max_concurrency
                ),
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            active: AtomicUsize::new(0),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of tasks currently holding a slot
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run one task once a slot is free
    ///
    /// Cancellation is checked before waiting for a slot and again right
    /// after acquiring it; in either case the task is never started.
    pub async fn run<T, E, F, Fut>(&self, task: F, cancel: Option<&CancelCheck>) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CancellationError>,
    {
        if is_cancelled(cancel) {
            return Err(CancellationError.into());
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CancellationError)?;

        if is_cancelled(cancel) {
            trace!("Cancellation observed after acquiring slot");
            return Err(CancellationError.into());
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);
        task().await
    }

    /// Run all tasks, returning outputs in input order or the first error
    ///
    /// Every task is awaited even after a failure so that dispatched work
    /// finishes; queued tasks observe cancellation and never start.
    pub async fn all<T, E, F, Fut>(
        &self,
        tasks: Vec<F>,
        cancel: Option<&CancelCheck>,
    ) -> Result<Vec<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CancellationError>,
    {
        self.all_settled(tasks, cancel).await.into_iter().collect()
    }

    /// Run all tasks and report each outcome in input order
    pub async fn all_settled<T, E, F, Fut>(
        &self,
        tasks: Vec<F>,
        cancel: Option<&CancelCheck>,
    ) -> Vec<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CancellationError>,
    {
        join_all(tasks.into_iter().map(|task| self.run(task, cancel))).await
    }
}
