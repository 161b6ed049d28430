//! Map-reduce orchestration
//!
//! Drives a job through `splitting -> mapping -> reducing -> complete | failed`.
//! Work items are mapped through a [`ConcurrencyLimiter`]; each map call
//! runs on its own tokio task so a per-item timeout can abandon it without
//! blocking the slot. A timed-out call is retried exactly once with double
//! the timeout. Other failures follow the generic retry policy.

use crate::abstractions::{AiInvoker, GroupStats, ProcessStatus, ProcessTracker};
use crate::error::helpers::timed_out;
use crate::error::{CancellationError, PipelineError, CANCELLATION_MESSAGE};
use crate::mapreduce::limiter::{CancelCheck, ConcurrencyLimiter};
use crate::mapreduce::progress::{ProgressCallback, ProgressReporter};
use crate::mapreduce::reducers::Reducer;
use crate::mapreduce::splitters::Splitter;
use crate::mapreduce::temp_files::TempFileStore;
use crate::mapreduce::types::{ExecutionStats, JobResult, MapResult, ReduceContext, WorkItem};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-item transformation, in practice one AI call
#[async_trait]
pub trait Mapper<D, O>: Send + Sync {
    async fn map(&self, item: &WorkItem<D>) -> anyhow::Result<O>;
}

/// Mapper backed by an async closure taking the work item by value
pub struct FnMapper<F>(pub F);

#[async_trait]
impl<D, O, F, Fut> Mapper<D, O> for FnMapper<F>
where
    D: Clone + Send + Sync + 'static,
    F: Fn(WorkItem<D>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<O>> + Send,
{
    async fn map(&self, item: &WorkItem<D>) -> anyhow::Result<O> {
        (self.0)(item.clone()).await
    }
}

/// Per-job overrides of the executor-wide settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub max_concurrency: Option<usize>,
    pub timeout: Option<Duration>,
    pub retry_on_failure: Option<bool>,
    pub retry_attempts: Option<u32>,
}

/// A split, a mapper and a reducer bundled for one run
pub struct MapReduceJob<I, D, O, R> {
    pub id: String,
    pub name: String,
    pub splitter: Arc<dyn Splitter<I, D>>,
    pub mapper: Arc<dyn Mapper<D, O>>,
    pub reducer: Arc<dyn Reducer<O, R>>,
    pub options: JobOptions,
}

impl<I, D, O, R> MapReduceJob<I, D, O, R> {
    pub fn new(
        name: impl Into<String>,
        splitter: Arc<dyn Splitter<I, D>>,
        mapper: Arc<dyn Mapper<D, O>>,
        reducer: Arc<dyn Reducer<O, R>>,
    ) -> Self {
        let name = name.into();
        Self {
            id: super::splitters::sanitize_id(&name),
            name,
            splitter,
            mapper,
            reducer,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Executor-wide settings and injected collaborators
#[derive(Clone)]
pub struct ExecutorOptions {
    pub max_concurrency: usize,
    /// Per-item map timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub retry_on_failure: bool,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub on_progress: Option<ProgressCallback>,
    pub is_cancelled: Option<CancelCheck>,
    pub ai_invoker: Option<Arc<dyn AiInvoker>>,
    pub process_tracker: Option<Arc<dyn ProcessTracker>>,
    pub temp_files: Arc<TempFileStore>,
    /// Parameters exposed to reducers through the reduce context
    pub parameters: HashMap<String, String>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: ConcurrencyLimiter::DEFAULT_MAX_CONCURRENCY,
            timeout: None,
            retry_on_failure: false,
            retry_attempts: 1,
            retry_delay: Duration::from_millis(500),
            on_progress: None,
            is_cancelled: None,
            ai_invoker: None,
            process_tracker: None,
            temp_files: Arc::new(TempFileStore::new()),
            parameters: HashMap::new(),
        }
    }
}

impl ExecutorOptions {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_on_failure = attempts > 0;
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_cancellation(mut self, is_cancelled: CancelCheck) -> Self {
        self.is_cancelled = Some(is_cancelled);
        self
    }

    pub fn with_ai_invoker(mut self, invoker: Arc<dyn AiInvoker>) -> Self {
        self.ai_invoker = Some(invoker);
        self
    }

    pub fn with_process_tracker(mut self, tracker: Arc<dyn ProcessTracker>) -> Self {
        self.process_tracker = Some(tracker);
        self
    }

    pub fn with_temp_files(mut self, temp_files: Arc<TempFileStore>) -> Self {
        self.temp_files = temp_files;
        self
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    timeout: Option<Duration>,
    retry_on_failure: bool,
    retry_attempts: u32,
    retry_delay: Duration,
}

enum AttemptError {
    TimedOut(Duration),
    Failed(String),
}

pub struct MapReduceExecutor {
    options: ExecutorOptions,
}

impl MapReduceExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    fn is_cancelled(&self) -> bool {
        self.options.is_cancelled.as_ref().is_some_and(|f| f())
    }

    /// Run a job over `input`
    ///
    /// Map and reduce failures are reported through the returned
    /// [`JobResult`]; `Err` is returned only when the job cannot start.
    pub async fn execute<I, D, O, R>(
        &self,
        job: &MapReduceJob<I, D, O, R>,
        input: &I,
    ) -> Result<JobResult<O, R>, PipelineError>
    where
        D: Clone + Send + Sync + 'static,
        O: Serialize + Send + Sync + 'static,
    {
        let run_start = Instant::now();
        let max_concurrency = job
            .options
            .max_concurrency
            .unwrap_or(self.options.max_concurrency);
        let limiter = ConcurrencyLimiter::new(max_concurrency)?;
        let policy = RetryPolicy {
            timeout: job.options.timeout.or(self.options.timeout),
            retry_on_failure: job
                .options
                .retry_on_failure
                .unwrap_or(self.options.retry_on_failure),
            retry_attempts: job
                .options
                .retry_attempts
                .unwrap_or(self.options.retry_attempts),
            retry_delay: self.options.retry_delay,
        };

        let progress = ProgressReporter::new(self.options.on_progress.clone());
        progress.splitting();
        let items = job.splitter.split(input);
        let total_items = items.len();
        let execution_id = format!("{}-{}", job.id, Uuid::new_v4());
        info!(
            "Starting job '{}' ({}) with {} items, max concurrency {}",
            job.name, execution_id, total_items, max_concurrency
        );

        let tracker = self.options.process_tracker.as_ref();
        let group_id = tracker.map(|t| t.register_group(&format!("{} ({} items)", job.name, total_items)));

        progress.mapping_started(total_items);
        let map_start = Instant::now();
        let item_ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let tasks: Vec<_> = items
            .into_iter()
            .map(|item| {
                let mapper = job.mapper.clone();
                let progress = &progress;
                let group_id = group_id.as_deref();
                move || async move {
                    let result = self.map_item(mapper, item, policy, group_id).await;
                    progress.item_finished(result.success);
                    Ok::<_, CancellationError>(result)
                }
            })
            .collect();
        let settled = limiter
            .all_settled(tasks, self.options.is_cancelled.as_ref())
            .await;
        let map_phase_time_ms = map_start.elapsed().as_millis() as u64;

        let mut cancelled_items = 0;
        let map_results: Vec<MapResult<O>> = settled
            .into_iter()
            .zip(item_ids)
            .map(|(outcome, id)| match outcome {
                Ok(result) => result,
                Err(CancellationError) => {
                    cancelled_items += 1;
                    MapResult::failure(id, CANCELLATION_MESSAGE, 0).with_attempts(0)
                }
            })
            .collect();

        let successful_maps = map_results.iter().filter(|r| r.success).count();
        let failed_maps = total_items - successful_maps;
        let mut stats = ExecutionStats {
            total_items,
            successful_maps,
            failed_maps,
            cancelled_items,
            map_phase_time_ms,
            reduce_phase_time_ms: 0,
            max_concurrency,
        };
        let group_stats = GroupStats {
            total_items,
            successful_items: successful_maps,
            failed_items: failed_maps,
        };

        if cancelled_items > 0 || self.is_cancelled() {
            warn!(
                "Job '{}' cancelled: {} items never dispatched",
                job.name, cancelled_items
            );
            if let (Some(tracker), Some(group)) = (tracker, group_id.as_deref()) {
                tracker.complete_group(group, CANCELLATION_MESSAGE, &group_stats);
            }
            progress.failed(CANCELLATION_MESSAGE);
            return Ok(JobResult {
                success: false,
                output: None,
                map_results,
                reduce_stats: None,
                stats,
                total_time_ms: run_start.elapsed().as_millis() as u64,
                error: Some(PipelineError::cancelled().to_string()),
            });
        }

        progress.reducing();
        let reduce_start = Instant::now();
        let context = ReduceContext {
            execution_id,
            map_phase_time_ms,
            successful_maps,
            failed_maps,
            parameters: self.options.parameters.clone(),
            ai_invoker: self.options.ai_invoker.clone(),
            process_tracker: self.options.process_tracker.clone(),
            group_id: group_id.clone(),
            temp_files: self.options.temp_files.clone(),
        };
        let reduced = job.reducer.reduce(&map_results, &context).await;
        stats.reduce_phase_time_ms = reduce_start.elapsed().as_millis() as u64;

        let (output, reduce_stats, error) = match reduced {
            Ok(result) => {
                let error = (failed_maps > 0).then(|| {
                    format!("{} of {} map operations failed", failed_maps, total_items)
                });
                (Some(result.output), Some(result.stats), error)
            }
            Err(e) => {
                warn!("Reduce phase of '{}' failed: {}", job.name, e);
                (None, None, Some(e.to_string()))
            }
        };
        let success = error.is_none();

        let summary = match &error {
            None => format!("Completed {} items", total_items),
            Some(e) => e.clone(),
        };
        if let (Some(tracker), Some(group)) = (tracker, group_id.as_deref()) {
            tracker.complete_group(group, &summary, &group_stats);
        }
        if success {
            progress.complete();
        } else {
            progress.failed(summary);
        }

        let total_time_ms = run_start.elapsed().as_millis() as u64;
        info!(
            "Job '{}' finished: {} succeeded, {} failed in {}ms",
            job.name, successful_maps, failed_maps, total_time_ms
        );
        Ok(JobResult {
            success,
            output,
            map_results,
            reduce_stats,
            stats,
            total_time_ms,
            error,
        })
    }

    /// Map one item with timeout and retry handling
    async fn map_item<D, O>(
        &self,
        mapper: Arc<dyn Mapper<D, O>>,
        item: WorkItem<D>,
        policy: RetryPolicy,
        group_id: Option<&str>,
    ) -> MapResult<O>
    where
        D: Clone + Send + Sync + 'static,
        O: Serialize + Send + Sync + 'static,
    {
        let start = Instant::now();
        let tracker = self.options.process_tracker.as_ref();
        let process_id = tracker.map(|t| t.register_process(&format!("Map {}", item.id), group_id));

        let mut timeout = policy.timeout;
        let mut timeout_retried = false;
        let mut failure_retries = 0;
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match run_attempt(mapper.clone(), item.clone(), timeout).await {
                Ok(output) => break Ok(output),
                Err(AttemptError::TimedOut(limit)) if !timeout_retried => {
                    timeout_retried = true;
                    timeout = Some(limit * 2);
                    warn!(
                        "Item {} timed out after {}ms, retrying once with {}ms",
                        item.id,
                        limit.as_millis(),
                        (limit * 2).as_millis()
                    );
                }
                Err(AttemptError::TimedOut(limit)) => {
                    let message = format!("Map of item {}", item.id);
                    break Err(timed_out(&message, limit.as_millis() as u64).to_string());
                }
                Err(AttemptError::Failed(message))
                    if policy.retry_on_failure && failure_retries < policy.retry_attempts =>
                {
                    failure_retries += 1;
                    debug!(
                        "Item {} failed ({}), retry {}/{}",
                        item.id, message, failure_retries, policy.retry_attempts
                    );
                    tokio::time::sleep(policy.retry_delay).await;
                }
                Err(AttemptError::Failed(message)) => break Err(message),
            }
        };
        let elapsed = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                if let (Some(tracker), Some(id)) = (tracker, process_id.as_deref()) {
                    let value = serde_json::to_value(&output).ok();
                    tracker.update_process(id, ProcessStatus::Completed, None, None, value.as_ref());
                }
                debug!("Item {} mapped in {}ms", item.id, elapsed);
                MapResult::success(item.id, output, elapsed).with_attempts(attempts)
            }
            Err(error) => {
                if let (Some(tracker), Some(id)) = (tracker, process_id.as_deref()) {
                    tracker.update_process(id, ProcessStatus::Failed, None, Some(&error), None);
                }
                warn!("Item {} failed after {} attempts: {}", item.id, attempts, error);
                MapResult::failure(item.id, error, elapsed).with_attempts(attempts)
            }
        }
    }
}

/// One mapper invocation on its own task
///
/// On timeout the task is detached, not aborted; its result is discarded.
async fn run_attempt<D, O>(
    mapper: Arc<dyn Mapper<D, O>>,
    item: WorkItem<D>,
    timeout: Option<Duration>,
) -> Result<O, AttemptError>
where
    D: Send + Sync + 'static,
    O: Send + 'static,
{
    let handle = tokio::spawn(async move { mapper.map(&item).await });
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => return Err(AttemptError::TimedOut(limit)),
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AttemptError::Failed(format!("{:#}", e))),
        Err(e) => Err(AttemptError::Failed(format!("Map task panicked: {}", e))),
    }
}
