//! Core data types shared by splitters, the executor and reducers

use crate::abstractions::{AiInvoker, ProcessTracker};
use crate::mapreduce::temp_files::TempFileStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One unit of input consumed by exactly one mapper invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem<D> {
    pub id: String,
    pub data: D,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl<D> WorkItem<D> {
    pub fn new(id: impl Into<String>, data: D) -> Self {
        Self {
            id: id.into(),
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of mapping a single work item
///
/// Exactly one of `output` / `error` is set, matching `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapResult<O> {
    pub work_item_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<O>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// Number of mapper invocations made for this item
    #[serde(default)]
    pub attempts: u32,
}

impl<O> MapResult<O> {
    pub fn success(work_item_id: impl Into<String>, output: O, execution_time_ms: u64) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            success: true,
            output: Some(output),
            error: None,
            execution_time_ms,
            attempts: 1,
        }
    }

    pub fn failure(
        work_item_id: impl Into<String>,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            work_item_id: work_item_id.into(),
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time_ms,
            attempts: 1,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Iterate over the outputs of successful results only
pub fn successful_outputs<O>(results: &[MapResult<O>]) -> impl Iterator<Item = &O> {
    results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.output.as_ref())
}

/// Read-only view handed to every reducer
#[derive(Clone)]
pub struct ReduceContext {
    pub execution_id: String,
    pub map_phase_time_ms: u64,
    pub successful_maps: usize,
    pub failed_maps: usize,
    /// Pipeline-level parameters available to prompt templates
    pub parameters: HashMap<String, String>,
    pub ai_invoker: Option<Arc<dyn AiInvoker>>,
    pub process_tracker: Option<Arc<dyn ProcessTracker>>,
    /// Tracker group of the current run
    pub group_id: Option<String>,
    pub temp_files: Arc<TempFileStore>,
}

impl ReduceContext {
    /// Context with no collaborators attached, for deterministic reducers
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            map_phase_time_ms: 0,
            successful_maps: 0,
            failed_maps: 0,
            parameters: HashMap::new(),
            ai_invoker: None,
            process_tracker: None,
            group_id: None,
            temp_files: Arc::new(TempFileStore::new()),
        }
    }

    pub fn with_counts(mut self, successful_maps: usize, failed_maps: usize) -> Self {
        self.successful_maps = successful_maps;
        self.failed_maps = failed_maps;
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

    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_temp_files(mut self, temp_files: Arc<TempFileStore>) -> Self {
        self.temp_files = temp_files;
        self
    }
}

impl fmt::Debug for ReduceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReduceContext")
            .field("execution_id", &self.execution_id)
            .field("map_phase_time_ms", &self.map_phase_time_ms)
            .field("successful_maps", &self.successful_maps)
            .field("failed_maps", &self.failed_maps)
            .field("parameters", &self.parameters)
            .field("ai_invoker", &self.ai_invoker.is_some())
            .field("process_tracker", &self.process_tracker.is_some())
            .field("group_id", &self.group_id)
            .finish()
    }
}

/// Statistics reported by a reducer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceStats {
    pub input_count: usize,
    pub output_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_count: Option<usize>,
    pub used_ai_reduce: bool,
    pub time_ms: u64,
}

/// Output of a reducer together with its statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceResult<O> {
    pub output: O,
    pub stats: ReduceStats,
}

/// Executor phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Splitting,
    Mapping,
    Reducing,
    Complete,
    Failed,
}

/// Snapshot passed to progress callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub phase: JobPhase,
    pub percentage: u8,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Statistics accumulated over one executor run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total_items: usize,
    pub successful_maps: usize,
    pub failed_maps: usize,
    /// Items never dispatched because the run was cancelled
    pub cancelled_items: usize,
    pub map_phase_time_ms: u64,
    pub reduce_phase_time_ms: u64,
    pub max_concurrency: usize,
}

/// Result of one executor run
///
/// A failed run still carries per-item results and whatever reduced output
/// could be derived from the successful items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult<M, R> {
    pub success: bool,
    pub output: Option<R>,
    pub map_results: Vec<MapResult<M>>,
    pub reduce_stats: Option<ReduceStats>,
    pub stats: ExecutionStats,
    pub total_time_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_result_constructors_uphold_invariant() {
        let ok: MapResult<i32> = MapResult::success("a", 1, 5);
        assert!(ok.success && ok.output.is_some() && ok.error.is_none());

        let err: MapResult<i32> = MapResult::failure("b", "boom", 5);
        assert!(!err.success && err.output.is_none() && err.error.is_some());
    }

    #[test]
    fn test_successful_outputs_skips_failures() {
        let results = vec![
            MapResult::success("1", 2, 0),
            MapResult::failure("2", "x", 0),
            MapResult::success("3", 6, 0),
        ];
        let outputs: Vec<_> = successful_outputs(&results).copied().collect();
        assert_eq!(outputs, vec![2, 6]);
    }

    #[test]
    fn test_map_result_serializes_camel_case() {
        let result: MapResult<String> = MapResult::success("item-0", "ok".to_string(), 12);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["workItemId"], "item-0");
        assert_eq!(json["executionTimeMs"], 12);
        assert!(json.get("error").is_none());
    }
}
