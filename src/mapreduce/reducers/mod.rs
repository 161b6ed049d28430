//! Reducers fold per-item map results into a single output
//!
//! Only successful results contribute unless a reducer says otherwise.

mod deterministic;
mod numeric;
mod strings;

pub use deterministic::{DeterministicOutput, DeterministicReducer};
pub use numeric::{NumericAggregation, NumericAggregationReducer};
pub use strings::StringDeduplicationReducer;

use crate::error::PipelineError;
use crate::mapreduce::types::{successful_outputs, MapResult, ReduceContext, ReduceResult, ReduceStats};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Strategy that turns map results into the job output
#[async_trait]
pub trait Reducer<O, R>: Send + Sync {
    async fn reduce(
        &self,
        results: &[MapResult<O>],
        context: &ReduceContext,
    ) -> Result<ReduceResult<R>, PipelineError>;
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Passes successful outputs through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReducer;

#[async_trait]
impl<O> Reducer<O, Vec<O>> for IdentityReducer
where
    O: Clone + Send + Sync,
{
    async fn reduce(
        &self,
        results: &[MapResult<O>],
        _context: &ReduceContext,
    ) -> Result<ReduceResult<Vec<O>>, PipelineError> {
        let start = Instant::now();
        let output: Vec<O> = successful_outputs(results).cloned().collect();
        Ok(ReduceResult {
            stats: ReduceStats {
                input_count: output.len(),
                output_count: output.len(),
                merged_count: None,
                used_ai_reduce: false,
                time_ms: elapsed_ms(start),
            },
            output,
        })
    }
}

/// Concatenates outputs that are themselves sequences
///
/// `input_count` counts flattened elements, not work items.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlattenReducer;

#[async_trait]
impl<T> Reducer<Vec<T>, Vec<T>> for FlattenReducer
where
    T: Clone + Send + Sync,
{
    async fn reduce(
        &self,
        results: &[MapResult<Vec<T>>],
        _context: &ReduceContext,
    ) -> Result<ReduceResult<Vec<T>>, PipelineError> {
        let start = Instant::now();
        let output: Vec<T> = successful_outputs(results).flatten().cloned().collect();
        Ok(ReduceResult {
            stats: ReduceStats {
                input_count: output.len(),
                output_count: output.len(),
                merged_count: None,
                used_ai_reduce: false,
                time_ms: elapsed_ms(start),
            },
            output,
        })
    }
}

/// Caller-supplied aggregation over successful outputs
pub type AggregateFn<O, R> = Arc<dyn Fn(&[O]) -> R + Send + Sync>;

/// Reduces with a caller-supplied function, or a default when nothing succeeded
pub struct AggregatingReducer<O, R> {
    aggregate: AggregateFn<O, R>,
    default: R,
}

impl<O, R> AggregatingReducer<O, R> {
    pub fn new(aggregate: impl Fn(&[O]) -> R + Send + Sync + 'static, default: R) -> Self {
        Self {
            aggregate: Arc::new(aggregate),
            default,
        }
    }
}

#[async_trait]
impl<O, R> Reducer<O, R> for AggregatingReducer<O, R>
where
    O: Clone + Send + Sync,
    R: Clone + Send + Sync,
{
    async fn reduce(
        &self,
        results: &[MapResult<O>],
        _context: &ReduceContext,
    ) -> Result<ReduceResult<R>, PipelineError> {
        let start = Instant::now();
        let outputs: Vec<O> = successful_outputs(results).cloned().collect();
        let output = if outputs.is_empty() {
            self.default.clone()
        } else {
            (self.aggregate)(&outputs)
        };
        Ok(ReduceResult {
            output,
            stats: ReduceStats {
                input_count: outputs.len(),
                output_count: 1,
                merged_count: None,
                used_ai_reduce: false,
                time_ms: elapsed_ms(start),
            },
        })
    }
}
