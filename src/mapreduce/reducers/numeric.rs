use super::{elapsed_ms, Reducer};
use crate::error::PipelineError;
use crate::mapreduce::types::{successful_outputs, MapResult, ReduceContext, ReduceResult, ReduceStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericAggregation {
    pub sum: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl NumericAggregation {
    /// All fields are zero for an empty input
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let sum: f64 = values.iter().sum();
        Self {
            sum,
            average: sum / values.len() as f64,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count: values.len(),
        }
    }
}

/// Sum, average, min, max and count over numeric outputs
///
/// NaN and infinite outputs are skipped and do not count towards
/// `input_count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericAggregationReducer;

#[async_trait]
impl Reducer<f64, NumericAggregation> for NumericAggregationReducer {
    async fn reduce(
        &self,
        results: &[MapResult<f64>],
        _context: &ReduceContext,
    ) -> Result<ReduceResult<NumericAggregation>, PipelineError> {
        let start = Instant::now();
        let (values, skipped): (Vec<f64>, Vec<f64>) =
            successful_outputs(results).copied().partition(|v| v.is_finite());
        if !skipped.is_empty() {
            debug!("Skipping {} non-finite numeric outputs", skipped.len());
        }
        Ok(ReduceResult {
            output: NumericAggregation::from_values(&values),
            stats: ReduceStats {
                input_count: values.len(),
                output_count: 1,
                merged_count: None,
                used_ai_reduce: false,
                time_ms: elapsed_ms(start),
            },
        })
    }
}
