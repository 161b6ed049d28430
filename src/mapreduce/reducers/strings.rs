use super::{elapsed_ms, Reducer};
use crate::error::PipelineError;
use crate::mapreduce::types::{successful_outputs, MapResult, ReduceContext, ReduceResult, ReduceStats};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Instant;

/// Removes duplicate strings across all map outputs, keeping first occurrences
#[derive(Debug, Clone, Copy, Default)]
pub struct StringDeduplicationReducer {
    case_insensitive: bool,
}

impl StringDeduplicationReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat strings differing only by case as duplicates; the first casing wins
    pub fn case_insensitive() -> Self {
        Self {
            case_insensitive: true,
        }
    }

    pub fn dedupe<'a, I>(&self, strings: I) -> (Vec<String>, usize)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut seen = HashSet::new();
        let mut total = 0;
        let unique: Vec<String> = strings
            .into_iter()
            .inspect(|_| total += 1)
            .filter(|s| {
                let key = if self.case_insensitive {
                    s.to_lowercase()
                } else {
                    (*s).clone()
                };
                seen.insert(key)
            })
            .cloned()
            .collect();
        (unique, total)
    }
}

#[async_trait]
impl Reducer<Vec<String>, Vec<String>> for StringDeduplicationReducer {
    async fn reduce(
        &self,
        results: &[MapResult<Vec<String>>],
        _context: &ReduceContext,
    ) -> Result<ReduceResult<Vec<String>>, PipelineError> {
        let start = Instant::now();
        let (output, total) = self.dedupe(successful_outputs(results).flatten());
        Ok(ReduceResult {
            stats: ReduceStats {
                input_count: total,
                output_count: output.len(),
                merged_count: Some(total - output.len()),
                used_ai_reduce: false,
                time_ms: elapsed_ms(start),
            },
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn results() -> Vec<MapResult<Vec<String>>> {
        vec![
            MapResult::success("1", strings(&["Alpha", "beta"]), 0),
            MapResult::success("2", strings(&["alpha", "beta", "gamma"]), 0),
            MapResult::failure("3", "boom", 0),
        ]
    }

    #[tokio::test]
    async fn test_case_sensitive_by_default() {
        let result = StringDeduplicationReducer::new()
            .reduce(&results(), &ReduceContext::new("job"))
            .await
            .unwrap();
        assert_eq!(result.output, strings(&["Alpha", "beta", "alpha", "gamma"]));
        assert_eq!(result.stats.merged_count, Some(1));
    }

    #[tokio::test]
    async fn test_case_insensitive_keeps_first_casing() {
        let result = StringDeduplicationReducer::case_insensitive()
            .reduce(&results(), &ReduceContext::new("job"))
            .await
            .unwrap();
        assert_eq!(result.output, strings(&["Alpha", "beta", "gamma"]));
        assert_eq!(result.stats.input_count, 5);
        assert_eq!(result.stats.merged_count, Some(2));
    }
}
