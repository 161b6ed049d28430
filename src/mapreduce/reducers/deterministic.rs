use super::{elapsed_ms, Reducer};
use crate::error::PipelineError;
use crate::mapreduce::types::{successful_outputs, MapResult, ReduceContext, ReduceResult, ReduceStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
/// Folds a repeated occurrence into the accumulated entry: `(existing, new)`
pub type MergeFn<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;
pub type SortFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;
pub type SummarizeFn<T> = Arc<dyn Fn(&[T]) -> Value + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterministicOutput<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

/// Flattens map outputs, merges entries sharing a key, then sorts and summarizes
///
/// Entries keep the order in which their key was first seen unless a sort
/// function is supplied.
pub struct DeterministicReducer<T> {
    get_key: KeyFn<T>,
    merge: MergeFn<T>,
    sort: Option<SortFn<T>>,
    summarize: Option<SummarizeFn<T>>,
}

impl<T> DeterministicReducer<T> {
    pub fn new(
        get_key: impl Fn(&T) -> String + Send + Sync + 'static,
        merge: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            get_key: Arc::new(get_key),
            merge: Arc::new(merge),
            sort: None,
            summarize: None,
        }
    }

    /// Keep the first occurrence of each key
    pub fn keep_first(get_key: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self::new(get_key, |existing, _| existing)
    }

    pub fn with_sort(mut self, sort: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.sort = Some(Arc::new(sort));
        self
    }

    pub fn with_summary(mut self, summarize: impl Fn(&[T]) -> Value + Send + Sync + 'static) -> Self {
        self.summarize = Some(Arc::new(summarize));
        self
    }

    /// Merge `entries` by key; returns the merged entries and the total occurrence count
    pub fn merge_entries<I>(&self, entries: I) -> (Vec<T>, usize)
    where
        I: IntoIterator<Item = T>,
    {
        let mut slots: Vec<Option<T>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut total = 0;

        for entry in entries {
            total += 1;
            let key = (self.get_key)(&entry);
            match index.get(&key) {
                Some(&slot) => {
                    if let Some(existing) = slots[slot].take() {
                        slots[slot] = Some((self.merge)(existing, entry));
                    }
                }
                None => {
                    index.insert(key, slots.len());
                    slots.push(Some(entry));
                }
            }
        }

        let mut items: Vec<T> = slots.into_iter().flatten().collect();
        if let Some(sort) = &self.sort {
            items.sort_by(|a, b| sort(a, b));
        }
        (items, total)
    }
}

#[async_trait]
impl<T> Reducer<Vec<T>, DeterministicOutput<T>> for DeterministicReducer<T>
where
    T: Clone + Send + Sync,
{
    async fn reduce(
        &self,
        results: &[MapResult<Vec<T>>],
        _context: &ReduceContext,
    ) -> Result<ReduceResult<DeterministicOutput<T>>, PipelineError> {
        let start = Instant::now();
        let (items, total) = self.merge_entries(successful_outputs(results).flatten().cloned());
        let merged = total - items.len();
        debug!(
            "Deterministic reduce: {} entries, {} unique, {} merged",
            total,
            items.len(),
            merged
        );

        let summary = self.summarize.as_ref().map(|summarize| summarize(&items));
        Ok(ReduceResult {
            stats: ReduceStats {
                input_count: total,
                output_count: items.len(),
                merged_count: Some(merged),
                used_ai_reduce: false,
                time_ms: elapsed_ms(start),
            },
            output: DeterministicOutput { items, summary },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Finding {
        file: String,
        count: u32,
    }

    fn finding(file: &str, count: u32) -> Finding {
        Finding {
            file: file.to_string(),
            count,
        }
    }

    fn reducer() -> DeterministicReducer<Finding> {
        DeterministicReducer::new(
            |f: &Finding| f.file.clone(),
            |mut existing: Finding, new: Finding| {
                existing.count += new.count;
                existing
            },
        )
    }

    #[tokio::test]
    async fn test_merges_by_key_in_first_seen_order() {
        let results = vec![
            MapResult::success("1", vec![finding("b.rs", 1), finding("a.rs", 2)], 0),
            MapResult::failure("2", "boom", 0),
            MapResult::success("3", vec![finding("b.rs", 4), finding("c.rs", 1)], 0),
        ];

        let result = reducer()
            .reduce(&results, &ReduceContext::new("job"))
            .await
            .unwrap();

        assert_eq!(
            result.output.items,
            vec![finding("b.rs", 5), finding("a.rs", 2), finding("c.rs", 1)]
        );
        assert_eq!(result.stats.input_count, 4);
        assert_eq!(result.stats.output_count, 3);
        assert_eq!(result.stats.merged_count, Some(1));
        assert!(result.output.summary.is_none());
    }

    #[tokio::test]
    async fn test_sort_and_summary() {
        let reducer = reducer()
            .with_sort(|a, b| b.count.cmp(&a.count))
            .with_summary(|items| json!({"files": items.len()}));
        let results = vec![MapResult::success(
            "1",
            vec![finding("a", 1), finding("b", 3), finding("a", 1)],
            0,
        )];

        let result = reducer
            .reduce(&results, &ReduceContext::new("job"))
            .await
            .unwrap();
        assert_eq!(result.output.items, vec![finding("b", 3), finding("a", 2)]);
        assert_eq!(result.output.summary, Some(json!({"files": 2})));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<MapResult<Vec<Finding>>> = Vec::new();
        let result = reducer()
            .reduce(&results, &ReduceContext::new("job"))
            .await
            .unwrap();
        assert!(result.output.items.is_empty());
        assert_eq!(result.stats.merged_count, Some(0));
    }

    #[test]
    fn test_keep_first() {
        let reducer = DeterministicReducer::keep_first(|s: &String| s.to_lowercase());
        let (items, total) = reducer.merge_entries(vec!["A".to_string(), "a".to_string()]);
        assert_eq!(items, vec!["A".to_string()]);
        assert_eq!(total, 2);
    }
}
