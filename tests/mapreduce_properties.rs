//! Property tests for the map-reduce building blocks

use promptflow::mapreduce::{
    ConcurrencyLimiter, DeterministicReducer, MapResult, ReduceContext, Reducer, TempFileStore,
};
use promptflow::PipelineError;
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_deterministic_reducer_one_entry_per_key(
        groups in prop::collection::vec(prop::collection::vec(0u8..10, 0..8), 0..6)
    ) {
        let results: Vec<MapResult<Vec<u8>>> = groups
            .iter()
            .enumerate()
            .map(|(i, keys)| MapResult::success(format!("item-{}", i), keys.clone(), 1))
            .collect();
        let reducer = DeterministicReducer::keep_first(|k: &u8| k.to_string());

        let result = runtime()
            .block_on(reducer.reduce(&results, &ReduceContext::new("prop")))
            .unwrap();

        let total: usize = groups.iter().map(Vec::len).sum();
        let unique: HashSet<u8> = groups.iter().flatten().copied().collect();
        prop_assert_eq!(result.output.items.len(), unique.len());
        prop_assert_eq!(result.stats.merged_count, Some(total - unique.len()));
        prop_assert_eq!(result.stats.input_count, total);
    }

    #[test]
    fn prop_limiter_preserves_order(
        delays in prop::collection::vec(0u64..5, 0..12),
        max_concurrency in 1usize..4
    ) {
        let limiter = ConcurrencyLimiter::new(max_concurrency).unwrap();
        let tasks: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(i, delay)| {
                let delay = *delay;
                move || async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok::<usize, PipelineError>(i)
                }
            })
            .collect();

        let results = runtime().block_on(limiter.all(tasks, None)).unwrap();
        prop_assert_eq!(results, (0..delays.len()).collect::<Vec<_>>());
    }

    #[test]
    fn prop_temp_file_round_trip_through_store(content in "\\PC*") {
        let dir = tempfile::TempDir::new().unwrap();
        let store = TempFileStore::with_base_dir(dir.path().join("store"));
        let handle = store.write(&content, Some("results"), Some("json")).unwrap();
        prop_assert_eq!(store.read(handle.file_path()), Some(content));
        prop_assert!(store.cleanup_all());
    }
}
