//! Generic bounded-concurrency map-reduce engine
//!
//! A job splits its input into work items, maps each item (usually with one
//! AI call) under a concurrency cap, and folds the per-item results through
//! a reducer.

pub mod ai_reduce;
pub mod executor;
pub mod limiter;
pub mod output;
pub mod progress;
pub mod reducers;
pub mod splitters;
pub mod temp_files;
pub mod template;
pub mod types;

pub use ai_reduce::{ai_reduce, AiReduceConfig, AiReduceOutput, AiReducer};
pub use executor::{
    ExecutorOptions, FnMapper, JobOptions, MapReduceExecutor, MapReduceJob, Mapper,
};
pub use limiter::{CancelCheck, ConcurrencyLimiter};
pub use output::{MapOutputMode, OutputParseError};
pub use progress::{ProgressCallback, ProgressReporter};
pub use reducers::{
    AggregatingReducer, DeterministicOutput, DeterministicReducer, FlattenReducer,
    IdentityReducer, NumericAggregation, NumericAggregationReducer, Reducer,
    StringDeduplicationReducer,
};
pub use splitters::{FnSplitter, Splitter};
pub use temp_files::{TempFileHandle, TempFileStore};
pub use template::TemplateError;
pub use types::{
    ExecutionStats, JobPhase, JobProgress, JobResult, MapResult, ReduceContext, ReduceResult,
    ReduceStats, WorkItem,
};
