//! YAML-defined AI pipelines
//!
//! A pipeline reads items (inline, CSV or AI-generated), optionally filters
//! them, maps each item (or batch of items) through an AI prompt and reduces
//! the results into a formatted report or a final AI summary.

pub mod config;
pub mod csv_reader;
pub mod executor;
pub mod filter;
pub mod format;
pub mod generate;
pub mod mapper;
pub mod resolver;
pub mod validation;

pub use config::{
    load_pipeline, parse_pipeline, FilterConfig, InputSource, MapConfig, PipelineConfig,
    PromptItem, PromptSource, ReduceConfig, ReduceType,
};
pub use executor::{execute_pipeline, PipelineExecutionOptions, PipelineExecutionResult};
pub use filter::{execute_filter, FilterContext, FilterResult, FilterStats};
pub use format::{PipelineReducer, ReducedOutput};
pub use mapper::{PromptBatch, PromptItemSplitter, PromptMapOutput, PromptMapper};
pub use resolver::{parse_parameter_override, resolve_pipeline, ResolveOptions, ResolvedPipeline};
