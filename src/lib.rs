//! # promptflow
//!
//! Runs YAML-defined AI pipelines: load items, filter them, send each one
//! through an AI prompt with bounded concurrency, then reduce the results.
//!
//! ## Usage
//!
//! ```bash
//! promptflow run review.yaml [--param name=value] [--parallel 4] [--output report.md]
//! promptflow validate review.yaml
//! ```
//!
//! ## Modules
//!
//! - `abstractions` - Ports for the AI invoker and process tracking
//! - `config` - Tool settings from the user config file and environment
//! - `error` - Unified error type with stable error codes
//! - `mapreduce` - Generic bounded-concurrency map-reduce engine
//! - `pipeline` - Pipeline definitions, validation and execution
//! - `testing` - Mocks and fixtures shared by unit and integration tests
pub mod abstractions;
pub mod config;
pub mod error;
pub mod mapreduce;
pub mod pipeline;

pub mod testing;

pub use error::{ErrorCode, PipelineError};
