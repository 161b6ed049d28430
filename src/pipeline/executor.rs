//! End-to-end pipeline execution
//!
//! Resolves prompts, loads input (inline, CSV or AI-generated), applies
//! `limit` and the optional filter, validates templates against the
//! surviving items and then runs one map-reduce job.

use super::config::{InputSource, PipelineConfig, PromptItem};
use super::csv_reader::{read_csv_file, CsvOptions};
use super::filter::{execute_filter, FilterContext, FilterStats};
use super::format::{PipelineReducer, ReducedOutput};
use super::generate::generate_items;
use super::mapper::{PromptItemSplitter, PromptMapOutput, PromptMapper};
use super::resolver::{resolve_pipeline, ResolveOptions};
use crate::abstractions::{AiInvoker, ProcessTracker};
use crate::config::Settings;
use crate::error::{ErrorCode, PipelineError};
use crate::mapreduce::ai_reduce::AiReduceConfig;
use crate::mapreduce::executor::{ExecutorOptions, JobOptions, MapReduceExecutor, MapReduceJob};
use crate::mapreduce::limiter::CancelCheck;
use crate::mapreduce::progress::ProgressCallback;
use crate::mapreduce::template::{self, TemplateError};
use crate::mapreduce::temp_files::TempFileStore;
use crate::mapreduce::types::{ExecutionStats, MapResult, ReduceStats};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Collaborators and engine defaults for a pipeline run
#[derive(Clone)]
pub struct PipelineExecutionOptions {
    pub ai_invoker: Arc<dyn AiInvoker>,
    pub process_tracker: Option<Arc<dyn ProcessTracker>>,
    pub temp_files: Arc<TempFileStore>,
    /// Used when the pipeline does not set `map.parallel`
    pub max_concurrency: usize,
    /// Used when the pipeline does not set `map.timeoutMs`
    pub timeout: Option<Duration>,
    pub retry_attempts: u32,
    pub skills_dir: PathBuf,
    pub parameter_overrides: HashMap<String, String>,
    pub results_file_threshold: Option<usize>,
    pub on_progress: Option<ProgressCallback>,
    pub is_cancelled: Option<CancelCheck>,
}

impl PipelineExecutionOptions {
    pub fn new(ai_invoker: Arc<dyn AiInvoker>) -> Self {
        Self::from_settings(&Settings::default(), ai_invoker)
    }

    pub fn from_settings(settings: &Settings, ai_invoker: Arc<dyn AiInvoker>) -> Self {
        let temp_files = match &settings.temp_dir {
            Some(dir) => TempFileStore::with_base_dir(
                dir.join(format!("promptflow-{}", std::process::id())),
            ),
            None => TempFileStore::new(),
        };
        Self {
            ai_invoker,
            process_tracker: None,
            temp_files: Arc::new(temp_files),
            max_concurrency: settings.max_concurrency,
            timeout: settings.map_timeout(),
            retry_attempts: settings.retry_attempts,
            skills_dir: settings.skills_dir.clone(),
            parameter_overrides: HashMap::new(),
            results_file_threshold: Some(settings.results_file_threshold),
            on_progress: None,
            is_cancelled: None,
        }
    }

    pub fn with_process_tracker(mut self, tracker: Arc<dyn ProcessTracker>) -> Self {
        self.process_tracker = Some(tracker);
        self
    }

    pub fn with_temp_files(mut self, temp_files: Arc<TempFileStore>) -> Self {
        self.temp_files = temp_files;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_parameter_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.parameter_overrides = overrides;
        self
    }

    pub fn with_skills_dir(mut self, skills_dir: impl Into<PathBuf>) -> Self {
        self.skills_dir = skills_dir.into();
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

    fn cancelled(&self) -> bool {
        self.is_cancelled.as_ref().is_some_and(|f| f())
    }
}

/// Outcome of a pipeline run
///
/// As with the underlying job, a failed run keeps per-item results and any
/// output derivable from the successful items.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecutionResult {
    pub pipeline_name: String,
    pub success: bool,
    pub output: Option<ReducedOutput>,
    pub map_results: Vec<MapResult<Vec<PromptMapOutput>>>,
    /// Items after `limit` and filtering
    pub input_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_stats: Option<FilterStats>,
    pub stats: ExecutionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_stats: Option<ReduceStats>,
    pub total_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn template_error(field: &str, error: TemplateError) -> PipelineError {
    PipelineError::validation_with_code(
        ErrorCode::VALIDATION_MISSING_VARIABLE,
        field,
        error.to_string(),
    )
}

async fn load_items(
    config: &PipelineConfig,
    options: &PipelineExecutionOptions,
) -> Result<Vec<PromptItem>, PipelineError> {
    let limit = config.input.limit;
    let mut items = match &config.input.source {
        InputSource::Inline(items) | InputSource::Array(items) => items.clone(),
        InputSource::Csv(source) => read_csv_file(
            &source.path,
            CsvOptions {
                delimiter: source.delimiter,
            },
        )?,
        InputSource::Generate(spec) => {
            generate_items(spec, options.ai_invoker.as_ref(), limit).await?
        }
    };
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    Ok(items)
}

/// Run a validated pipeline
///
/// `Err` covers problems found before any map call (unresolvable prompts,
/// unreadable input, template variables with no value, cancellation during
/// filtering). Map and reduce failures are reported in the result.
pub async fn execute_pipeline(
    config: &PipelineConfig,
    options: PipelineExecutionOptions,
) -> Result<PipelineExecutionResult, PipelineError> {
    let start = Instant::now();
    let resolved = resolve_pipeline(
        config,
        &ResolveOptions {
            skills_dir: options.skills_dir.clone(),
            parameter_overrides: options.parameter_overrides.clone(),
        },
    )?;

    let mut items = load_items(config, &options).await?;
    info!("Pipeline '{}' loaded {} items", config.name, items.len());

    let filter_stats = match &config.filter {
        Some(filter) => {
            let context = FilterContext {
                ai_invoker: Some(options.ai_invoker.clone()),
                parameters: resolved.parameters.clone(),
                is_cancelled: options.is_cancelled.clone(),
            };
            let result = execute_filter(filter, items, &context).await?;
            items = result.included;
            Some(result.stats)
        }
        None => None,
    };
    if options.cancelled() {
        return Err(PipelineError::cancelled());
    }

    // Batched prompts only see parameters and {{ITEMS}}
    let no_fields = [PromptItem::new()];
    let map_scope: &[PromptItem] = if config.map.batch_size > 1 {
        &no_fields
    } else {
        &items
    };
    template::validate_template(&resolved.map_prompt, map_scope, &resolved.parameters)
        .map_err(|e| template_error("map.prompt", e))?;
    if let Some(prompt) = &resolved.reduce_prompt {
        template::validate_template(prompt, &no_fields, &resolved.parameters)
            .map_err(|e| template_error("reduce.prompt", e))?;
    }

    let mapper = PromptMapper::new(options.ai_invoker.clone(), resolved.map_prompt.clone())
        .with_parameters(resolved.parameters.clone())
        .with_output(config.map.output.clone())
        .with_model(config.map.model.clone());
    let reducer = match (&config.reduce.ai, resolved.reduce_prompt) {
        (Some(ai), Some(prompt)) => PipelineReducer::ai(AiReduceConfig {
            prompt,
            output: ai.output.clone(),
            model: ai.model.clone(),
            parameters: HashMap::new(),
            results_file_threshold: options.results_file_threshold,
        }),
        _ => PipelineReducer::format(config.reduce.kind),
    };

    let job = MapReduceJob::new(
        config.name.clone(),
        Arc::new(PromptItemSplitter::new(config.map.batch_size)),
        Arc::new(mapper),
        Arc::new(reducer),
    )
    .with_options(JobOptions {
        max_concurrency: config.map.parallel,
        timeout: config.map.timeout,
        retry_on_failure: config.map.retry_attempts.map(|n| n > 0),
        retry_attempts: config.map.retry_attempts,
    });

    let mut executor_options = ExecutorOptions::default()
        .with_max_concurrency(options.max_concurrency)
        .with_timeout(options.timeout)
        .with_retry(options.retry_attempts, Duration::from_millis(500))
        .with_ai_invoker(options.ai_invoker.clone())
        .with_temp_files(options.temp_files.clone())
        .with_parameters(resolved.parameters);
    if let Some(tracker) = &options.process_tracker {
        executor_options = executor_options.with_process_tracker(tracker.clone());
    }
    if let Some(callback) = &options.on_progress {
        executor_options = executor_options.with_progress(callback.clone());
    }
    if let Some(is_cancelled) = &options.is_cancelled {
        executor_options = executor_options.with_cancellation(is_cancelled.clone());
    }

    let input_count = items.len();
    let result = MapReduceExecutor::new(executor_options)
        .execute(&job, &items)
        .await?;
    if let Some(error) = &result.error {
        warn!("Pipeline '{}' finished with errors: {}", config.name, error);
    }

    Ok(PipelineExecutionResult {
        pipeline_name: config.name.clone(),
        success: result.success,
        output: result.output,
        map_results: result.map_results,
        input_count,
        filter_stats,
        stats: result.stats,
        reduce_stats: result.reduce_stats,
        total_time_ms: start.elapsed().as_millis() as u64,
        error: result.error,
    })
}
