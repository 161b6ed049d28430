//! AI-driven synthesis of map results
//!
//! Successful outputs are serialized into `{{RESULTS}}` (and optionally a
//! temp file behind `{{RESULTS_FILE}}`), the reduce prompt is rendered and
//! the AI backend is invoked exactly once.

use crate::abstractions::{InvokeOptions, ProcessStatus};
use crate::error::{ErrorCode, PipelineError};
use crate::mapreduce::output::{parse_structured, MapOutputMode};
use crate::mapreduce::reducers::{elapsed_ms, Reducer};
use crate::mapreduce::template::{
    self, render, TemplateContext, COUNT, FAILURE_COUNT, RESULTS, RESULTS_FILE, SUCCESS_COUNT,
};
use crate::mapreduce::types::{successful_outputs, MapResult, ReduceContext, ReduceResult, ReduceStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{debug, info, warn};

const PROCESS_DESCRIPTION: &str = "AI Reduce";

/// Payload size above which inlining `{{RESULTS}}` is discouraged
pub const DEFAULT_RESULTS_FILE_THRESHOLD: usize = 100 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiReduceConfig {
    pub prompt: String,
    pub output: MapOutputMode,
    pub model: Option<String>,
    /// Extra template parameters; these win over the context's parameters
    pub parameters: HashMap<String, String>,
    pub results_file_threshold: Option<usize>,
}

impl AiReduceConfig {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: MapOutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Result of an AI reduce: parsed fields or raw text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AiReduceOutput {
    Structured(Map<String, Value>),
    Text(String),
}

impl AiReduceOutput {
    /// A named field of a structured result
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            AiReduceOutput::Structured(fields) => fields.get(field),
            AiReduceOutput::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AiReduceOutput::Text(text) => Some(text),
            AiReduceOutput::Structured(_) => None,
        }
    }

    /// Text as-is, structured results as pretty JSON
    pub fn render(&self) -> String {
        match self {
            AiReduceOutput::Text(text) => text.clone(),
            AiReduceOutput::Structured(fields) => {
                serde_json::to_string_pretty(fields).unwrap_or_default()
            }
        }
    }
}

/// Run one AI reduce over already-successful map outputs
pub async fn ai_reduce(
    outputs: &[Value],
    context: &ReduceContext,
    config: &AiReduceConfig,
) -> Result<ReduceResult<AiReduceOutput>, PipelineError> {
    let start = Instant::now();
    let invoker = context.ai_invoker.clone().ok_or_else(|| {
        PipelineError::reduce_with_code(
            ErrorCode::REDUCE_MISSING_INVOKER,
            "AI reduce requires an AI invoker",
        )
    })?;

    let results_json = serde_json::to_string(outputs)?;
    let threshold = config
        .results_file_threshold
        .unwrap_or(DEFAULT_RESULTS_FILE_THRESHOLD);
    let uses_results_file = template::contains_variable(&config.prompt, RESULTS_FILE);
    if !uses_results_file
        && results_json.len() > threshold
        && template::contains_variable(&config.prompt, RESULTS)
    {
        warn!(
            "Inlining {} bytes of results into the reduce prompt; consider {{{{RESULTS_FILE}}}}",
            results_json.len()
        );
    }

    // Held until the call returns; dropping it removes the file
    let results_file = if uses_results_file {
        let pretty = serde_json::to_string_pretty(outputs)?;
        Some(context.temp_files.write(&pretty, Some("results"), Some("json"))?)
    } else {
        None
    };

    let mut parameters = context.parameters.clone();
    parameters.extend(config.parameters.clone());
    let mut template_context = TemplateContext::new()
        .with_parameters(&parameters)
        .with_reserved(RESULTS, results_json)
        .with_reserved(COUNT, outputs.len().to_string())
        .with_reserved(SUCCESS_COUNT, context.successful_maps.to_string())
        .with_reserved(FAILURE_COUNT, context.failed_maps.to_string());
    if let Some(handle) = &results_file {
        template_context =
            template_context.with_reserved(RESULTS_FILE, handle.file_path().display().to_string());
    }
    let prompt = render(&config.prompt, &template_context);

    let tracker = context.process_tracker.as_ref();
    let process_id =
        tracker.map(|t| t.register_process(PROCESS_DESCRIPTION, context.group_id.as_deref()));
    let fail = |message: String| {
        if let (Some(tracker), Some(id)) = (tracker, process_id.as_deref()) {
            tracker.update_process(id, ProcessStatus::Failed, None, Some(&message), None);
        }
        PipelineError::reduce_with_code(ErrorCode::REDUCE_AI_FAILED, message)
    };

    debug!("Invoking AI reduce over {} outputs", outputs.len());
    let options = InvokeOptions::default().with_model(config.model.clone());
    let response = invoker
        .invoke(&prompt, &options)
        .await
        .into_result()
        .map_err(|e| fail(format!("AI reduce failed: {}", e)))?;
    drop(results_file);

    let output = match &config.output {
        MapOutputMode::Text => AiReduceOutput::Text(response.trim().to_string()),
        MapOutputMode::Structured(fields) => parse_structured(&response, fields)
            .map(AiReduceOutput::Structured)
            .map_err(|e| fail(format!("Failed to parse AI reduce response: {}", e)))?,
    };

    if let (Some(tracker), Some(id)) = (tracker, process_id.as_deref()) {
        let structured = match &output {
            AiReduceOutput::Structured(fields) => Some(Value::Object(fields.clone())),
            AiReduceOutput::Text(_) => None,
        };
        tracker.update_process(
            id,
            ProcessStatus::Completed,
            Some(&response),
            None,
            structured.as_ref(),
        );
    }

    info!("AI reduce completed over {} outputs", outputs.len());
    Ok(ReduceResult {
        output,
        stats: ReduceStats {
            input_count: outputs.len(),
            output_count: 1,
            merged_count: None,
            used_ai_reduce: true,
            time_ms: elapsed_ms(start),
        },
    })
}

/// [`Reducer`] adapter around [`ai_reduce`] for any serializable map output
pub struct AiReducer<O> {
    config: AiReduceConfig,
    _output: PhantomData<fn(&O)>,
}

impl<O> AiReducer<O> {
    pub fn new(config: AiReduceConfig) -> Self {
        Self {
            config,
            _output: PhantomData,
        }
    }
}

#[async_trait]
impl<O> Reducer<O, AiReduceOutput> for AiReducer<O>
where
    O: Serialize + Send + Sync,
{
    async fn reduce(
        &self,
        results: &[MapResult<O>],
        context: &ReduceContext,
    ) -> Result<ReduceResult<AiReduceOutput>, PipelineError> {
        let outputs = successful_outputs(results)
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        ai_reduce(&outputs, context, &self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreduce::temp_files::TempFileStore;
    use crate::testing::{MockAiInvoker, RecordingTracker};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(invoker: Arc<MockAiInvoker>) -> ReduceContext {
        ReduceContext::new("job").with_counts(2, 1).with_ai_invoker(invoker)
    }

    #[tokio::test]
    async fn test_structured_reduce() {
        let invoker = Arc::new(MockAiInvoker::new().with_default_response(r#"{"summary":"ok"}"#));
        let config = AiReduceConfig::new("Summarize {{RESULTS}}")
            .with_output(MapOutputMode::Structured(vec!["summary".to_string()]));
        let outputs = vec![json!({"a": 1}), json!({"a": 2})];

        let result = ai_reduce(&outputs, &context(invoker.clone()), &config)
            .await
            .unwrap();

        assert_eq!(result.output.get("summary"), Some(&json!("ok")));
        assert!(result.stats.used_ai_reduce);
        assert_eq!(result.stats.input_count, 2);
        assert_eq!(
            invoker.prompts(),
            vec![r#"Summarize [{"a":1},{"a":2}]"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_counts_and_parameters_filled() {
        let invoker = Arc::new(MockAiInvoker::new().with_default_response("done"));
        let mut config = AiReduceConfig::new("{{COUNT}}/{{SUCCESS_COUNT}}/{{FAILURE_COUNT}} {{lang}}");
        config.parameters.insert("lang".into(), "en".into());

        let result = ai_reduce(&[json!(1), json!(2)], &context(invoker.clone()), &config)
            .await
            .unwrap();
        assert_eq!(result.output, AiReduceOutput::Text("done".into()));
        assert_eq!(invoker.prompts(), vec!["2/2/1 en".to_string()]);
    }

    #[tokio::test]
    async fn test_results_file_written_and_removed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TempFileStore::with_base_dir(dir.path().join("tmp")));
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_handler = seen.clone();
        let invoker = Arc::new(MockAiInvoker::new().with_handler(move |prompt: &str| {
            let path = prompt.trim_start_matches("Read ").to_string();
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            *seen_in_handler.lock().unwrap() = Some((path, content));
            Ok("fine".to_string())
        }));
        let ctx = context(invoker).with_temp_files(store.clone());
        let outputs = vec![json!({"quote": "He said \"hi\"\n"})];

        ai_reduce(&outputs, &ctx, &AiReduceConfig::new("Read {{RESULTS_FILE}}"))
            .await
            .unwrap();

        let (path, content) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&content).unwrap(),
            json!([{"quote": "He said \"hi\"\n"}])
        );
        assert!(!std::path::Path::new(&path).exists());
        assert_eq!(store.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_marks_tracker_process_failed() {
        let invoker = Arc::new(MockAiInvoker::new().with_failure("backend down"));
        let tracker = Arc::new(RecordingTracker::new());
        let mut ctx = context(invoker).with_process_tracker(tracker.clone());
        ctx.group_id = Some("group-1".to_string());

        let err = ai_reduce(&[json!(1)], &ctx, &AiReduceConfig::new("{{RESULTS}}"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::REDUCE_AI_FAILED);
        let processes = tracker.processes();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].description, "AI Reduce");
        assert_eq!(processes[0].parent_group_id.as_deref(), Some("group-1"));
        assert_eq!(processes[0].status, ProcessStatus::Failed);
        assert!(processes[0].error.as_deref().unwrap().contains("backend down"));
    }

    #[tokio::test]
    async fn test_unparseable_structured_response_fails() {
        let invoker = Arc::new(MockAiInvoker::new().with_default_response("not json"));
        let config = AiReduceConfig::new("{{RESULTS}}")
            .with_output(MapOutputMode::Structured(vec!["summary".to_string()]));
        let err = ai_reduce(&[], &context(invoker), &config).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[tokio::test]
    async fn test_missing_invoker() {
        let err = ai_reduce(&[], &ReduceContext::new("job"), &AiReduceConfig::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::REDUCE_MISSING_INVOKER);
    }

    #[tokio::test]
    async fn test_ai_reducer_adapter_skips_failures() {
        let invoker = Arc::new(MockAiInvoker::new().with_default_response("ok"));
        let results = vec![
            MapResult::success("1", "a".to_string(), 0),
            MapResult::failure("2", "boom", 0),
        ];
        let reducer = AiReducer::new(AiReduceConfig::new("{{RESULTS}}"));
        let result = reducer
            .reduce(&results, &context(invoker.clone()))
            .await
            .unwrap();
        assert_eq!(result.output.as_text(), Some("ok"));
        assert_eq!(invoker.prompts(), vec![r#"["a"]"#.to_string()]);
    }
}
