//! End-to-end pipeline scenarios against the public API with a mock AI

use promptflow::mapreduce::{
    ai_reduce, AiReduceConfig, ExecutorOptions, FnMapper, FnSplitter, IdentityReducer,
    MapOutputMode, MapReduceExecutor, MapReduceJob, ReduceContext, WorkItem,
};
use promptflow::pipeline::{
    execute_pipeline, load_pipeline, PipelineExecutionOptions, ReducedOutput,
};
use promptflow::testing::{MockAiInvoker, RecordingTracker, TestContext};
use promptflow::ErrorCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn options(mock: &Arc<MockAiInvoker>, ctx: &TestContext) -> PipelineExecutionOptions {
    PipelineExecutionOptions::new(mock.clone())
        .with_temp_files(Arc::new(promptflow::mapreduce::TempFileStore::with_base_dir(
            ctx.path().join("tmp"),
        )))
        .with_skills_dir(ctx.path().join("skills"))
}

#[tokio::test]
async fn test_isolated_failure_with_bounded_concurrency() {
    let executor = MapReduceExecutor::new(ExecutorOptions::default().with_max_concurrency(2));
    let job = MapReduceJob::new(
        "doubler",
        Arc::new(FnSplitter(|input: &Vec<i32>| -> Vec<WorkItem<i32>> {
            input
                .iter()
                .map(|n| WorkItem::new(format!("item-{}", n), *n))
                .collect()
        })),
        Arc::new(FnMapper(|item: WorkItem<i32>| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if item.data == 3 {
                anyhow::bail!("item 3 is broken");
            }
            Ok(item.data * 2)
        })),
        Arc::new(IdentityReducer),
    );

    let result = executor.execute(&job, &vec![1, 2, 3, 4, 5]).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.stats.successful_maps, 4);
    assert_eq!(result.stats.failed_maps, 1);
    assert_eq!(result.output, Some(vec![2, 4, 8, 10]));
    assert_eq!(result.map_results[2].work_item_id, "item-3");
    assert_eq!(result.map_results[2].error.as_deref(), Some("item 3 is broken"));
}

#[tokio::test]
async fn test_csv_pipeline_with_structured_output() {
    let ctx = TestContext::new().unwrap();
    ctx.write_file(
        "bugs.csv",
        "title,description\nCrash,App crashes on start\nTypo,Misspelled label\nSlow,Search takes 10s\n",
    )
    .unwrap();
    let pipeline = ctx
        .write_file(
            "pipeline.yaml",
            r#"
name: triage
input:
  from:
    type: csv
    path: bugs.csv
map:
  prompt: "Classify {{title}}: {{description}}"
  output: [severity]
reduce:
  type: json
"#,
        )
        .unwrap();
    let mock = Arc::new(
        MockAiInvoker::new()
            .with_response("Crash", r#"{"severity": "high"}"#)
            .with_response("Typo", r#"```json
{"severity": "low", "reason": "cosmetic"}
```"#)
            .with_response("Slow", r#"{"severity": "medium"}"#),
    );

    let config = load_pipeline(&pipeline).unwrap();
    let result = execute_pipeline(&config, options(&mock, &ctx)).await.unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.map_results.len(), 3);
    let severities: Vec<_> = result
        .map_results
        .iter()
        .map(|r| r.output.as_ref().unwrap()[0].output["severity"].clone())
        .collect();
    assert_eq!(severities, vec![json!("high"), json!("low"), json!("medium")]);
    assert!(mock
        .prompts()
        .contains(&"Classify Crash: App crashes on start".to_string()));

    let ReducedOutput { formatted, ai } = result.output.unwrap();
    assert!(ai.is_none());
    let rows: serde_json::Value = serde_json::from_str(&formatted).unwrap();
    assert_eq!(
        rows[1],
        json!({"title": "Typo", "description": "Misspelled label", "severity": "low"})
    );
}

#[tokio::test]
async fn test_ai_reduce_summary() {
    let mock = Arc::new(MockAiInvoker::new().with_default_response(r#"{"summary":"ok"}"#));
    let context = ReduceContext::new("summary-run")
        .with_counts(2, 0)
        .with_ai_invoker(mock.clone());
    let config = AiReduceConfig::new("Summarize {{RESULTS}}")
        .with_output(MapOutputMode::Structured(vec!["summary".to_string()]));

    let result = ai_reduce(&[json!("first"), json!("second")], &context, &config)
        .await
        .unwrap();

    assert_eq!(result.output.get("summary"), Some(&json!("ok")));
    assert!(result.stats.used_ai_reduce);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_hybrid_filter_and_ai_reduce_pipeline() {
    let ctx = TestContext::new().unwrap();
    let pipeline = ctx
        .write_file(
            "pipeline.yaml",
            r#"
name: risky-changes
input:
  items:
    - { file: auth.rs, lines: "420" }
    - { file: readme.md, lines: "900" }
    - { file: db.rs, lines: "15" }
    - { file: api.rs, lines: "300" }
filter:
  type: hybrid
  combineMode: and
  rule:
    rules:
      - { field: lines, operator: greater_than, value: 100 }
  ai:
    prompt: "Is {{file}} security sensitive?"
map:
  prompt: "Review {{file}}"
reduce:
  type: ai
  prompt: "Summarize {{COUNT}} reviews: {{RESULTS}}"
  output: [summary]
"#,
        )
        .unwrap();
    let mock = Arc::new(
        MockAiInvoker::new()
            .with_response("Is auth.rs", r#"{"include": true}"#)
            .with_response("Is readme.md", r#"{"include": false}"#)
            .with_response("Is api.rs", r#"{"include": true}"#)
            .with_response("Review", "looks fine")
            .with_response("Summarize", r#"{"summary": "2 files reviewed"}"#),
    );
    let tracker = Arc::new(RecordingTracker::new());

    let config = load_pipeline(&pipeline).unwrap();
    let result = execute_pipeline(&config, options(&mock, &ctx).with_process_tracker(tracker))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error);
    let filter = result.filter_stats.unwrap();
    assert_eq!(filter.included_count, 2);
    assert_eq!(filter.ai_evaluated, 3);
    assert_eq!(result.input_count, 2);
    assert!(!mock.prompts().iter().any(|p| p.contains("db.rs")));

    let output = result.output.unwrap();
    assert_eq!(output.ai.unwrap().get("summary"), Some(&json!("2 files reviewed")));
    assert!(result.reduce_stats.unwrap().used_ai_reduce);
}

#[tokio::test]
async fn test_generated_input_respects_limit() {
    let ctx = TestContext::new().unwrap();
    let pipeline = ctx
        .write_file(
            "pipeline.yaml",
            r#"
name: ideas
input:
  generate:
    prompt: "Invent test cases for a login form"
    schema: [name, input]
  limit: 2
map:
  prompt: "Expected result for {{name}} with {{input}}?"
reduce:
  type: list
"#,
        )
        .unwrap();
    let mock = Arc::new(
        MockAiInvoker::new()
            .with_response(
                "Invent",
                r#"[{"name": "empty", "input": ""}, {"name": "long", "input": "aaaa"}, {"name": "unicode", "input": "é"}]"#,
            )
            .with_default_response("rejected"),
    );

    let config = load_pipeline(&pipeline).unwrap();
    let result = execute_pipeline(&config, options(&mock, &ctx)).await.unwrap();

    assert_eq!(result.input_count, 2);
    assert_eq!(
        result.output.unwrap().formatted,
        "1. input:  | name: empty\n   rejected\n2. input: aaaa | name: long\n   rejected\n"
    );
}

#[tokio::test]
async fn test_missing_prompt_file_is_reported() {
    let ctx = TestContext::new().unwrap();
    let pipeline = ctx
        .write_file(
            "pipeline.yaml",
            "name: x\ninput: { items: [{ a: b }] }\nmap: { promptFile: missing.md }\nreduce: { type: list }\n",
        )
        .unwrap();
    let mock = Arc::new(MockAiInvoker::new());

    let config = load_pipeline(&pipeline).unwrap();
    let err = execute_pipeline(&config, options(&mock, &ctx)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::STORAGE_NOT_FOUND);
    assert_eq!(mock.call_count(), 0);
}
