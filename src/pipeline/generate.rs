//! AI-generated pipeline input

use super::config::{GenerateSpec, PromptItem};
use crate::abstractions::{AiInvoker, InvokeOptions};
use crate::error::{ErrorCode, PipelineError};
use crate::mapreduce::output::extract_json;
use crate::mapreduce::template::value_to_prompt_string;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Prompt sent to the AI: the user's request plus the expected shape
pub fn build_generate_prompt(spec: &GenerateSpec, limit: Option<usize>) -> String {
    let example: serde_json::Map<String, Value> = spec
        .schema
        .iter()
        .map(|field| (field.clone(), Value::String("...".to_string())))
        .collect();
    let mut prompt = format!(
        "{}\n\nRespond with a JSON array of objects. Each object must have exactly these string fields: {}.\nExample element: {}",
        spec.prompt.trim_end(),
        spec.schema.join(", "),
        Value::Object(example)
    );
    if let Some(limit) = limit {
        prompt.push_str(&format!("\nReturn at most {} elements.", limit));
    }
    prompt.push_str("\nReturn only the JSON array.");
    prompt
}

/// Turn a JSON response into items with exactly the schema fields
pub fn parse_generated_items(
    response: &str,
    schema: &[String],
) -> Result<Vec<PromptItem>, PipelineError> {
    let elements = match extract_json(response) {
        Some(Value::Array(elements)) => elements,
        // A lone object is taken as a one-element list
        Some(Value::Object(object)) => vec![Value::Object(object)],
        _ => {
            return Err(PipelineError::ai_invocation_with_code(
                ErrorCode::AI_UNPARSEABLE_RESPONSE,
                "Generated input is not a JSON array",
            ))
        }
    };

    let mut items = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        let Value::Object(object) = element else {
            warn!("Skipping generated element {}: not an object", index);
            continue;
        };
        let item: PromptItem = schema
            .iter()
            .map(|field| {
                let value = object.get(field).map(value_to_prompt_string).unwrap_or_default();
                (field.clone(), value)
            })
            .collect();
        items.push(item);
    }
    Ok(items)
}

/// Ask the AI for input items matching `spec.schema`
pub async fn generate_items(
    spec: &GenerateSpec,
    invoker: &dyn AiInvoker,
    limit: Option<usize>,
) -> Result<Vec<PromptItem>, PipelineError> {
    let prompt = build_generate_prompt(spec, limit);
    let options = InvokeOptions::default().with_model(spec.model.clone());
    debug!("Generating input with fields {:?}", spec.schema);

    let response = invoker
        .invoke(&prompt, &options)
        .await
        .into_result()
        .map_err(|e| {
            PipelineError::ai_invocation_with_code(
                ErrorCode::AI_INVOCATION_FAILED,
                format!("Input generation failed: {}", e),
            )
        })?;

    let mut items = parse_generated_items(&response, &spec.schema)?;
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    info!("Generated {} input items", items.len());
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAiInvoker;

    fn spec() -> GenerateSpec {
        GenerateSpec {
            prompt: "List edge cases for a date parser".into(),
            schema: vec!["input".into(), "expected".into()],
            model: Some("fast".into()),
        }
    }

    #[test]
    fn test_prompt_mentions_schema_and_limit() {
        let prompt = build_generate_prompt(&spec(), Some(3));
        assert!(prompt.starts_with("List edge cases"));
        assert!(prompt.contains("input, expected"));
        assert!(prompt.contains("at most 3"));
    }

    #[test]
    fn test_parse_fills_missing_and_stringifies() {
        let response = "Sure!\n```json\n[{\"input\": \"2020-02-30\", \"expected\": false, \"extra\": 1}, {\"input\": \"\"}]\n```";
        let items = parse_generated_items(response, &spec().schema).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["expected"], "false");
        assert!(!items[0].contains_key("extra"));
        assert_eq!(items[1]["expected"], "");
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_generated_items("I cannot help with that", &spec().schema).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AI_UNPARSEABLE_RESPONSE);
    }

    #[tokio::test]
    async fn test_generate_items_honours_limit_and_model() {
        let mock = MockAiInvoker::new().with_default_response(
            r#"[{"input":"a","expected":"1"},{"input":"b","expected":"2"},{"input":"c","expected":"3"}]"#,
        );
        let items = generate_items(&spec(), &mock, Some(2)).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["input"], "b");
        assert_eq!(mock.recorded_options()[0].model.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn test_generate_items_failure() {
        let mock = MockAiInvoker::new().with_failure("backend down");
        let err = generate_items(&spec(), &mock, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AI_INVOCATION_FAILED);
        assert!(err.to_string().contains("backend down"));
    }
}
