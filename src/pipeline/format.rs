//! Formatting of pipeline results and the pipeline reducer
//!
//! Every formatter works on rows: the item's fields followed by the output
//! (the named fields in structured mode, a single `output` column in text
//! mode). Output fields win over item fields with the same name.

use super::config::ReduceType;
use super::mapper::PromptMapOutput;
use crate::error::{ErrorExt, PipelineError};
use crate::mapreduce::ai_reduce::{ai_reduce, AiReduceConfig, AiReduceOutput};
use crate::mapreduce::reducers::{elapsed_ms, Reducer};
use crate::mapreduce::template::value_to_prompt_string;
use crate::mapreduce::types::{successful_outputs, MapResult, ReduceContext, ReduceResult, ReduceStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;

const OUTPUT_COLUMN: &str = "output";

/// Final pipeline output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReducedOutput {
    /// Rendered result, ready to print or write to a file
    pub formatted: String,
    /// The AI reduce result, for `type: ai`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiReduceOutput>,
}

/// Ordered columns of one result
pub type Row = Vec<(String, Value)>;

/// One item and its output as ordered columns
pub fn to_row(output: &PromptMapOutput) -> Row {
    let mut row: Row = output
        .item
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let mut set = |key: &str, value: &Value| match row.iter_mut().find(|(k, _)| k == key) {
        Some((_, existing)) => *existing = value.clone(),
        None => row.push((key.to_string(), value.clone())),
    };
    match &output.output {
        Value::Object(fields) => {
            for (k, v) in fields {
                set(k, v);
            }
        }
        other => set(OUTPUT_COLUMN, other),
    }
    row
}

pub fn row_to_value(row: Row) -> Value {
    Value::Object(row.into_iter().collect::<Map<String, Value>>())
}

/// Column names in first-seen order across all rows
fn columns(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for (key, _) in row {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell(row: &Row, column: &str) -> String {
    row.iter()
        .find(|(k, _)| k == column)
        .map(|(_, v)| value_to_prompt_string(v))
        .unwrap_or_default()
}

fn output_text(output: &Value) -> String {
    match output {
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, value_to_prompt_string(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => value_to_prompt_string(other),
    }
}

/// Numbered entries, item fields on the first line and the output indented below
pub fn format_list(outputs: &[&PromptMapOutput]) -> String {
    let mut text = String::new();
    for (index, output) in outputs.iter().enumerate() {
        let label = output
            .item
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(" | ");
        text.push_str(&format!("{}. {}\n", index + 1, label));
        for line in output_text(&output.output).lines() {
            text.push_str(&format!("   {}\n", line));
        }
    }
    text
}

fn escape_table_cell(value: &str) -> String {
    value.replace('|', "\\|").replace("\r\n", "<br>").replace('\n', "<br>")
}

/// Markdown table
pub fn format_table(outputs: &[&PromptMapOutput]) -> String {
    let rows: Vec<_> = outputs.iter().map(|o| to_row(o)).collect();
    let columns = columns(&rows);
    if columns.is_empty() {
        return String::new();
    }

    let mut text = format!("| {} |\n", columns.join(" | "));
    text.push_str(&format!("|{}\n", " --- |".repeat(columns.len())));
    for row in &rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| escape_table_cell(&cell(row, c)))
            .collect();
        text.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    text
}

/// Pretty JSON array of rows
pub fn format_json(outputs: &[&PromptMapOutput]) -> Result<String, PipelineError> {
    let rows: Vec<Value> = outputs.iter().map(|o| row_to_value(to_row(o))).collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

pub fn format_csv(outputs: &[&PromptMapOutput]) -> Result<String, PipelineError> {
    let rows: Vec<_> = outputs.iter().map(|o| to_row(o)).collect();
    let columns = columns(&rows);
    let mut writer = csv::Writer::from_writer(Vec::new());
    if !columns.is_empty() {
        writer
            .write_record(&columns)
            .to_execution_error("Failed to write CSV header")?;
    }
    for row in &rows {
        let record: Vec<String> = columns.iter().map(|c| cell(row, c)).collect();
        writer
            .write_record(&record)
            .to_execution_error("Failed to write CSV row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::execution(format!("Failed to finish CSV output: {}", e)))?;
    String::from_utf8(bytes).to_execution_error("CSV output is not valid UTF-8")
}

/// Outputs only, separated by blank lines
pub fn format_text(outputs: &[&PromptMapOutput]) -> String {
    outputs
        .iter()
        .map(|o| output_text(&o.output))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Reduces prompt map results into the configured output format
pub struct PipelineReducer {
    kind: ReduceType,
    ai: Option<AiReduceConfig>,
}

impl PipelineReducer {
    /// Formatting reducer; use [`PipelineReducer::ai`] for `type: ai`
    pub fn format(kind: ReduceType) -> Self {
        Self { kind, ai: None }
    }

    pub fn ai(config: AiReduceConfig) -> Self {
        Self {
            kind: ReduceType::Ai,
            ai: Some(config),
        }
    }
}

#[async_trait]
impl Reducer<Vec<PromptMapOutput>, ReducedOutput> for PipelineReducer {
    async fn reduce(
        &self,
        results: &[MapResult<Vec<PromptMapOutput>>],
        context: &ReduceContext,
    ) -> Result<ReduceResult<ReducedOutput>, PipelineError> {
        let start = Instant::now();
        let outputs: Vec<&PromptMapOutput> = successful_outputs(results).flatten().collect();
        let input_count = outputs.len();

        let formatted = match self.kind {
            ReduceType::List => format_list(&outputs),
            ReduceType::Table => format_table(&outputs),
            ReduceType::Json => format_json(&outputs)?,
            ReduceType::Csv => format_csv(&outputs)?,
            ReduceType::Text => format_text(&outputs),
            ReduceType::Ai => {
                let config = self.ai.as_ref().ok_or_else(|| {
                    PipelineError::reduce("Reduce type 'ai' needs an AI reduce configuration")
                })?;
                let rows: Vec<Value> = outputs.iter().map(|o| row_to_value(to_row(o))).collect();
                let reduced = ai_reduce(&rows, context, config).await?;
                return Ok(ReduceResult {
                    output: ReducedOutput {
                        formatted: reduced.output.render(),
                        ai: Some(reduced.output),
                    },
                    stats: ReduceStats {
                        time_ms: elapsed_ms(start),
                        ..reduced.stats
                    },
                });
            }
        };

        Ok(ReduceResult {
            output: ReducedOutput {
                formatted,
                ai: None,
            },
            stats: ReduceStats {
                input_count,
                output_count: input_count,
                merged_count: None,
                used_ai_reduce: false,
                time_ms: elapsed_ms(start),
            },
        })
    }
}
