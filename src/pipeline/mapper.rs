//! Work items and the AI mapper for pipeline runs
//!
//! With `batchSize > 1` several items share one AI call: the prompt gets
//! the whole batch as `{{ITEMS}}` and the response must be a JSON array
//! holding one result per item, in order.

use super::config::PromptItem;
use crate::abstractions::{AiInvoker, InvokeOptions};
use crate::mapreduce::executor::Mapper;
use crate::mapreduce::output::{parse_array, parse_structured, select_fields, MapOutputMode};
use crate::mapreduce::splitters::Splitter;
use crate::mapreduce::template::{
    contains_variable, render, value_to_prompt_string, TemplateContext, ITEMS,
};
use crate::mapreduce::types::WorkItem;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Items mapped by a single AI call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptBatch {
    pub items: Vec<PromptItem>,
    /// Position of the first item in the pipeline input
    pub start_index: usize,
}

/// Result for one input item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMapOutput {
    pub item: PromptItem,
    /// A string in text mode, an object of the named fields in structured mode
    pub output: Value,
    pub raw_response: String,
}

/// Splits pipeline items into single-item or batched work items
#[derive(Debug, Clone, Copy)]
pub struct PromptItemSplitter {
    batch_size: usize,
}

impl PromptItemSplitter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl Splitter<Vec<PromptItem>, PromptBatch> for PromptItemSplitter {
    fn split(&self, input: &Vec<PromptItem>) -> Vec<WorkItem<PromptBatch>> {
        if self.batch_size == 1 {
            let total = input.len();
            return input
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    WorkItem::new(
                        format!("item-{}", index + 1),
                        PromptBatch {
                            items: vec![item.clone()],
                            start_index: index,
                        },
                    )
                    .with_metadata("index", index)
                    .with_metadata("totalItems", total)
                })
                .collect();
        }

        let total_batches = input.len().div_ceil(self.batch_size);
        input
            .chunks(self.batch_size)
            .enumerate()
            .map(|(batch_index, chunk)| {
                WorkItem::new(
                    format!("batch-{}", batch_index + 1),
                    PromptBatch {
                        items: chunk.to_vec(),
                        start_index: batch_index * self.batch_size,
                    },
                )
                .with_metadata("batchIndex", batch_index)
                .with_metadata("totalBatches", total_batches)
                .with_metadata("itemsInBatch", chunk.len())
            })
            .collect()
    }
}

/// Maps a batch of items with one AI call
pub struct PromptMapper {
    invoker: Arc<dyn AiInvoker>,
    prompt: String,
    parameters: HashMap<String, String>,
    output: MapOutputMode,
    model: Option<String>,
}

impl PromptMapper {
    pub fn new(invoker: Arc<dyn AiInvoker>, prompt: impl Into<String>) -> Self {
        Self {
            invoker,
            prompt: prompt.into(),
            parameters: HashMap::new(),
            output: MapOutputMode::Text,
            model: None,
        }
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_output(mut self, output: MapOutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Whether the prompt takes the whole batch through `{{ITEMS}}`
    fn is_batched(&self) -> bool {
        contains_variable(&self.prompt, ITEMS)
    }

    /// Prompt for a batch: item fields for a single item, `{{ITEMS}}` otherwise
    pub fn render_prompt(&self, batch: &PromptBatch) -> Result<String> {
        if self.is_batched() {
            let context = TemplateContext::new()
                .with_parameters(&self.parameters)
                .with_reserved(ITEMS, serde_json::to_string_pretty(&batch.items)?);
            return Ok(render(&self.prompt, &context));
        }
        match batch.items.as_slice() {
            [item] => {
                let context = TemplateContext::new()
                    .with_item(item)
                    .with_parameters(&self.parameters);
                Ok(render(&self.prompt, &context))
            }
            items => bail!("A batch of {} items needs {{{{ITEMS}}}} in the prompt", items.len()),
        }
    }

    fn parse_single(&self, response: &str) -> Result<Value> {
        match &self.output {
            MapOutputMode::Text => Ok(Value::String(response.trim().to_string())),
            MapOutputMode::Structured(fields) => {
                Ok(Value::Object(parse_structured(response, fields)?))
            }
        }
    }

    fn parse_element(&self, element: Value) -> Result<Value> {
        match &self.output {
            MapOutputMode::Text => Ok(Value::String(value_to_prompt_string(&element))),
            MapOutputMode::Structured(fields) => Ok(Value::Object(select_fields(element, fields)?)),
        }
    }
}

#[async_trait]
impl Mapper<PromptBatch, Vec<PromptMapOutput>> for PromptMapper {
    async fn map(&self, work_item: &WorkItem<PromptBatch>) -> Result<Vec<PromptMapOutput>> {
        let batch = &work_item.data;
        let prompt = self.render_prompt(batch)?;
        let options = InvokeOptions::default().with_model(self.model.clone());
        debug!("Invoking AI for {} ({} items)", work_item.id, batch.items.len());

        let response = self
            .invoker
            .invoke(&prompt, &options)
            .await
            .into_result()
            .map_err(|e| anyhow!(e))?;

        if !self.is_batched() {
            let output = self.parse_single(&response)?;
            return Ok(vec![PromptMapOutput {
                item: batch.items[0].clone(),
                output,
                raw_response: response,
            }]);
        }

        parse_array(&response, batch.items.len())?
            .into_iter()
            .zip(&batch.items)
            .map(|(element, item)| {
                Ok(PromptMapOutput {
                    item: item.clone(),
                    output: self.parse_element(element)?,
                    raw_response: response.clone(),
                })
            })
            .collect()
    }
}
