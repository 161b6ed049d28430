//! Pipeline YAML configuration
//!
//! The document is deserialized into the `Raw*` types, which mirror the YAML
//! shape, and then validated once into [`PipelineConfig`], where mutually
//! exclusive options are sum types.

use crate::error::{helpers::file_not_found, ErrorExt, PipelineError};
use crate::mapreduce::output::MapOutputMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One input row: field name to value
pub type PromptItem = BTreeMap<String, String>;

/// Pipeline configuration as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPipelineConfig {
    pub name: String,
    pub input: RawInputConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<RawFilterConfig>,
    pub map: RawMapConfig,
    pub reduce: RawReduceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInputConfig {
    /// Inline items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<BTreeMap<String, Value>>>,
    /// A CSV source or an inline array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<RawInputFrom>,
    /// Items generated by the AI before the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<RawGenerateConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<Parameter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInputFrom {
    Source {
        #[serde(rename = "type")]
        kind: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delimiter: Option<String>,
    },
    Array(Vec<BTreeMap<String, Value>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Scalars are accepted and rendered as prompt text
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGenerateConfig {
    pub prompt: String,
    pub schema: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilterConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RawRuleFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<RawAiFilter>,
    /// `and` or `or`, hybrid filters only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRuleFilter {
    pub rules: Vec<RawFilterRule>,
    /// `all` or `any`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilterRule {
    pub field: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAiFilter {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMapConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReduceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A validated pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    pub input: InputConfig,
    pub filter: Option<FilterConfig>,
    pub map: MapConfig,
    pub reduce: ReduceConfig,
    /// Directory relative paths (CSV, prompt files) are resolved against
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputConfig {
    pub source: InputSource,
    pub parameters: HashMap<String, String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// `input.items`
    Inline(Vec<PromptItem>),
    /// `input.from` with `type: csv`
    Csv(CsvSource),
    /// `input.from` given as an array
    Array(Vec<PromptItem>),
    /// `input.generate`
    Generate(GenerateSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSource {
    pub path: PathBuf,
    pub delimiter: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateSpec {
    pub prompt: String,
    pub schema: Vec<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Inline(String),
    /// Resolved against the pipeline directory
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapConfig {
    pub prompt: PromptSource,
    pub skill: Option<String>,
    pub output: MapOutputMode,
    pub model: Option<String>,
    pub parallel: Option<usize>,
    pub timeout: Option<Duration>,
    /// 1 means one item per AI call
    pub batch_size: usize,
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceType {
    List,
    Table,
    Json,
    Csv,
    Text,
    Ai,
}

impl ReduceType {
    pub const ALL: [&'static str; 6] = ["list", "table", "json", "csv", "text", "ai"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "list" => Some(ReduceType::List),
            "table" => Some(ReduceType::Table),
            "json" => Some(ReduceType::Json),
            "csv" => Some(ReduceType::Csv),
            "text" => Some(ReduceType::Text),
            "ai" => Some(ReduceType::Ai),
            _ => None,
        }
    }
}

/// Reduce stage; `ai` is set exactly when `kind` is [`ReduceType::Ai`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceConfig {
    pub kind: ReduceType,
    pub ai: Option<AiReduceSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiReduceSpec {
    pub prompt: PromptSource,
    pub output: MapOutputMode,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FilterConfig {
    Rule(RuleFilter),
    Ai(AiFilter),
    Hybrid {
        rule: RuleFilter,
        ai: AiFilter,
        combine: CombineMode,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CombineMode {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuleMode {
    /// Every rule must match
    #[default]
    All,
    /// At least one rule must match
    Any,
}

#[derive(Debug, Clone)]
pub struct RuleFilter {
    pub rules: Vec<FilterRule>,
    pub mode: RuleMode,
}

#[derive(Debug, Clone)]
pub struct FilterRule {
    pub field: String,
    pub operator: FilterOperator,
}

/// Rule operator with its operand, checked at load time
#[derive(Debug, Clone)]
pub enum FilterOperator {
    Equals(String),
    NotEquals(String),
    In(Vec<String>),
    NotIn(Vec<String>),
    Contains(String),
    NotContains(String),
    Matches(Regex),
    GreaterThan(f64),
    LessThan(f64),
    Gte(f64),
    Lte(f64),
}

impl FilterOperator {
    pub const NAMES: [&'static str; 11] = [
        "equals",
        "not_equals",
        "in",
        "not_in",
        "contains",
        "not_contains",
        "matches",
        "greater_than",
        "less_than",
        "gte",
        "lte",
    ];
}

pub const DEFAULT_AI_FILTER_PARALLEL: usize = 5;
pub const DEFAULT_AI_FILTER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiFilter {
    pub prompt: String,
    pub model: Option<String>,
    pub parallel: usize,
    pub timeout: Duration,
}

/// Parse and validate a pipeline document
///
/// Relative paths inside the document resolve against `base_dir`.
pub fn parse_pipeline(yaml: &str, base_dir: &Path) -> Result<PipelineConfig, PipelineError> {
    let raw: RawPipelineConfig = serde_yaml::from_str(yaml)?;
    super::validation::validate_pipeline(raw, base_dir)
}

/// Read, parse and validate a pipeline file
pub fn load_pipeline(path: &Path) -> Result<PipelineConfig, PipelineError> {
    if !path.exists() {
        return Err(file_not_found(path, "Pipeline file"));
    }
    let yaml = std::fs::read_to_string(path)
        .to_config_error(format!("Failed to read {}", path.display()))?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parse_pipeline(&yaml, base_dir)
}
