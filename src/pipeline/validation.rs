//! Validation of raw pipeline documents
//!
//! Every check reports the offending field path (`input`, `map.prompt`,
//! `filter.rule.rules[0].pattern`, ...) so the user can find it in YAML.

use super::config::{
    AiFilter, AiReduceSpec, CombineMode, CsvSource, FilterConfig, FilterOperator, FilterRule,
    GenerateSpec, InputConfig, InputSource, MapConfig, PipelineConfig, PromptItem, PromptSource,
    RawAiFilter, RawFilterConfig, RawFilterRule, RawGenerateConfig, RawInputConfig, RawInputFrom,
    RawMapConfig, RawPipelineConfig, RawReduceConfig, RawRuleFilter, ReduceConfig, ReduceType,
    RuleFilter, RuleMode, DEFAULT_AI_FILTER_PARALLEL, DEFAULT_AI_FILTER_TIMEOUT,
};
use crate::error::{ErrorCode, PipelineError};
use crate::mapreduce::output::MapOutputMode;
use crate::mapreduce::template::{self, value_to_prompt_string};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

type Result<T> = std::result::Result<T, PipelineError>;

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex pattern"))
}

fn required(field: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::validation_with_code(ErrorCode::VALIDATION_REQUIRED_FIELD, field, message)
}

fn invalid(field: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::validation_with_code(ErrorCode::VALIDATION_INVALID_VALUE, field, message)
}

fn exclusive(field: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::validation_with_code(ErrorCode::VALIDATION_MUTUALLY_EXCLUSIVE, field, message)
}

fn positive(field: &str, value: Option<i64>) -> Result<Option<u64>> {
    match value {
        None => Ok(None),
        Some(v) if v > 0 => Ok(Some(v as u64)),
        Some(v) => Err(invalid(field, format!("must be greater than 0, got {}", v))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Validate a raw document into a typed [`PipelineConfig`]
pub fn validate_pipeline(raw: RawPipelineConfig, base_dir: &Path) -> Result<PipelineConfig> {
    if raw.name.trim().is_empty() {
        return Err(required("name", "Pipeline name is required"));
    }

    let input = validate_input(raw.input, base_dir)?;
    let filter = raw.filter.map(validate_filter).transpose()?;
    let map = validate_map(raw.map, base_dir)?;
    let reduce = validate_reduce(raw.reduce, base_dir)?;

    Ok(PipelineConfig {
        name: raw.name,
        input,
        filter,
        map,
        reduce,
        base_dir: base_dir.to_path_buf(),
    })
}

fn to_prompt_items(rows: Vec<BTreeMap<String, Value>>) -> Vec<PromptItem> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(key, value)| (key, value_to_prompt_string(&value)))
                .collect()
        })
        .collect()
}

fn validate_input(raw: RawInputConfig, base_dir: &Path) -> Result<InputConfig> {
    let source = match (raw.items, raw.from, raw.generate) {
        (Some(items), None, None) => InputSource::Inline(to_prompt_items(items)),
        (None, Some(RawInputFrom::Array(items)), None) => {
            InputSource::Array(to_prompt_items(items))
        }
        (None, Some(RawInputFrom::Source { kind, path, delimiter }), None) => {
            InputSource::Csv(validate_csv_source(&kind, &path, delimiter, base_dir)?)
        }
        (None, None, Some(generate)) => InputSource::Generate(validate_generate(generate)?),
        (None, None, None) => {
            return Err(required(
                "input",
                "One of input.items, input.from or input.generate is required",
            ))
        }
        _ => {
            return Err(exclusive(
                "input",
                "Only one of input.items, input.from or input.generate may be set",
            ))
        }
    };

    let mut parameters = HashMap::new();
    for (index, parameter) in raw.parameters.unwrap_or_default().into_iter().enumerate() {
        let field = format!("input.parameters[{}]", index);
        if parameter.name.trim().is_empty() {
            return Err(required(&field, "Parameter name is required"));
        }
        if parameters.contains_key(&parameter.name) {
            return Err(PipelineError::validation_with_code(
                ErrorCode::VALIDATION_DUPLICATE_VALUE,
                field,
                format!("Duplicate parameter '{}'", parameter.name),
            ));
        }
        parameters.insert(parameter.name, value_to_prompt_string(&parameter.value));
    }

    let limit = positive("input.limit", raw.limit)?.map(|v| v as usize);

    Ok(InputConfig {
        source,
        parameters,
        limit,
    })
}

fn validate_csv_source(
    kind: &str,
    path: &str,
    delimiter: Option<String>,
    base_dir: &Path,
) -> Result<CsvSource> {
    if kind != "csv" {
        return Err(invalid(
            "input.from.type",
            format!("Unsupported input type '{}', expected 'csv'", kind),
        ));
    }
    if path.trim().is_empty() {
        return Err(required("input.from.path", "CSV path is required"));
    }
    let delimiter = match delimiter.as_deref() {
        None => b',',
        Some("\\t") | Some("tab") => b'\t',
        Some(d) if d.len() == 1 => d.as_bytes()[0],
        Some(d) => {
            return Err(invalid(
                "input.from.delimiter",
                format!("Delimiter must be a single ASCII character, got '{}'", d),
            ))
        }
    };
    Ok(CsvSource {
        path: base_dir.join(path),
        delimiter,
    })
}

/// Field names must be unique identifiers usable as `{{name}}`
fn validate_field_names(field: &str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !identifier_regex().is_match(name) {
            return Err(invalid(
                field,
                format!("'{}' is not a valid identifier", name),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(PipelineError::validation_with_code(
                ErrorCode::VALIDATION_DUPLICATE_VALUE,
                field,
                format!("Duplicate field '{}'", name),
            ));
        }
    }
    Ok(())
}

fn validate_generate(raw: RawGenerateConfig) -> Result<GenerateSpec> {
    if raw.prompt.trim().is_empty() {
        return Err(required("input.generate.prompt", "Generate prompt is required"));
    }
    if raw.schema.is_empty() {
        return Err(required(
            "input.generate.schema",
            "Generate schema needs at least one field",
        ));
    }
    validate_field_names("input.generate.schema", &raw.schema)?;
    Ok(GenerateSpec {
        prompt: raw.prompt,
        schema: raw.schema,
        model: raw.model,
    })
}

fn validate_output_fields(field: &str, output: Option<Vec<String>>) -> Result<MapOutputMode> {
    if let Some(fields) = &output {
        validate_field_names(field, fields)?;
    }
    Ok(MapOutputMode::from_fields(output))
}

fn prompt_source(
    field: &str,
    prompt: Option<String>,
    prompt_file: Option<String>,
    base_dir: &Path,
) -> Result<Option<PromptSource>> {
    match (non_empty(prompt), non_empty(prompt_file)) {
        (Some(_), Some(_)) => Err(exclusive(
            field,
            "Only one of prompt or promptFile may be set",
        )),
        (Some(prompt), None) => Ok(Some(PromptSource::Inline(prompt))),
        (None, Some(file)) => Ok(Some(PromptSource::File(base_dir.join(file)))),
        (None, None) => Ok(None),
    }
}

fn validate_map(raw: RawMapConfig, base_dir: &Path) -> Result<MapConfig> {
    let prompt = prompt_source("map.prompt", raw.prompt, raw.prompt_file, base_dir)?
        .ok_or_else(|| required("map.prompt", "One of map.prompt or map.promptFile is required"))?;
    let output = validate_output_fields("map.output", raw.output)?;
    let parallel = positive("map.parallel", raw.parallel)?.map(|v| v as usize);
    let timeout = positive("map.timeoutMs", raw.timeout_ms)?.map(Duration::from_millis);
    let batch_size = positive("map.batchSize", raw.batch_size)?.unwrap_or(1) as usize;

    // Prompt files are checked once loaded
    if let PromptSource::Inline(text) = &prompt {
        template::validate_batch_template(text, batch_size)
            .map_err(|e| invalid("map.batchSize", e.to_string()))?;
    }

    let skill = match raw.skill {
        Some(skill) if skill.trim().is_empty() => {
            return Err(invalid("map.skill", "Skill name must not be empty"))
        }
        other => other,
    };

    Ok(MapConfig {
        prompt,
        skill,
        output,
        model: raw.model,
        parallel,
        timeout,
        batch_size,
        retry_attempts: raw.retry_attempts,
    })
}

fn validate_reduce(raw: RawReduceConfig, base_dir: &Path) -> Result<ReduceConfig> {
    let kind = ReduceType::parse(&raw.kind).ok_or_else(|| {
        invalid(
            "reduce.type",
            format!(
                "Unknown reduce type '{}', expected one of: {}",
                raw.kind,
                ReduceType::ALL.join(", ")
            ),
        )
    })?;

    let prompt = prompt_source("reduce.prompt", raw.prompt, raw.prompt_file, base_dir)?;
    if kind != ReduceType::Ai {
        if prompt.is_some() {
            warn!("reduce.prompt is ignored for reduce type '{}'", raw.kind);
        }
        return Ok(ReduceConfig { kind, ai: None });
    }

    let prompt = prompt.ok_or_else(|| {
        required(
            "reduce.prompt",
            "Reduce type 'ai' requires reduce.prompt or reduce.promptFile",
        )
    })?;
    Ok(ReduceConfig {
        kind,
        ai: Some(AiReduceSpec {
            prompt,
            output: validate_output_fields("reduce.output", raw.output)?,
            model: raw.model,
        }),
    })
}

fn validate_filter(raw: RawFilterConfig) -> Result<FilterConfig> {
    match raw.kind.as_str() {
        "rule" => {
            let rule = raw
                .rule
                .ok_or_else(|| required("filter.rule", "Rule filter requires filter.rule"))?;
            Ok(FilterConfig::Rule(validate_rule_filter(rule)?))
        }
        "ai" => {
            let ai = raw
                .ai
                .ok_or_else(|| required("filter.ai", "AI filter requires filter.ai"))?;
            Ok(FilterConfig::Ai(validate_ai_filter(ai)?))
        }
        "hybrid" => {
            let rule = raw
                .rule
                .ok_or_else(|| required("filter.rule", "Hybrid filter requires filter.rule"))?;
            let ai = raw
                .ai
                .ok_or_else(|| required("filter.ai", "Hybrid filter requires filter.ai"))?;
            let combine = match raw.combine_mode.as_deref() {
                None | Some("and") => CombineMode::And,
                Some("or") => CombineMode::Or,
                Some(other) => {
                    return Err(invalid(
                        "filter.combineMode",
                        format!("Unknown combine mode '{}', expected 'and' or 'or'", other),
                    ))
                }
            };
            Ok(FilterConfig::Hybrid {
                rule: validate_rule_filter(rule)?,
                ai: validate_ai_filter(ai)?,
                combine,
            })
        }
        other => Err(invalid(
            "filter.type",
            format!("Unknown filter type '{}', expected rule, ai or hybrid", other),
        )),
    }
}

fn validate_rule_filter(raw: RawRuleFilter) -> Result<RuleFilter> {
    let mode = match raw.mode.as_deref() {
        None | Some("all") => RuleMode::All,
        Some("any") => RuleMode::Any,
        Some(other) => {
            return Err(invalid(
                "filter.rule.mode",
                format!("Unknown rule mode '{}', expected 'all' or 'any'", other),
            ))
        }
    };
    if raw.rules.is_empty() {
        return Err(required("filter.rule.rules", "At least one rule is required"));
    }
    let rules = raw
        .rules
        .into_iter()
        .enumerate()
        .map(|(index, rule)| validate_rule(index, rule))
        .collect::<Result<Vec<_>>>()?;
    Ok(RuleFilter { rules, mode })
}

fn validate_rule(index: usize, raw: RawFilterRule) -> Result<FilterRule> {
    let base = format!("filter.rule.rules[{}]", index);
    if raw.field.trim().is_empty() {
        return Err(required(&format!("{}.field", base), "Rule field is required"));
    }

    let value_field = format!("{}.value", base);
    let text = |value: Option<Value>| -> Result<String> {
        value
            .map(|v| value_to_prompt_string(&v))
            .ok_or_else(|| required(&value_field, format!("Operator '{}' needs a value", raw.operator)))
    };
    let number = |value: Option<Value>| -> Result<f64> {
        let value = value.ok_or_else(|| {
            required(&value_field, format!("Operator '{}' needs a value", raw.operator))
        })?;
        match &value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| invalid(&value_field, format!("'{}' is not a number", value)))
    };
    let list = |values: Option<Vec<Value>>, value: Option<Value>| -> Result<Vec<String>> {
        let values = match (values, value) {
            (Some(values), _) => values,
            (None, Some(Value::Array(values))) => values,
            (None, Some(single)) => vec![single],
            (None, None) => {
                return Err(required(
                    &format!("{}.values", base),
                    format!("Operator '{}' needs a list of values", raw.operator),
                ))
            }
        };
        Ok(values.iter().map(value_to_prompt_string).collect())
    };

    let operator = match raw.operator.as_str() {
        "equals" => FilterOperator::Equals(text(raw.value.clone())?),
        "not_equals" => FilterOperator::NotEquals(text(raw.value.clone())?),
        "contains" => FilterOperator::Contains(text(raw.value.clone())?),
        "not_contains" => FilterOperator::NotContains(text(raw.value.clone())?),
        "in" => FilterOperator::In(list(raw.values.clone(), raw.value.clone())?),
        "not_in" => FilterOperator::NotIn(list(raw.values.clone(), raw.value.clone())?),
        "greater_than" => FilterOperator::GreaterThan(number(raw.value.clone())?),
        "less_than" => FilterOperator::LessThan(number(raw.value.clone())?),
        "gte" => FilterOperator::Gte(number(raw.value.clone())?),
        "lte" => FilterOperator::Lte(number(raw.value.clone())?),
        "matches" => {
            let pattern_field = format!("{}.pattern", base);
            let pattern = raw
                .pattern
                .clone()
                .or_else(|| raw.value.as_ref().map(value_to_prompt_string))
                .ok_or_else(|| required(&pattern_field, "Operator 'matches' needs a pattern"))?;
            let regex = Regex::new(&pattern).map_err(|e| {
                PipelineError::validation_with_code(
                    ErrorCode::VALIDATION_INVALID_PATTERN,
                    &pattern_field,
                    format!("Invalid regular expression '{}'", pattern),
                )
                .with_source(e)
            })?;
            FilterOperator::Matches(regex)
        }
        other => {
            return Err(invalid(
                &format!("{}.operator", base),
                format!(
                    "Unknown operator '{}', expected one of: {}",
                    other,
                    FilterOperator::NAMES.join(", ")
                ),
            ))
        }
    };

    Ok(FilterRule {
        field: raw.field,
        operator,
    })
}

fn validate_ai_filter(raw: RawAiFilter) -> Result<AiFilter> {
    if raw.prompt.trim().is_empty() {
        return Err(required("filter.ai.prompt", "AI filter prompt is required"));
    }
    Ok(AiFilter {
        prompt: raw.prompt,
        model: raw.model,
        parallel: positive("filter.ai.parallel", raw.parallel)?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_AI_FILTER_PARALLEL),
        timeout: positive("filter.ai.timeoutMs", raw.timeout_ms)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_AI_FILTER_TIMEOUT),
    })
}
