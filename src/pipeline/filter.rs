//! Pre-map filtering of pipeline items
//!
//! Rule filters are evaluated locally. AI filters send one prompt per item
//! and expect a JSON object with a boolean `include`; they run under their
//! own concurrency limit and per-call timeout, and an item whose call fails
//! is excluded. Hybrid filters only ask the AI where its answer can still
//! change the outcome.

use super::config::{
    AiFilter, CombineMode, FilterConfig, FilterOperator, FilterRule, PromptItem, RuleFilter,
    RuleMode,
};
use crate::abstractions::{AiInvoker, InvokeOptions};
use crate::error::{CancellationError, PipelineError};
use crate::mapreduce::limiter::{CancelCheck, ConcurrencyLimiter};
use crate::mapreduce::output::extract_json;
use crate::mapreduce::template::{render, TemplateContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const INCLUDE_FIELD: &str = "include";
const RESPONSE_INSTRUCTION: &str =
    "Respond with a JSON object containing a boolean \"include\" field.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub total_items: usize,
    pub included_count: usize,
    pub excluded_count: usize,
    /// Items sent to the AI
    pub ai_evaluated: usize,
    /// AI calls that failed, timed out or returned no usable verdict
    pub ai_failures: usize,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterResult {
    pub included: Vec<PromptItem>,
    pub excluded: Vec<PromptItem>,
    pub stats: FilterStats,
}

/// Collaborators needed by AI and hybrid filters
#[derive(Clone, Default)]
pub struct FilterContext {
    pub ai_invoker: Option<Arc<dyn AiInvoker>>,
    pub parameters: HashMap<String, String>,
    pub is_cancelled: Option<CancelCheck>,
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| !n.is_nan())
}

/// Evaluate one rule; a missing field reads as the empty string
pub fn rule_matches(rule: &FilterRule, item: &PromptItem) -> bool {
    let actual = item.get(&rule.field).map(String::as_str).unwrap_or("");

    match &rule.operator {
        FilterOperator::Equals(expected) => actual == expected,
        FilterOperator::NotEquals(expected) => actual != expected,
        FilterOperator::In(values) => values.iter().any(|v| v == actual),
        FilterOperator::NotIn(values) => !values.iter().any(|v| v == actual),
        FilterOperator::Contains(needle) => actual.contains(needle.as_str()),
        FilterOperator::NotContains(needle) => !actual.contains(needle.as_str()),
        FilterOperator::Matches(regex) => regex.is_match(actual),
        FilterOperator::GreaterThan(bound) => parse_number(actual).is_some_and(|n| n > *bound),
        FilterOperator::LessThan(bound) => parse_number(actual).is_some_and(|n| n < *bound),
        FilterOperator::Gte(bound) => parse_number(actual).is_some_and(|n| n >= *bound),
        FilterOperator::Lte(bound) => parse_number(actual).is_some_and(|n| n <= *bound),
    }
}

pub fn evaluate_rules(filter: &RuleFilter, item: &PromptItem) -> bool {
    match filter.mode {
        RuleMode::All => filter.rules.iter().all(|rule| rule_matches(rule, item)),
        RuleMode::Any => filter.rules.iter().any(|rule| rule_matches(rule, item)),
    }
}

/// Read the `include` verdict from an AI response
pub fn parse_verdict(response: &str) -> Option<bool> {
    match extract_json(response)? {
        Value::Object(object) => match object.get(INCLUDE_FIELD)? {
            Value::Bool(include) => Some(*include),
            _ => None,
        },
        _ => None,
    }
}

pub fn build_filter_prompt(
    filter: &AiFilter,
    item: &PromptItem,
    parameters: &HashMap<String, String>,
) -> String {
    let context = TemplateContext::new()
        .with_item(item)
        .with_parameters(parameters);
    format!("{}\n\n{}", render(&filter.prompt, &context), RESPONSE_INSTRUCTION)
}

/// Verdicts for `items` in order, plus the number of failed calls
async fn evaluate_ai(
    filter: &AiFilter,
    items: &[&PromptItem],
    context: &FilterContext,
) -> Result<(Vec<bool>, usize), PipelineError> {
    if items.is_empty() {
        return Ok((Vec::new(), 0));
    }
    let invoker = context.ai_invoker.as_deref().ok_or_else(|| {
        PipelineError::execution("AI filter requires an AI invoker")
    })?;
    let limiter = ConcurrencyLimiter::new(filter.parallel)?;
    let options = InvokeOptions::default()
        .with_model(filter.model.clone())
        .with_timeout(Some(filter.timeout));

    let tasks: Vec<_> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let prompt = build_filter_prompt(filter, item, &context.parameters);
            let options = &options;
            move || async move {
                let verdict =
                    match tokio::time::timeout(filter.timeout, invoker.invoke(&prompt, options))
                        .await
                    {
                        Err(_) => {
                            warn!(
                                "AI filter call for item {} timed out after {}ms",
                                index,
                                filter.timeout.as_millis()
                            );
                            None
                        }
                        Ok(result) => match result.into_result() {
                            Ok(response) => {
                                let verdict = parse_verdict(&response);
                                if verdict.is_none() {
                                    warn!("AI filter response for item {} has no boolean include", index);
                                }
                                verdict
                            }
                            Err(e) => {
                                warn!("AI filter call for item {} failed: {}", index, e);
                                None
                            }
                        },
                    };
                Ok::<_, CancellationError>(verdict)
            }
        })
        .collect();

    let verdicts = limiter.all(tasks, context.is_cancelled.as_ref()).await?;
    let failures = verdicts.iter().filter(|v| v.is_none()).count();
    Ok((
        verdicts.into_iter().map(|v| v.unwrap_or(false)).collect(),
        failures,
    ))
}

/// Split `items` into included and excluded, preserving order
pub async fn execute_filter(
    config: &FilterConfig,
    items: Vec<PromptItem>,
    context: &FilterContext,
) -> Result<FilterResult, PipelineError> {
    let start = Instant::now();
    let total_items = items.len();
    let mut ai_evaluated = 0;
    let mut ai_failures = 0;

    let keep: Vec<bool> = match config {
        FilterConfig::Rule(rule) => items.iter().map(|item| evaluate_rules(rule, item)).collect(),
        FilterConfig::Ai(ai) => {
            let refs: Vec<&PromptItem> = items.iter().collect();
            let (verdicts, failures) = evaluate_ai(ai, &refs, context).await?;
            ai_evaluated = refs.len();
            ai_failures = failures;
            verdicts
        }
        FilterConfig::Hybrid { rule, ai, combine } => {
            let rule_pass: Vec<bool> = items.iter().map(|item| evaluate_rules(rule, item)).collect();
            // `and` only needs the AI where the rules passed, `or` where they failed
            let needs_ai = |passed: bool| match combine {
                CombineMode::And => passed,
                CombineMode::Or => !passed,
            };
            let candidates: Vec<&PromptItem> = items
                .iter()
                .zip(&rule_pass)
                .filter(|(_, passed)| needs_ai(**passed))
                .map(|(item, _)| item)
                .collect();
            let (verdicts, failures) = evaluate_ai(ai, &candidates, context).await?;
            ai_evaluated = candidates.len();
            ai_failures = failures;

            let mut verdicts = verdicts.into_iter();
            rule_pass
                .into_iter()
                .map(|passed| {
                    if needs_ai(passed) {
                        verdicts.next().unwrap_or(false)
                    } else {
                        // `and` with failed rules, or `or` with passed rules
                        passed
                    }
                })
                .collect()
        }
    };

    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (item, keep) in items.into_iter().zip(keep) {
        if keep {
            included.push(item);
        } else {
            excluded.push(item);
        }
    }

    let stats = FilterStats {
        total_items,
        included_count: included.len(),
        excluded_count: excluded.len(),
        ai_evaluated,
        ai_failures,
        time_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Filter kept {} of {} items ({} AI calls, {} failed)",
        stats.included_count, total_items, ai_evaluated, ai_failures
    );
    debug!("Filter stats: {:?}", stats);
    Ok(FilterResult {
        included,
        excluded,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::DEFAULT_AI_FILTER_TIMEOUT;
    use crate::testing::MockAiInvoker;
    use regex::Regex;
    use std::time::Duration;

    fn item(pairs: &[(&str, &str)]) -> PromptItem {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn rule(field: &str, operator: FilterOperator) -> FilterRule {
        FilterRule {
            field: field.to_string(),
            operator,
        }
    }

    fn ai_filter(parallel: usize) -> AiFilter {
        AiFilter {
            prompt: "Keep {{title}}?".into(),
            model: None,
            parallel,
            timeout: DEFAULT_AI_FILTER_TIMEOUT,
        }
    }

    fn context(mock: MockAiInvoker) -> (FilterContext, Arc<MockAiInvoker>) {
        let mock = Arc::new(mock);
        let ctx = FilterContext {
            ai_invoker: Some(mock.clone()),
            ..FilterContext::default()
        };
        (ctx, mock)
    }

    #[test]
    fn test_string_operators() {
        let it = item(&[("status", "open"), ("title", "Login crash")]);
        assert!(rule_matches(&rule("status", FilterOperator::Equals("open".into())), &it));
        assert!(rule_matches(&rule("status", FilterOperator::NotEquals("closed".into())), &it));
        assert!(rule_matches(
            &rule("status", FilterOperator::In(vec!["new".into(), "open".into()])),
            &it
        ));
        assert!(!rule_matches(&rule("status", FilterOperator::NotIn(vec!["open".into()])), &it));
        assert!(rule_matches(&rule("title", FilterOperator::Contains("crash".into())), &it));
        assert!(rule_matches(&rule("title", FilterOperator::NotContains("typo".into())), &it));
        assert!(rule_matches(
            &rule("title", FilterOperator::Matches(Regex::new("^Login").unwrap())),
            &it
        ));
    }

    #[test]
    fn test_numeric_operators_and_missing_fields() {
        let it = item(&[("score", "7.5"), ("label", "high")]);
        assert!(rule_matches(&rule("score", FilterOperator::GreaterThan(7.0)), &it));
        assert!(rule_matches(&rule("score", FilterOperator::Lte(7.5)), &it));
        assert!(!rule_matches(&rule("score", FilterOperator::LessThan(7.5)), &it));
        assert!(rule_matches(&rule("score", FilterOperator::Gte(7.5)), &it));
        // Non-numeric values never satisfy numeric comparisons
        assert!(!rule_matches(&rule("label", FilterOperator::GreaterThan(0.0)), &it));
        assert!(!rule_matches(&rule("label", FilterOperator::LessThan(100.0)), &it));
        // Missing field reads as ""
        assert!(rule_matches(&rule("absent", FilterOperator::Equals(String::new())), &it));
        assert!(!rule_matches(&rule("absent", FilterOperator::Gte(0.0)), &it));
    }

    #[test]
    fn test_rule_modes() {
        let filter = |mode| RuleFilter {
            rules: vec![
                rule("a", FilterOperator::Equals("1".into())),
                rule("b", FilterOperator::Equals("1".into())),
            ],
            mode,
        };
        let it = item(&[("a", "1"), ("b", "2")]);
        assert!(!evaluate_rules(&filter(RuleMode::All), &it));
        assert!(evaluate_rules(&filter(RuleMode::Any), &it));
    }

    #[test]
    fn test_parse_verdict() {
        assert_eq!(parse_verdict(r#"{"include": true}"#), Some(true));
        assert_eq!(parse_verdict("Sure: ```json\n{\"include\": false, \"why\": \"x\"}\n```"), Some(false));
        assert_eq!(parse_verdict(r#"{"include": "yes"}"#), None);
        assert_eq!(parse_verdict("maybe"), None);
    }

    #[tokio::test]
    async fn test_rule_filter_preserves_order() {
        let config = FilterConfig::Rule(RuleFilter {
            rules: vec![rule("keep", FilterOperator::Equals("y".into()))],
            mode: RuleMode::All,
        });
        let items = vec![
            item(&[("id", "1"), ("keep", "y")]),
            item(&[("id", "2"), ("keep", "n")]),
            item(&[("id", "3"), ("keep", "y")]),
        ];
        let result = execute_filter(&config, items, &FilterContext::default()).await.unwrap();
        let ids: Vec<&str> = result.included.iter().map(|i| i["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(result.stats.excluded_count, 1);
        assert_eq!(result.stats.ai_evaluated, 0);
    }

    #[tokio::test]
    async fn test_ai_filter_failures_exclude_and_count() {
        let (ctx, mock) = context(
            MockAiInvoker::new()
                .with_response("alpha", r#"{"include": true}"#)
                .with_response("beta", r#"{"include": false}"#)
                .with_response("gamma", "no json here")
                .with_error("delta", "rate limited"),
        );
        let items = ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|t| item(&[("title", *t)]))
            .collect();
        let result = execute_filter(&FilterConfig::Ai(ai_filter(2)), items, &ctx)
            .await
            .unwrap();
        assert_eq!(result.included.len(), 1);
        assert_eq!(result.included[0]["title"], "alpha");
        assert_eq!(result.stats.ai_evaluated, 4);
        assert_eq!(result.stats.ai_failures, 2);
        assert!(mock.peak_concurrency() <= 2);
        assert!(mock.prompts()[0].contains("boolean \"include\""));
    }

    #[tokio::test]
    async fn test_ai_filter_timeout_excludes() {
        let (ctx, _) = context(
            MockAiInvoker::new()
                .with_default_response(r#"{"include": true}"#)
                .with_delay(Duration::from_millis(200)),
        );
        let mut filter = ai_filter(1);
        filter.timeout = Duration::from_millis(20);
        let result = execute_filter(&FilterConfig::Ai(filter), vec![item(&[("title", "x")])], &ctx)
            .await
            .unwrap();
        assert!(result.included.is_empty());
        assert_eq!(result.stats.ai_failures, 1);
    }

    #[tokio::test]
    async fn test_ai_filter_without_invoker_errors() {
        let result = execute_filter(
            &FilterConfig::Ai(ai_filter(1)),
            vec![item(&[("title", "x")])],
            &FilterContext::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hybrid_only_asks_ai_where_it_matters() {
        let hybrid = |combine| FilterConfig::Hybrid {
            rule: RuleFilter {
                rules: vec![rule("status", FilterOperator::Equals("open".into()))],
                mode: RuleMode::All,
            },
            ai: ai_filter(3),
            combine,
        };
        let items = || {
            vec![
                item(&[("title", "a"), ("status", "open")]),
                item(&[("title", "b"), ("status", "closed")]),
                item(&[("title", "c"), ("status", "open")]),
            ]
        };

        // AI admits only "c" and "b"
        let mock = || {
            MockAiInvoker::new()
                .with_default_response(r#"{"include": false}"#)
                .with_response("Keep c?", r#"{"include": true}"#)
                .with_response("Keep b?", r#"{"include": true}"#)
        };

        let (ctx, and_mock) = context(mock());
        let result = execute_filter(&hybrid(CombineMode::And), items(), &ctx).await.unwrap();
        let titles: Vec<&str> = result.included.iter().map(|i| i["title"].as_str()).collect();
        assert_eq!(titles, vec!["c"]);
        assert_eq!(and_mock.call_count(), 2);

        let (ctx, or_mock) = context(mock());
        let result = execute_filter(&hybrid(CombineMode::Or), items(), &ctx).await.unwrap();
        let titles: Vec<&str> = result.included.iter().map(|i| i["title"].as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
        assert_eq!(or_mock.call_count(), 1);
    }
}
