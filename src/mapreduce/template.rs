//! Prompt template engine
//!
//! Resolves `{{identifier}}` placeholders against item fields, pipeline
//! parameters and phase-specific reserved variables.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;
use thiserror::Error;

/// Whole batch as a JSON array (map stage, `batchSize > 1`)
pub const ITEMS: &str = "ITEMS";
/// JSON array of successful map outputs (reduce stage)
pub const RESULTS: &str = "RESULTS";
/// Path of a temp file holding the results (reduce stage)
pub const RESULTS_FILE: &str = "RESULTS_FILE";
pub const COUNT: &str = "COUNT";
pub const SUCCESS_COUNT: &str = "SUCCESS_COUNT";
pub const FAILURE_COUNT: &str = "FAILURE_COUNT";

pub const RESERVED_VARIABLES: [&str; 6] = [
    ITEMS,
    RESULTS,
    RESULTS_FILE,
    COUNT,
    SUCCESS_COUNT,
    FAILURE_COUNT,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Template references variables with no value: {}", .missing.join(", "))]
    MissingVariables { missing: Vec<String> },

    #[error("batchSize is {batch_size} but the prompt does not contain {{{{ITEMS}}}}")]
    MissingItemsVariable { batch_size: usize },
}

fn variable_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("Invalid regex pattern"))
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_VARIABLES.contains(&name)
}

/// Unique variable names in order of first appearance
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    variable_regex()
        .captures_iter(template)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

pub fn contains_variable(template: &str, name: &str) -> bool {
    extract_variables(template).iter().any(|v| v == name)
}

/// Render a value the way it appears inside a prompt
pub fn value_to_prompt_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Variable sources consulted when rendering, highest precedence first
#[derive(Debug, Default, Clone)]
pub struct TemplateContext<'a> {
    pub item: Option<&'a BTreeMap<String, String>>,
    pub parameters: Option<&'a HashMap<String, String>>,
    pub reserved: HashMap<&'static str, String>,
}

impl<'a> TemplateContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: &'a BTreeMap<String, String>) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_parameters(mut self, parameters: &'a HashMap<String, String>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_reserved(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.reserved.insert(name, value.into());
        self
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.reserved.get(name) {
            return Some(value);
        }
        self.item
            .and_then(|item| item.get(name))
            .or_else(|| self.parameters.and_then(|params| params.get(name)))
            .map(String::as_str)
    }
}

/// Substitute every resolvable placeholder; unresolved ones are left intact
pub fn render(template: &str, context: &TemplateContext<'_>) -> String {
    variable_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match context.lookup(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Like [`render`], but fails if any placeholder cannot be resolved
pub fn render_strict(template: &str, context: &TemplateContext<'_>) -> Result<String, TemplateError> {
    let missing: Vec<String> = extract_variables(template)
        .into_iter()
        .filter(|name| context.lookup(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::MissingVariables { missing });
    }
    Ok(render(template, context))
}

/// Check that every non-reserved variable resolves for every item
///
/// A variable is satisfied by a pipeline parameter or by a field present on
/// each item. Runs before execution so that a typo fails the whole run up
/// front instead of producing a prompt per item with a dangling placeholder.
pub fn validate_template(
    template: &str,
    items: &[BTreeMap<String, String>],
    parameters: &HashMap<String, String>,
) -> Result<(), TemplateError> {
    let missing: Vec<String> = extract_variables(template)
        .into_iter()
        .filter(|name| !is_reserved(name) && !parameters.contains_key(name))
        .filter(|name| items.iter().any(|item| !item.contains_key(name)))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::MissingVariables { missing })
    }
}

/// Batched map prompts must reference the whole batch
pub fn validate_batch_template(template: &str, batch_size: usize) -> Result<(), TemplateError> {
    if batch_size > 1 && !contains_variable(template, ITEMS) {
        return Err(TemplateError::MissingItemsVariable { batch_size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_variables_unique_in_order() {
        let vars = extract_variables("{{b}} and {{a}} then {{b}} {{ not_a_var }}");
        assert_eq!(vars, vec!["b", "a"]);
    }

    #[test]
    fn test_item_fields_win_over_parameters() {
        let row = item(&[("title", "Crash on save")]);
        let params = params(&[("title", "ignored"), ("project", "editor")]);
        let ctx = TemplateContext::new().with_item(&row).with_parameters(&params);

        assert_eq!(
            render("{{project}}: {{title}}", &ctx),
            "editor: Crash on save"
        );
    }

    #[test]
    fn test_unresolved_left_intact() {
        let ctx = TemplateContext::new();
        assert_eq!(render("Summarize {{RESULTS}}", &ctx), "Summarize {{RESULTS}}");
    }

    #[test]
    fn test_reserved_values_substituted_verbatim() {
        let ctx = TemplateContext::new().with_reserved(RESULTS, r#"["a$1","\\n"]"#);
        assert_eq!(render("R={{RESULTS}}", &ctx), r#"R=["a$1","\\n"]"#);
    }

    #[test]
    fn test_render_strict_reports_missing() {
        let row = item(&[("title", "x")]);
        let ctx = TemplateContext::new().with_item(&row);
        let err = render_strict("{{title}} {{body}}", &ctx).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingVariables {
                missing: vec!["body".to_string()]
            }
        );
    }

    #[test]
    fn test_validate_template_requires_field_on_every_item() {
        let items = vec![
            item(&[("title", "a"), ("description", "b")]),
            item(&[("title", "c")]),
        ];
        let params = HashMap::new();

        assert!(validate_template("{{title}}", &items, &params).is_ok());
        let err = validate_template("{{title}} {{description}}", &items, &params).unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_validate_template_ignores_reserved_and_parameters() {
        let items = vec![item(&[("title", "a")])];
        let params = params(&[("lang", "en")]);
        assert!(validate_template("{{title}} {{lang}} {{ITEMS}} {{COUNT}}", &items, &params).is_ok());
    }

    #[test]
    fn test_batch_template_requires_items() {
        assert!(validate_batch_template("Classify {{title}}", 1).is_ok());
        assert_eq!(
            validate_batch_template("Classify {{title}}", 5),
            Err(TemplateError::MissingItemsVariable { batch_size: 5 })
        );
        assert!(validate_batch_template("Classify these: {{ITEMS}}", 5).is_ok());
    }

    #[test]
    fn test_value_to_prompt_string() {
        assert_eq!(value_to_prompt_string(&Value::String("x".into())), "x");
        assert_eq!(value_to_prompt_string(&serde_json::json!(3)), "3");
        assert_eq!(value_to_prompt_string(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
    }
}
