use super::{sanitize_id, Splitter};
use crate::error::{ErrorExt, PipelineError};
use crate::mapreduce::types::WorkItem;
use gray_matter::engine::YAML;
use gray_matter::Matter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

type RulePredicate = Box<dyn Fn(&Rule) -> bool + Send + Sync>;

/// A named rule definition applied against shared target content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Explicit id; derived from the filename when absent
    #[serde(default)]
    pub id: Option<String>,
    pub filename: String,
    pub path: PathBuf,
    pub content: String,
    #[serde(default)]
    pub front_matter: Option<Map<String, Value>>,
}

impl Rule {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            id: None,
            path: PathBuf::from(&filename),
            filename,
            content: content.into(),
            front_matter: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    pub rules: Vec<Rule>,
    pub target_content: String,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleWorkItemData {
    pub rule_id: String,
    pub rule_filename: String,
    pub rule_path: PathBuf,
    pub rule_content: String,
    pub front_matter: Option<Map<String, Value>>,
    pub target_content: String,
    pub context: Option<Value>,
}

/// One work item per rule, each carrying the shared target content
#[derive(Default)]
pub struct RuleSplitter {
    filter: Option<RulePredicate>,
    validate: Option<RulePredicate>,
    sorted: bool,
}

impl RuleSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules ordered by filename instead of input order
    pub fn sorted() -> Self {
        Self {
            sorted: true,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Rule) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Rules failing validation are skipped with a warning
    pub fn with_validator(
        mut self,
        validate: impl Fn(&Rule) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Box::new(validate));
        self
    }

    fn selected<'a>(&self, rules: &'a [Rule]) -> Vec<&'a Rule> {
        let mut selected: Vec<&Rule> = rules
            .iter()
            .filter(|rule| self.filter.as_ref().is_none_or(|f| f(rule)))
            .filter(|rule| {
                let valid = self.validate.as_ref().is_none_or(|v| v(rule));
                if !valid {
                    warn!("Skipping invalid rule {}", rule.filename);
                }
                valid
            })
            .collect();
        if self.sorted {
            selected.sort_by(|a, b| a.filename.cmp(&b.filename));
        }
        selected
    }
}

fn derived_id(rule: &Rule) -> String {
    if let Some(id) = rule.id.as_deref().filter(|id| !id.trim().is_empty()) {
        return id.to_string();
    }
    let stem = Path::new(&rule.filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rule.filename.clone());
    format!("rule-{}", sanitize_id(&stem))
}

impl Splitter<RuleInput, RuleWorkItemData> for RuleSplitter {
    fn split(&self, input: &RuleInput) -> Vec<WorkItem<RuleWorkItemData>> {
        let rules = self.selected(&input.rules);
        let total = rules.len();
        let mut seen = HashSet::new();

        rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| {
                let mut id = derived_id(rule);
                if !seen.insert(id.clone()) {
                    id = format!("{}-{}", id, index);
                    seen.insert(id.clone());
                }
                WorkItem::new(
                    id.clone(),
                    RuleWorkItemData {
                        rule_id: id,
                        rule_filename: rule.filename.clone(),
                        rule_path: rule.path.clone(),
                        rule_content: rule.content.clone(),
                        front_matter: rule.front_matter.clone(),
                        target_content: input.target_content.clone(),
                        context: input.context.clone(),
                    },
                )
                .with_metadata("index", index)
                .with_metadata("totalRules", total)
                .with_metadata("filename", rule.filename.clone())
            })
            .collect()
    }
}

/// Parse a rule file body, extracting YAML front matter when present
///
/// An `id` key in the front matter becomes the rule id.
pub fn parse_rule_file(path: &Path, raw: &str) -> Result<Rule, PipelineError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let parsed = Matter::<YAML>::new()
        .parse::<Value>(raw)
        .map_err(|e| {
            PipelineError::validation(
                "frontMatter",
                format!("Invalid front matter in {}: {}", path.display(), e),
            )
        })?;
    let front_matter = match parsed.data {
        Some(Value::Object(map)) => Some(map),
        None | Some(Value::Null) => None,
        Some(_) => {
            return Err(PipelineError::validation(
                "frontMatter",
                format!("Front matter in {} must be a mapping", path.display()),
            ))
        }
    };
    let content = parsed.content;

    let id = front_matter
        .as_ref()
        .and_then(|fm| fm.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Rule {
        id,
        filename,
        path: path.to_path_buf(),
        content: content.trim_start_matches(['\r', '\n']).to_string(),
        front_matter,
    })
}

/// Load every `*.md` file under `dir` as a rule, ordered by path
pub fn load_rules_from_dir(dir: impl AsRef<Path>) -> Result<Vec<Rule>, PipelineError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(crate::error::helpers::file_not_found(dir, "Rules directory"));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let rules = paths
        .iter()
        .map(|path| {
            let raw = fs::read_to_string(path)
                .to_storage_error(format!("Failed to read rule file {}", path.display()))?;
            parse_rule_file(path, &raw)
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Loaded {} rules from {}", rules.len(), dir.display());
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn input(rules: Vec<Rule>) -> RuleInput {
        RuleInput {
            rules,
            target_content: "fn main() {}".to_string(),
            context: None,
        }
    }

    #[test]
    fn test_ids_derived_from_filenames_and_deduplicated() {
        let items = RuleSplitter::new().split(&input(vec![
            Rule::new("No Unwrap.md", "avoid unwrap"),
            Rule::new("no_unwrap.md", "again"),
            Rule {
                id: Some("custom".into()),
                ..Rule::new("x.md", "x")
            },
        ]));

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["rule-no-unwrap", "rule-no-unwrap-1", "custom"]);
        assert!(items
            .iter()
            .all(|i| i.data.target_content == "fn main() {}"));
        assert_eq!(items[1].metadata["totalRules"], json!(3));
    }

    #[test]
    fn test_sorted_filter_and_validate() {
        let splitter = RuleSplitter::sorted()
            .with_filter(|r| !r.filename.starts_with("draft"))
            .with_validator(|r| !r.content.is_empty());
        let items = splitter.split(&input(vec![
            Rule::new("zeta.md", "z"),
            Rule::new("draft-beta.md", "b"),
            Rule::new("empty.md", ""),
            Rule::new("alpha.md", "a"),
        ]));

        let names: Vec<&str> = items.iter().map(|i| i.data.rule_filename.as_str()).collect();
        assert_eq!(names, vec!["alpha.md", "zeta.md"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(RuleSplitter::new().split(&RuleInput::default()).is_empty());
    }

    #[test]
    fn test_parse_rule_file_front_matter() {
        let raw = "---\nid: naming\nseverity: high\n---\n\nUse snake_case.\n";
        let rule = parse_rule_file(Path::new("rules/naming.md"), raw).unwrap();

        assert_eq!(rule.id.as_deref(), Some("naming"));
        assert_eq!(rule.filename, "naming.md");
        assert_eq!(rule.content.trim_end(), "Use snake_case.");
        assert_eq!(
            rule.front_matter.unwrap().get("severity"),
            Some(&json!("high"))
        );
    }

    #[test]
    fn test_parse_rule_file_without_front_matter() {
        let rule = parse_rule_file(Path::new("plain.md"), "Just text").unwrap();
        assert!(rule.front_matter.is_none());
        assert_eq!(rule.content, "Just text");
    }

    #[test]
    fn test_parse_rule_file_rejects_scalar_front_matter() {
        let err = parse_rule_file(Path::new("bad.md"), "---\njust a string\n---\nbody").unwrap_err();
        assert_eq!(err.field(), Some("frontMatter"));
    }

    #[test]
    fn test_load_rules_from_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.md"), "B rule").unwrap();
        fs::write(dir.path().join("nested/a.md"), "---\nid: a\n---\nA rule").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let rules = load_rules_from_dir(dir.path()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].filename, "b.md");
        assert_eq!(rules[1].id.as_deref(), Some("a"));
    }

    #[test]
    fn test_load_rules_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(load_rules_from_dir(dir.path().join("missing")).is_err());
    }
}
