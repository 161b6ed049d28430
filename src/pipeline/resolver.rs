//! Resolution of prompt files, skills and parameter overrides
//!
//! Skills are markdown instruction files prepended to the map prompt. A
//! skill named `review` is looked up as `<skills_dir>/review/SKILL.md` and
//! then `<skills_dir>/review.md`; YAML front matter is stripped.

use super::config::{PipelineConfig, PromptSource};
use crate::error::{helpers::file_not_found, ErrorCode, PipelineError};
use crate::mapreduce::template;
use gray_matter::engine::YAML;
use gray_matter::Matter;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub skills_dir: PathBuf,
    /// CLI `--param` values; these win over `input.parameters`
    pub parameter_overrides: HashMap<String, String>,
}

/// Prompt text and parameters ready for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPipeline {
    pub map_prompt: String,
    pub reduce_prompt: Option<String>,
    pub parameters: HashMap<String, String>,
}

pub fn load_prompt(source: &PromptSource) -> Result<String, PipelineError> {
    match source {
        PromptSource::Inline(text) => Ok(text.clone()),
        PromptSource::File(path) => {
            if !path.exists() {
                return Err(file_not_found(path, "Prompt file"));
            }
            debug!("Loading prompt from {}", path.display());
            Ok(std::fs::read_to_string(path)?)
        }
    }
}

/// Body of a skill file without its front matter
pub fn load_skill(skills_dir: &Path, name: &str) -> Result<String, PipelineError> {
    let candidates = [
        skills_dir.join(name).join("SKILL.md"),
        skills_dir.join(format!("{}.md", name)),
    ];
    let path = candidates.iter().find(|p| p.is_file()).ok_or_else(|| {
        PipelineError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_VALUE,
            "map.skill",
            format!("Skill '{}' not found in {}", name, skills_dir.display()),
        )
    })?;
    let raw = std::fs::read_to_string(path)?;
    let parsed = Matter::<YAML>::new().parse::<Value>(&raw).map_err(|e| {
        PipelineError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_VALUE,
            "map.skill",
            format!("Invalid front matter in {}: {}", path.display(), e),
        )
    })?;
    Ok(parsed.content.trim().to_string())
}

/// Parse a `name=value` override
pub fn parse_parameter_override(raw: &str) -> Result<(String, String), PipelineError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(PipelineError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_VALUE,
            "parameters",
            format!("Expected name=value, got '{}'", raw),
        )),
    }
}

pub fn resolve_pipeline(
    config: &PipelineConfig,
    options: &ResolveOptions,
) -> Result<ResolvedPipeline, PipelineError> {
    let mut map_prompt = load_prompt(&config.map.prompt)?;
    template::validate_batch_template(&map_prompt, config.map.batch_size).map_err(|e| {
        PipelineError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_VALUE,
            "map.batchSize",
            e.to_string(),
        )
    })?;

    if let Some(skill) = &config.map.skill {
        let instructions = load_skill(&options.skills_dir, skill)?;
        map_prompt = format!("{}\n\n{}", instructions, map_prompt);
    }

    let reduce_prompt = config
        .reduce
        .ai
        .as_ref()
        .map(|ai| load_prompt(&ai.prompt))
        .transpose()?;

    let mut parameters = config.input.parameters.clone();
    parameters.extend(options.parameter_overrides.clone());

    Ok(ResolvedPipeline {
        map_prompt,
        reduce_prompt,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::parse_pipeline;
    use crate::testing::TestContext;

    #[test]
    fn test_prompt_file_relative_to_pipeline_and_skill_prepended() {
        let ctx = TestContext::new().unwrap();
        ctx.write_file("prompts/map.md", "Review {{file}}").unwrap();
        ctx.write_file(
            "skills/security/SKILL.md",
            "---\nname: security\n---\n\nLook for injection bugs.\n",
        )
        .unwrap();
        let config = parse_pipeline(
            "name: x\ninput: { items: [] }\nmap: { promptFile: prompts/map.md, skill: security }\nreduce: { type: list }\n",
            ctx.path(),
        )
        .unwrap();

        let resolved = resolve_pipeline(
            &config,
            &ResolveOptions {
                skills_dir: ctx.path().join("skills"),
                ..ResolveOptions::default()
            },
        )
        .unwrap();
        assert_eq!(resolved.map_prompt, "Look for injection bugs.\n\nReview {{file}}");
        assert!(resolved.reduce_prompt.is_none());
    }

    #[test]
    fn test_flat_skill_file_and_missing_skill() {
        let ctx = TestContext::new().unwrap();
        ctx.write_file("style.md", "Be terse.").unwrap();
        assert_eq!(load_skill(ctx.path(), "style").unwrap(), "Be terse.");

        let err = load_skill(ctx.path(), "absent").unwrap_err();
        assert_eq!(err.field(), Some("map.skill"));
    }

    #[test]
    fn test_skill_front_matter_with_nested_yaml_stripped() {
        let ctx = TestContext::new().unwrap();
        ctx.write_file(
            "review/SKILL.md",
            "---\nname: review\ndescription: \"Checks: style, naming\"\ntags:\n  - lint\n---\nFlag unclear names.\n\nKeep it short.\n",
        )
        .unwrap();
        assert_eq!(
            load_skill(ctx.path(), "review").unwrap(),
            "Flag unclear names.\n\nKeep it short."
        );
    }

    #[test]
    fn test_batch_prompt_file_checked() {
        let ctx = TestContext::new().unwrap();
        ctx.write_file("map.md", "Rate {{title}}").unwrap();
        let config = parse_pipeline(
            "name: x\ninput: { items: [] }\nmap: { promptFile: map.md, batchSize: 2 }\nreduce: { type: list }\n",
            ctx.path(),
        )
        .unwrap();
        let err = resolve_pipeline(&config, &ResolveOptions::default()).unwrap_err();
        assert_eq!(err.field(), Some("map.batchSize"));
    }

    #[test]
    fn test_parameter_overrides_win() {
        let config = parse_pipeline(
            "name: x\ninput: { items: [], parameters: [{ name: tone, value: formal }, { name: lang, value: en }] }\nmap: { prompt: p }\nreduce: { type: ai, prompt: \"Sum {{RESULTS}}\" }\n",
            Path::new("."),
        )
        .unwrap();
        let options = ResolveOptions {
            parameter_overrides: [("tone".to_string(), "casual".to_string())].into(),
            ..ResolveOptions::default()
        };
        let resolved = resolve_pipeline(&config, &options).unwrap();
        assert_eq!(resolved.parameters["tone"], "casual");
        assert_eq!(resolved.parameters["lang"], "en");
        assert_eq!(resolved.reduce_prompt.as_deref(), Some("Sum {{RESULTS}}"));
    }

    #[test]
    fn test_parse_parameter_override() {
        assert_eq!(
            parse_parameter_override("team=core=infra").unwrap(),
            ("team".to_string(), "core=infra".to_string())
        );
        assert!(parse_parameter_override("novalue").is_err());
        assert!(parse_parameter_override("=x").is_err());
    }
}
