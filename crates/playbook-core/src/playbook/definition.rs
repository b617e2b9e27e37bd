//! Playbook definition parsing and load-time validation.
//!
//! Converts YAML/JSON into the canonical `PlaybookDefinition` and validates
//! structural constraints before anything runs: unique step IDs, exactly one
//! tool reference per step, well-formed `for_each` roots and conditions,
//! known explicit dependencies and an acyclic dependency graph.

use std::collections::HashSet;
use std::path::Path;

use playbook_types::playbook::PlaybookDefinition;
use thiserror::Error;

use super::dag::DependencyGraph;
use super::expression::Condition;
use super::loop_handler::ForEachSource;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Configuration errors detected before any step runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybookError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Dependency graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A step references a producer that is neither a step nor upstream.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// `for_each` path has an unsupported root.
    #[error("step '{step_id}' has invalid for_each: {reason}")]
    InvalidForEach { step_id: String, reason: String },

    /// Step names neither or both of `tool` and `tool_slot`.
    #[error("step '{0}' must set exactly one of 'tool' or 'tool_slot'")]
    MissingTool(String),

    /// Condition does not parse.
    #[error("step '{step_id}' has invalid condition: {reason}")]
    InvalidCondition { step_id: String, reason: String },

    /// An `input.` `for_each` path did not resolve to an array.
    #[error("step '{step_id}' for_each '{path}' did not resolve to an array")]
    NotAnArray { step_id: String, path: String },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `PlaybookDefinition`.
pub fn parse_playbook_yaml(yaml: &str) -> Result<PlaybookDefinition, PlaybookError> {
    let def: PlaybookDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| PlaybookError::Parse(e.to_string()))?;
    validate_playbook(&def)?;
    Ok(def)
}

/// Parse a JSON string into a validated `PlaybookDefinition`.
pub fn parse_playbook_json(json: &str) -> Result<PlaybookDefinition, PlaybookError> {
    let def: PlaybookDefinition =
        serde_json::from_str(json).map_err(|e| PlaybookError::Parse(e.to_string()))?;
    validate_playbook(&def)?;
    Ok(def)
}

/// Serialize a `PlaybookDefinition` to a YAML string.
pub fn serialize_playbook_yaml(def: &PlaybookDefinition) -> Result<String, PlaybookError> {
    serde_yaml_ng::to_string(def).map_err(|e| PlaybookError::Parse(e.to_string()))
}

/// Load a playbook file. `.json` files parse as JSON, everything else as YAML.
pub fn load_playbook_file(path: &Path) -> Result<PlaybookDefinition, PlaybookError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PlaybookError::Parse(format!("{}: {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_playbook_json(&content),
        _ => parse_playbook_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `PlaybookDefinition`.
///
/// Checks:
/// - Name is non-empty and at least one step exists
/// - Step IDs are non-empty and unique
/// - Each step sets exactly one of `tool` / `tool_slot`
/// - `for_each` roots are `input.` or `step.`
/// - Conditions parse
/// - `depends_on` entries name existing steps
/// - The inferred dependency graph is acyclic
///
/// References to producers outside the plan are allowed here; they are
/// checked against the upstream outputs when a run starts.
pub fn validate_playbook(def: &PlaybookDefinition) -> Result<(), PlaybookError> {
    if def.name.trim().is_empty() {
        return Err(PlaybookError::Validation(
            "playbook name must not be empty".to_string(),
        ));
    }
    if def.steps.is_empty() {
        return Err(PlaybookError::Validation(
            "playbook must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.id.trim().is_empty() {
            return Err(PlaybookError::Validation(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(PlaybookError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    for step in &def.steps {
        if step.tool_ref().is_none() {
            return Err(PlaybookError::MissingTool(step.id.clone()));
        }

        if let Some(path) = &step.for_each
            && ForEachSource::parse(path).is_none()
        {
            return Err(PlaybookError::InvalidForEach {
                step_id: step.id.clone(),
                reason: format!("'{path}' must start with 'input.' or 'step.<id>'"),
            });
        }

        if let Some(condition) = &step.condition {
            Condition::parse(condition).map_err(|e| PlaybookError::InvalidCondition {
                step_id: step.id.clone(),
                reason: e.to_string(),
            })?;
        }

        for dep in &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                return Err(PlaybookError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    DependencyGraph::build(&def.steps).check_acyclic(&def.steps)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use playbook_types::playbook::{ErrorStrategy, StepDefinition};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn playbook(steps: Vec<StepDefinition>) -> PlaybookDefinition {
        PlaybookDefinition {
            id: Uuid::now_v7(),
            name: "triage".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            steps,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn parse_yaml_roundtrip() {
        let yaml = r#"
name: issue-triage
steps:
  - id: fetch
    tool_slot: issues.list
    inputs:
      repo: "{{ input.repo }}"
    outputs: [issues]
  - id: label
    tool: github.add_label
    for_each: step.fetch.issues
    on_error: retry_then_continue
    retry:
      max_retries: 2
      backoff: fixed
    inputs:
      number: "{{ item.number }}"
"#;
        let def = parse_playbook_yaml(yaml).expect("should parse");
        assert_eq!(def.name, "issue-triage");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[1].on_error, ErrorStrategy::RetryThenContinue);
        assert_eq!(def.steps[1].retry.max_retries, 2);
        assert_eq!(def.steps[1].retry.base_delay_ms, 1_000);

        let yaml2 = serialize_playbook_yaml(&def).expect("should serialize");
        let def2 = parse_playbook_yaml(&yaml2).expect("should re-parse");
        assert_eq!(def2.steps.len(), 2);
        assert_eq!(def2.steps[1].for_each.as_deref(), Some("step.fetch.issues"));
    }

    #[test]
    fn parse_json() {
        let json = r#"{"name":"p","steps":[{"id":"a","tool":"fs.read","inputs":{"path":"/tmp"}}]}"#;
        let def = parse_playbook_json(json).unwrap();
        assert_eq!(def.steps[0].inputs["path"], "/tmp");
        assert!(matches!(parse_playbook_json("{"), Err(PlaybookError::Parse(_))));
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let def = playbook(vec![StepDefinition::new("a", "x.y"), StepDefinition::new("a", "x.y")]);
        let msg = validate_playbook(&def).unwrap_err().to_string();
        assert!(msg.contains("duplicate step ID"), "got: {msg}");
    }

    #[test]
    fn rejects_empty_playbook() {
        let msg = validate_playbook(&playbook(vec![])).unwrap_err().to_string();
        assert!(msg.contains("at least one step"), "got: {msg}");
    }

    #[test]
    fn rejects_missing_or_double_tool() {
        let mut both = StepDefinition::new("a", "x.y");
        both.tool_slot = Some("slot".into());
        assert_eq!(
            validate_playbook(&playbook(vec![both])).unwrap_err(),
            PlaybookError::MissingTool("a".into())
        );

        let mut neither = StepDefinition::new("a", "x.y");
        neither.tool = None;
        assert!(matches!(
            validate_playbook(&playbook(vec![neither])),
            Err(PlaybookError::MissingTool(_))
        ));
    }

    #[test]
    fn rejects_unknown_explicit_dependency() {
        let mut step = StepDefinition::new("a", "x.y");
        step.depends_on = vec!["ghost".into()];
        let msg = validate_playbook(&playbook(vec![step])).unwrap_err().to_string();
        assert!(msg.contains("unknown step 'ghost'"), "got: {msg}");
    }

    #[test]
    fn allows_external_references() {
        let mut step = StepDefinition::new("a", "x.y");
        step.input_mapping.insert("t".into(), "$previous.brief.outputs.topic".into());
        assert!(validate_playbook(&playbook(vec![step])).is_ok());
    }

    #[test]
    fn rejects_bad_for_each_root() {
        let mut step = StepDefinition::new("a", "x.y");
        step.for_each = Some("context.items".into());
        assert!(matches!(
            validate_playbook(&playbook(vec![step])),
            Err(PlaybookError::InvalidForEach { .. })
        ));
    }

    #[test]
    fn rejects_bad_condition() {
        let mut step = StepDefinition::new("a", "x.y");
        step.condition = Some("input.x ==".into());
        assert!(matches!(
            validate_playbook(&playbook(vec![step])),
            Err(PlaybookError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn rejects_cycle() {
        let mut a = StepDefinition::new("a", "x.y");
        a.depends_on = vec!["b".into()];
        let mut b = StepDefinition::new("b", "x.y");
        b.inputs.insert("v".into(), "previous.a.outputs.v".into());
        assert!(matches!(
            validate_playbook(&playbook(vec![a, b])),
            Err(PlaybookError::CycleDetected(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, r#"{"name":"p","steps":[{"id":"a","tool":"fs.read"}]}"#).unwrap();
        let def = load_playbook_file(&path).unwrap();
        assert_eq!(def.name, "p");

        let missing = load_playbook_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(missing, PlaybookError::Parse(_)));
    }
}
