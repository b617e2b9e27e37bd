//! Playbook domain types.
//!
//! Defines the canonical representation of a playbook: an ordered list of
//! steps, each naming a tool (directly or through a logical slot), its inputs,
//! and how failures are handled. Loaders (files, databases, packages) convert
//! into `PlaybookDefinition`; the execution core only ever sees this struct.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::execution::ErrorKind;
use crate::policy::ToolPolicy;

// ---------------------------------------------------------------------------
// Playbook Definition
// ---------------------------------------------------------------------------

/// The canonical playbook definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookDefinition {
    /// UUIDv7 assigned by the loader.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Human-readable playbook name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Version string of the playbook content.
    #[serde(default = "default_version")]
    pub version: String,
    /// Ordered list of steps. Order only matters for event indices and
    /// result ordering; execution order comes from the dependency graph.
    pub steps: Vec<StepDefinition>,
    /// Extensible metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in a playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step ID, unique within a playbook (e.g. "fetch-issues").
    pub id: String,
    /// Display name. Defaults to the ID when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Concrete tool ID to invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Logical slot resolved to a concrete tool at execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_slot: Option<String>,
    /// Tool inputs. String values may contain `{{ ... }}` templates.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Workflow-level mappings (`$previous.<id>.outputs.<field>`, `$context.<key>`).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_mapping: HashMap<String, String>,
    /// Explicit dependencies in addition to the ones inferred from references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Optional condition; the step is skipped when it evaluates falsy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// What a failure of this step means for the rest of the run.
    #[serde(default)]
    pub on_error: ErrorStrategy,
    /// How the step interacts with a human operator.
    #[serde(default)]
    pub interaction: InteractionMode,
    /// Path to an array (`step.<id>[.field]` or `input.<name>`) to fan out over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<String>,
    /// Policy constraining the resolved tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ToolPolicy>,
    /// Per-attempt timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Declared output names picked from the tool result. Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

impl StepDefinition {
    /// Create a minimal step invoking a concrete tool.
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            tool: Some(tool.into()),
            tool_slot: None,
            inputs: Map::new(),
            input_mapping: HashMap::new(),
            depends_on: Vec::new(),
            condition: None,
            retry: RetryPolicy::default(),
            on_error: ErrorStrategy::default(),
            interaction: InteractionMode::default(),
            for_each: None,
            policy: None,
            timeout_secs: None,
            outputs: Vec::new(),
        }
    }

    /// Create a minimal step invoking a logical slot.
    pub fn with_slot(id: impl Into<String>, slot: impl Into<String>) -> Self {
        let mut step = Self::new(id, "");
        step.tool = None;
        step.tool_slot = Some(slot.into());
        step
    }

    /// Display name, falling back to the ID.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// The tool reference, if exactly one of `tool` / `tool_slot` is set.
    pub fn tool_ref(&self) -> Option<ToolRef<'_>> {
        match (self.tool.as_deref(), self.tool_slot.as_deref()) {
            (Some(id), None) if !id.trim().is_empty() => Some(ToolRef::Tool(id)),
            (None, Some(slot)) if !slot.trim().is_empty() => Some(ToolRef::Slot(slot)),
            _ => None,
        }
    }
}

/// A step's reference to the tool it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRef<'a> {
    /// Literal tool ID, used as-is.
    Tool(&'a str),
    /// Logical slot, resolved through the slot cascade.
    Slot(&'a str),
}

// ---------------------------------------------------------------------------
// Error handling strategy
// ---------------------------------------------------------------------------

/// Step-level failure strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Cancel every remaining pending step.
    #[default]
    StopWorkflow,
    /// Record the failure and keep going.
    ContinueOnError,
    /// Record the step as skipped and keep going.
    SkipStep,
    /// Retry per policy, then stop the run.
    RetryThenStop,
    /// Retry per policy, then keep going.
    RetryThenContinue,
}

impl ErrorStrategy {
    /// Whether the retry policy is consulted at all.
    pub fn retries(&self) -> bool {
        matches!(self, Self::RetryThenStop | Self::RetryThenContinue)
    }

    /// Whether a final failure cancels the rest of the run.
    pub fn stops_run(&self) -> bool {
        matches!(self, Self::StopWorkflow | Self::RetryThenStop)
    }
}

/// How a step interacts with a human operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Runs without operator involvement.
    #[default]
    Autonomous,
    /// Produces a preview before the write is applied.
    Preview,
    /// Requires explicit confirmation.
    Confirm,
}

impl InteractionMode {
    /// Whether this mode satisfies a preview-before-write requirement.
    pub fn previews_writes(&self) -> bool {
        matches!(self, Self::Preview | Self::Confirm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Preview => "preview",
            Self::Confirm => "confirm",
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry configuration for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default 0).
    #[serde(default)]
    pub max_retries: u32,
    /// Delay growth between retries.
    #[serde(default)]
    pub backoff: Backoff,
    /// Delay before the first retry in milliseconds (default 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds (default 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Error types that are never retried.
    #[serde(default = "default_non_retryable")]
    pub non_retryable: Vec<ErrorKind>,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_non_retryable() -> Vec<ErrorKind> {
    vec![ErrorKind::Validation, ErrorKind::Permission, ErrorKind::NotFound]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            non_retryable: default_non_retryable(),
        }
    }
}

/// Delay growth between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base * 2^(retry - 1)`, capped at `max_delay_ms`.
    #[default]
    Exponential,
    /// Always `base`.
    Fixed,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_defaults_from_minimal_json() {
        let step: StepDefinition = serde_json::from_value(json!({
            "id": "fetch",
            "tool": "github.list_issues"
        }))
        .unwrap();

        assert_eq!(step.display_name(), "fetch");
        assert_eq!(step.on_error, ErrorStrategy::StopWorkflow);
        assert_eq!(step.interaction, InteractionMode::Autonomous);
        assert_eq!(step.retry.max_retries, 0);
        assert_eq!(step.retry.base_delay_ms, 1_000);
        assert!(step.retry.non_retryable.contains(&ErrorKind::Validation));
        assert_eq!(step.tool_ref(), Some(ToolRef::Tool("github.list_issues")));
    }

    #[test]
    fn tool_ref_requires_exactly_one() {
        let mut step = StepDefinition::new("a", "x.y");
        step.tool_slot = Some("research.search".to_string());
        assert_eq!(step.tool_ref(), None);

        step.tool = None;
        assert_eq!(step.tool_ref(), Some(ToolRef::Slot("research.search")));

        step.tool_slot = Some("   ".to_string());
        assert_eq!(step.tool_ref(), None);
    }

    #[test]
    fn error_strategy_semantics() {
        assert!(ErrorStrategy::StopWorkflow.stops_run());
        assert!(!ErrorStrategy::StopWorkflow.retries());
        assert!(ErrorStrategy::RetryThenStop.stops_run());
        assert!(ErrorStrategy::RetryThenStop.retries());
        assert!(!ErrorStrategy::RetryThenContinue.stops_run());
        assert!(!ErrorStrategy::SkipStep.retries());
    }

    #[test]
    fn playbook_yaml_parses_with_defaults() {
        let yaml = r#"
name: triage
steps:
  - id: fetch
    tool_slot: issues.list
    on_error: retry_then_continue
    retry:
      max_retries: 2
      backoff: fixed
  - id: label
    tool: github.add_label
    for_each: step.fetch.issues
    inputs:
      number: "{{ item.number }}"
"#;
        let def: PlaybookDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(def.version, "1.0.0");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].on_error, ErrorStrategy::RetryThenContinue);
        assert_eq!(def.steps[0].retry.backoff, Backoff::Fixed);
        assert_eq!(def.steps[1].for_each.as_deref(), Some("step.fetch.issues"));
    }
}
