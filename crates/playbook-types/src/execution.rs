//! Execution result types: step status, classified errors, run status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Fixed taxonomy that tool-boundary errors are classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    RateLimit,
    NotFound,
    Permission,
    Validation,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::NotFound => "not_found",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Terminal status of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

/// Structured error attached to a failed (or error-skipped) step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepErrorInfo {
    /// Human-readable error text.
    pub message: String,
    /// Classified error type.
    pub error_type: ErrorKind,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Whether the retry budget was used up.
    pub retries_exhausted: bool,
}

/// Result of one step in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    /// Position of the step in the playbook.
    pub index: usize,
    pub status: StepStatus,
    /// Declared outputs. For `for_each` steps: `results`, `count`, `success_count`.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepErrorInfo>,
    /// Why the step was skipped (condition false, cancelled, error skipped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// The concrete tool the step ran, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Total tool invocations (summed over loop iterations).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// A skipped result that never ran.
    pub fn skipped(step_id: &str, index: usize, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.to_string(),
            index,
            status: StepStatus::Skipped,
            outputs: Map::new(),
            error: None,
            skip_reason: Some(reason.into()),
            tool_id: None,
            attempts: 0,
            started_at: Some(now),
            completed_at: Some(now),
        }
    }

    /// Whether downstream steps may treat this step as done.
    pub fn settles_dependents(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Skipped)
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Overall status of a playbook run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step reached a terminal status and no stop strategy fired.
    Completed,
    /// A stop strategy fired or the run could not make progress.
    Failed,
    /// Cancelled from outside.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_value(ErrorKind::RateLimit).unwrap(), json!("rate_limit"));
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        let kind: ErrorKind = serde_json::from_value(json!("timeout")).unwrap();
        assert_eq!(kind, ErrorKind::Timeout);
    }

    #[test]
    fn skipped_result_settles_dependents() {
        let r = StepResult::skipped("a", 0, "condition evaluated false");
        assert_eq!(r.status, StepStatus::Skipped);
        assert!(r.settles_dependents());
        assert!(r.outputs.is_empty());
        assert_eq!(r.skip_reason.as_deref(), Some("condition evaluated false"));
    }
}
