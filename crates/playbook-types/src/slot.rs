//! Tool slot mapping types.
//!
//! A slot is a stable logical capability name (e.g. `research.search`) that is
//! bound to a concrete tool per workspace, optionally narrowed to a project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binding of a slot to a concrete tool within a scope.
///
/// The triple (`workspace_id`, `project_id`, `slot`) is unique in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSlotMapping {
    pub id: Uuid,
    pub workspace_id: String,
    /// `None` means the mapping applies to the whole workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub slot: String,
    pub tool_id: String,
    /// Higher wins within one scope.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ToolSlotMapping {
    /// New enabled mapping with priority 0.
    pub fn new(
        workspace_id: impl Into<String>,
        project_id: Option<&str>,
        slot: impl Into<String>,
        tool_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workspace_id: workspace_id.into(),
            project_id: project_id.map(str::to_string),
            slot: slot.into(),
            tool_id: tool_id.into(),
            priority: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// The scope a resolution searched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotScope {
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl std::fmt::Display for SlotScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.project_id {
            Some(project) => write!(f, "workspace '{}' / project '{}'", self.workspace_id, project),
            None => write!(f, "workspace '{}'", self.workspace_id),
        }
    }
}

/// Which level of the cascade produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    ProjectMapping,
    WorkspaceMapping,
    RegisteredTool,
    PassThrough,
    /// The step named a concrete tool directly.
    Literal,
}

/// A slot resolved to a concrete tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTool {
    pub tool_id: String,
    pub source: ResolutionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<Uuid>,
}
