//! Tool slot resolution.
//!
//! A step may name a logical slot (`research.search`) instead of a concrete
//! tool. Resolution walks a fixed cascade, highest priority first:
//!
//! 1. enabled mapping scoped to the (workspace, project) pair
//! 2. enabled mapping scoped to the workspace alone
//! 3. a registered tool whose ID equals the slot
//! 4. pass-through when the slot already looks like a concrete tool ID
//!
//! Within one scope, enabled mappings tie-break by priority (descending)
//! and then by `created_at` (most recent first).

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use playbook_types::error::RepositoryError;
use playbook_types::slot::{ResolutionSource, ResolvedTool, SlotScope, ToolSlotMapping};
use thiserror::Error;

use super::registry::ToolRegistry;
use crate::repository::slot::SlotMappingRepository;

/// Errors from slot resolution.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error(
        "no tool mapped to slot '{slot}' in {scope}{}",
        remediation(.configured, .suggestions)
    )]
    NotFound {
        slot: String,
        scope: SlotScope,
        /// Every slot configured in the searched scopes.
        configured: Vec<String>,
        /// Configured slots sharing the leading or trailing segment.
        suggestions: Vec<String>,
    },

    #[error("slot name is empty")]
    EmptySlot,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

fn remediation(configured: &[String], suggestions: &[String]) -> String {
    let mut hint = String::new();
    if !suggestions.is_empty() {
        hint.push_str(&format!("; did you mean: {}", suggestions.join(", ")));
    }
    if configured.is_empty() {
        hint.push_str("; no slots are configured in this scope");
    } else {
        hint.push_str(&format!("; configured slots: {}", configured.join(", ")));
    }
    hint
}

/// Diagnostic report of one resolution: every candidate at every level.
#[derive(Debug, Clone)]
pub struct SlotExplanation {
    pub slot: String,
    pub scope: SlotScope,
    pub project_candidates: Vec<ToolSlotMapping>,
    pub workspace_candidates: Vec<ToolSlotMapping>,
    pub registered: bool,
    pub pass_through: bool,
    /// The winning resolution, if any level matched.
    pub resolved: Option<ResolvedTool>,
}

/// Pick the effective mapping among candidates of one scope: enabled only,
/// highest priority, then most recently created.
pub fn select_effective(candidates: &[ToolSlotMapping]) -> Option<&ToolSlotMapping> {
    candidates
        .iter()
        .filter(|m| m.enabled)
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
}

/// Whether a slot is already shaped like a concrete tool ID: the first
/// dot-segment contains a hyphen (`web-search.query`), or it has exactly two
/// segments and the first is a known connector (`github.list_issues`).
pub fn looks_like_tool_id(slot: &str, known_connectors: &HashSet<String>) -> bool {
    let segments: Vec<&str> = slot.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return false;
    }
    if segments[0].contains('-') {
        return true;
    }
    segments.len() == 2 && known_connectors.contains(segments[0])
}

/// Configured slots sharing the first or last dot-segment with `slot`.
fn suggest(slot: &str, configured: &[String]) -> Vec<String> {
    let first = slot.split('.').next().unwrap_or(slot);
    let last = slot.rsplit('.').next().unwrap_or(slot);
    configured
        .iter()
        .filter(|c| c.as_str() != slot)
        .filter(|c| {
            c.split('.').next() == Some(first) || c.rsplit('.').next() == Some(last)
        })
        .cloned()
        .collect()
}

fn from_mapping(mapping: &ToolSlotMapping, source: ResolutionSource) -> ResolvedTool {
    ResolvedTool {
        tool_id: mapping.tool_id.clone(),
        source,
        mapping_id: Some(mapping.id),
    }
}

/// Resolves slot names to concrete tool IDs.
pub struct ToolSlotResolver<M: SlotMappingRepository> {
    repo: M,
    registry: Arc<ToolRegistry>,
    known_connectors: HashSet<String>,
}

impl<M: SlotMappingRepository> ToolSlotResolver<M> {
    pub fn new(repo: M, registry: Arc<ToolRegistry>, known_connectors: &[String]) -> Self {
        Self {
            repo,
            registry,
            known_connectors: known_connectors.iter().cloned().collect(),
        }
    }

    /// The mapping repository, for CRUD by the host.
    pub fn repository(&self) -> &M {
        &self.repo
    }

    /// Resolve a slot for the given scope.
    pub async fn resolve(&self, slot: &str, scope: &SlotScope) -> Result<ResolvedTool, SlotError> {
        let slot = slot.trim();
        if slot.is_empty() {
            return Err(SlotError::EmptySlot);
        }

        if let Some(project_id) = scope.project_id.as_deref() {
            let candidates = self
                .repo
                .candidates(&scope.workspace_id, Some(project_id), slot)
                .await?;
            if let Some(m) = select_effective(&candidates) {
                tracing::debug!(slot, tool_id = %m.tool_id, "slot resolved from project mapping");
                return Ok(from_mapping(m, ResolutionSource::ProjectMapping));
            }
        }

        let candidates = self.repo.candidates(&scope.workspace_id, None, slot).await?;
        if let Some(m) = select_effective(&candidates) {
            tracing::debug!(slot, tool_id = %m.tool_id, "slot resolved from workspace mapping");
            return Ok(from_mapping(m, ResolutionSource::WorkspaceMapping));
        }

        if self.registry.contains(slot) {
            return Ok(ResolvedTool {
                tool_id: slot.to_string(),
                source: ResolutionSource::RegisteredTool,
                mapping_id: None,
            });
        }

        if looks_like_tool_id(slot, &self.known_connectors) {
            tracing::debug!(slot, "slot passed through as a tool id");
            return Ok(ResolvedTool {
                tool_id: slot.to_string(),
                source: ResolutionSource::PassThrough,
                mapping_id: None,
            });
        }

        Err(self.not_found(slot, scope).await?)
    }

    /// Report every candidate the cascade considered and which one won.
    pub async fn explain(&self, slot: &str, scope: &SlotScope) -> Result<SlotExplanation, SlotError> {
        let slot = slot.trim();
        let project_candidates = match scope.project_id.as_deref() {
            Some(project_id) => {
                self.repo
                    .candidates(&scope.workspace_id, Some(project_id), slot)
                    .await?
            }
            None => Vec::new(),
        };
        let workspace_candidates = self.repo.candidates(&scope.workspace_id, None, slot).await?;
        let registered = self.registry.contains(slot);
        let pass_through = looks_like_tool_id(slot, &self.known_connectors);

        let resolved = select_effective(&project_candidates)
            .map(|m| from_mapping(m, ResolutionSource::ProjectMapping))
            .or_else(|| {
                select_effective(&workspace_candidates)
                    .map(|m| from_mapping(m, ResolutionSource::WorkspaceMapping))
            })
            .or_else(|| {
                let source = if registered {
                    ResolutionSource::RegisteredTool
                } else if pass_through {
                    ResolutionSource::PassThrough
                } else {
                    return None;
                };
                Some(ResolvedTool {
                    tool_id: slot.to_string(),
                    source,
                    mapping_id: None,
                })
            });

        Ok(SlotExplanation {
            slot: slot.to_string(),
            scope: scope.clone(),
            project_candidates,
            workspace_candidates,
            registered,
            pass_through,
            resolved,
        })
    }

    async fn not_found(&self, slot: &str, scope: &SlotScope) -> Result<SlotError, SlotError> {
        let mut configured = BTreeSet::new();
        if let Some(project_id) = scope.project_id.as_deref() {
            for m in self.repo.list_scope(&scope.workspace_id, Some(project_id)).await? {
                configured.insert(m.slot);
            }
        }
        for m in self.repo.list_scope(&scope.workspace_id, None).await? {
            configured.insert(m.slot);
        }
        let configured: Vec<String> = configured.into_iter().collect();
        let suggestions = suggest(slot, &configured);

        tracing::warn!(slot, scope = %scope, "slot could not be resolved");
        Ok(SlotError::NotFound {
            slot: slot.to_string(),
            scope: scope.clone(),
            configured,
            suggestions,
        })
    }
}
