//! In-memory repository implementations backed by `DashMap`.
//!
//! Values are cloned on read so no `DashMap` guard is ever held across an
//! `.await` point. Each multi-record write (plan version insert, decision
//! resolution) happens under a single entry lock, which makes it atomic with
//! respect to other writers of the same key.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use playbook_types::error::RepositoryError;
use playbook_types::slot::ToolSlotMapping;
use playbook_types::state::{
    DecisionRecord, DecisionResolution, DecisionStatus, PlanVersion, WorldStateEntry,
};
use serde_json::Value;
use uuid::Uuid;

use super::slot::SlotMappingRepository;
use super::state::StateRepository;

// ---------------------------------------------------------------------------
// Slot mappings
// ---------------------------------------------------------------------------

type SlotKey = (String, Option<String>, String);

/// `SlotMappingRepository` held entirely in memory.
///
/// Cloning produces a shared view of the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct InMemorySlotMappingRepository {
    mappings: Arc<DashMap<SlotKey, ToolSlotMapping>>,
}

impl InMemorySlotMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn slot_key(mapping: &ToolSlotMapping) -> SlotKey {
    (
        mapping.workspace_id.clone(),
        mapping.project_id.clone(),
        mapping.slot.clone(),
    )
}

impl SlotMappingRepository for InMemorySlotMappingRepository {
    async fn upsert(&self, mapping: &ToolSlotMapping) -> Result<ToolSlotMapping, RepositoryError> {
        let mut entry = self
            .mappings
            .entry(slot_key(mapping))
            .or_insert_with(|| mapping.clone());
        let stored = entry.value_mut();
        stored.tool_id = mapping.tool_id.clone();
        stored.priority = mapping.priority;
        stored.enabled = mapping.enabled;
        stored.updated_at = mapping.updated_at;
        Ok(stored.clone())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ToolSlotMapping>, RepositoryError> {
        Ok(self
            .mappings
            .iter()
            .find(|r| r.value().id == *id)
            .map(|r| r.value().clone()))
    }

    async fn list_scope(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ToolSlotMapping>, RepositoryError> {
        let mut found: Vec<ToolSlotMapping> = self
            .mappings
            .iter()
            .filter(|r| {
                let (ws, project, _) = r.key();
                ws == workspace_id && project.as_deref() == project_id
            })
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.slot.cmp(&b.slot));
        Ok(found)
    }

    async fn candidates(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
        slot: &str,
    ) -> Result<Vec<ToolSlotMapping>, RepositoryError> {
        let key = (
            workspace_id.to_string(),
            project_id.map(str::to_string),
            slot.to_string(),
        );
        Ok(self.mappings.get(&key).map(|r| r.value().clone()).into_iter().collect())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let key = self
            .mappings
            .iter()
            .find(|r| r.value().id == *id)
            .map(|r| r.key().clone());
        Ok(match key {
            Some(key) => self.mappings.remove(&key).is_some(),
            None => false,
        })
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

type ScopedKey = (String, String);

/// `StateRepository` held entirely in memory.
///
/// Cloning produces a shared view of the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateRepository {
    world: Arc<DashMap<ScopedKey, Vec<WorldStateEntry>>>,
    plans: Arc<DashMap<ScopedKey, Vec<PlanVersion>>>,
    decisions: Arc<DashMap<ScopedKey, DecisionRecord>>,
    resolutions: Arc<DashMap<ScopedKey, Vec<DecisionResolution>>>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn scoped(workspace_id: &str, key: &str) -> ScopedKey {
    (workspace_id.to_string(), key.to_string())
}

impl StateRepository for InMemoryStateRepository {
    async fn append_world(&self, entry: &WorldStateEntry) -> Result<(), RepositoryError> {
        self.world
            .entry(scoped(&entry.workspace_id, &entry.key))
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn latest_world(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Option<WorldStateEntry>, RepositoryError> {
        Ok(self
            .world
            .get(&scoped(workspace_id, key))
            .and_then(|r| r.value().last().cloned()))
    }

    async fn world_history(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Vec<WorldStateEntry>, RepositoryError> {
        Ok(self
            .world
            .get(&scoped(workspace_id, key))
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn list_world(&self, workspace_id: &str) -> Result<Vec<WorldStateEntry>, RepositoryError> {
        let mut latest: Vec<WorldStateEntry> = self
            .world
            .iter()
            .filter(|r| r.key().0 == workspace_id)
            .filter_map(|r| r.value().last().cloned())
            .collect();
        latest.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(latest)
    }

    async fn insert_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        payload: &Value,
        created_by: &str,
    ) -> Result<PlanVersion, RepositoryError> {
        let mut versions = self.plans.entry(scoped(workspace_id, plan_id)).or_default();
        let next = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        for existing in versions.iter_mut() {
            existing.active = false;
        }
        let version = PlanVersion {
            workspace_id: workspace_id.to_string(),
            plan_id: plan_id.to_string(),
            version: next,
            payload: payload.clone(),
            created_by: created_by.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        versions.push(version.clone());
        Ok(version)
    }

    async fn get_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> Result<Option<PlanVersion>, RepositoryError> {
        Ok(self.plans.get(&scoped(workspace_id, plan_id)).and_then(|r| {
            r.value().iter().find(|v| v.version == version).cloned()
        }))
    }

    async fn list_plan_versions(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> Result<Vec<PlanVersion>, RepositoryError> {
        Ok(self
            .plans
            .get(&scoped(workspace_id, plan_id))
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn active_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> Result<Option<PlanVersion>, RepositoryError> {
        Ok(self
            .plans
            .get(&scoped(workspace_id, plan_id))
            .and_then(|r| r.value().iter().find(|v| v.active).cloned()))
    }

    async fn set_active_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> Result<PlanVersion, RepositoryError> {
        let mut versions = self
            .plans
            .get_mut(&scoped(workspace_id, plan_id))
            .ok_or(RepositoryError::NotFound)?;
        if !versions.iter().any(|v| v.version == version) {
            return Err(RepositoryError::NotFound);
        }
        let mut activated = None;
        for existing in versions.iter_mut() {
            existing.active = existing.version == version;
            if existing.active {
                activated = Some(existing.clone());
            }
        }
        activated.ok_or(RepositoryError::NotFound)
    }

    async fn upsert_decision(&self, record: &DecisionRecord) -> Result<DecisionRecord, RepositoryError> {
        let key = scoped(&record.workspace_id, &record.decision_id);
        let mut entry = self
            .decisions
            .entry(key)
            .or_insert_with(|| record.clone());
        let created_at = entry.created_at;
        *entry = DecisionRecord {
            created_at,
            ..record.clone()
        };
        Ok(entry.clone())
    }

    async fn get_decision(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> Result<Option<DecisionRecord>, RepositoryError> {
        Ok(self
            .decisions
            .get(&scoped(workspace_id, decision_id))
            .map(|r| r.value().clone()))
    }

    async fn list_decisions(
        &self,
        workspace_id: &str,
        status: Option<DecisionStatus>,
    ) -> Result<Vec<DecisionRecord>, RepositoryError> {
        let mut found: Vec<DecisionRecord> = self
            .decisions
            .iter()
            .filter(|r| r.key().0 == workspace_id)
            .filter(|r| status.is_none_or(|s| r.value().status == s))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn apply_resolution(
        &self,
        resolution: &DecisionResolution,
    ) -> Result<DecisionRecord, RepositoryError> {
        let key = scoped(&resolution.workspace_id, &resolution.decision_id);
        let mut record = self
            .decisions
            .get_mut(&key)
            .ok_or(RepositoryError::NotFound)?;
        if record.status.is_final() {
            return Err(RepositoryError::Conflict(format!(
                "decision '{}' is already {}",
                resolution.decision_id,
                record.status.as_str()
            )));
        }
        record.status = resolution.status;
        record.updated_at = resolution.resolved_at;
        self.resolutions
            .entry(key)
            .or_default()
            .push(resolution.clone());
        Ok(record.clone())
    }

    async fn list_resolutions(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> Result<Vec<DecisionResolution>, RepositoryError> {
        Ok(self
            .resolutions
            .get(&scoped(workspace_id, decision_id))
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn slot_upsert_replaces_by_triple() {
        let repo = InMemorySlotMappingRepository::new();
        let first = repo
            .upsert(&ToolSlotMapping::new("w1", None, "research.search", "web-search.query"))
            .await
            .unwrap();
        let second = repo
            .upsert(&ToolSlotMapping::new("w1", None, "research.search", "arxiv.search").with_priority(5))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.tool_id, "arxiv.search");
        assert_eq!(repo.list_scope("w1", None).await.unwrap().len(), 1);
        assert!(repo.list_scope("w1", Some("p1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slot_delete_by_id() {
        let repo = InMemorySlotMappingRepository::new();
        let m = repo
            .upsert(&ToolSlotMapping::new("w1", Some("p1"), "a.b", "x-y.z"))
            .await
            .unwrap();
        assert!(repo.get(&m.id).await.unwrap().is_some());
        assert!(repo.delete(&m.id).await.unwrap());
        assert!(!repo.delete(&m.id).await.unwrap());
        assert!(repo.candidates("w1", Some("p1"), "a.b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plan_insert_deactivates_previous() {
        let repo = InMemoryStateRepository::new();
        repo.insert_plan_version("w1", "roadmap", &json!({"v": 1}), "alice")
            .await
            .unwrap();
        let v2 = repo
            .insert_plan_version("w1", "roadmap", &json!({"v": 2}), "alice")
            .await
            .unwrap();

        assert_eq!(v2.version, 2);
        let all = repo.list_plan_versions("w1", "roadmap").await.unwrap();
        assert_eq!(all.iter().filter(|v| v.active).count(), 1);
        assert!(!all[0].active);

        let rolled_back = repo.set_active_plan_version("w1", "roadmap", 1).await.unwrap();
        assert!(rolled_back.active);
        let active = repo.active_plan_version("w1", "roadmap").await.unwrap().unwrap();
        assert_eq!(active.version, 1);
    }

    #[tokio::test]
    async fn final_decision_rejects_resolution() {
        let repo = InMemoryStateRepository::new();
        let now = Utc::now();
        repo.upsert_decision(&DecisionRecord {
            decision_id: "d1".into(),
            workspace_id: "w1".into(),
            decision_type: "tool_policy".into(),
            data: json!({}),
            status: DecisionStatus::Rejected,
            policy_id: "guard".into(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

        let resolution = DecisionResolution {
            id: Uuid::now_v7(),
            workspace_id: "w1".into(),
            decision_id: "d1".into(),
            status: DecisionStatus::Approved,
            resolved_by: "carol".into(),
            reason: None,
            resolved_at: Utc::now(),
        };
        assert!(matches!(
            repo.apply_resolution(&resolution).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert!(repo.list_resolutions("w1", "d1").await.unwrap().is_empty());
        let stored = repo.get_decision("w1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Rejected);
    }

    #[tokio::test]
    async fn resolution_requires_existing_decision() {
        let repo = InMemoryStateRepository::new();
        let resolution = DecisionResolution {
            id: Uuid::now_v7(),
            workspace_id: "w1".into(),
            decision_id: "missing".into(),
            status: DecisionStatus::Approved,
            resolved_by: "bob".into(),
            reason: None,
            resolved_at: Utc::now(),
        };
        assert!(matches!(
            repo.apply_resolution(&resolution).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
