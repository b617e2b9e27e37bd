//! World partition: append-only facts written by tools and the executor.

use chrono::Utc;
use playbook_types::state::WorldStateEntry;
use serde_json::Value;
use uuid::Uuid;

use super::source::may_write_world;
use super::{Partition, StateError, require_non_empty};
use crate::repository::state::StateRepository;

/// Rule-checked view of the World partition.
pub struct WorldState<'a, R: StateRepository> {
    repo: &'a R,
}

impl<'a, R: StateRepository> WorldState<'a, R> {
    pub(super) fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Append an entry. Only tool and execution sources may write.
    pub async fn add(
        &self,
        workspace_id: &str,
        source: &str,
        key: &str,
        value: Value,
        entry_type: &str,
    ) -> Result<WorldStateEntry, StateError> {
        if !may_write_world(source) {
            tracing::warn!(workspace_id, source, key, "world write rejected");
            return Err(StateError::WriteRuleViolation {
                partition: Partition::World,
                writer: source.to_string(),
            });
        }
        require_non_empty("key", key)?;

        let entry = WorldStateEntry {
            id: Uuid::now_v7(),
            workspace_id: workspace_id.to_string(),
            key: key.to_string(),
            value,
            source: source.to_string(),
            entry_type: entry_type.to_string(),
            created_at: Utc::now(),
        };
        self.repo.append_world(&entry).await?;
        tracing::debug!(workspace_id, source, key, "world entry appended");
        Ok(entry)
    }

    /// Most recent entry for a key.
    pub async fn latest(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Option<WorldStateEntry>, StateError> {
        Ok(self.repo.latest_world(workspace_id, key).await?)
    }

    /// Every entry for a key, oldest first.
    pub async fn history(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Vec<WorldStateEntry>, StateError> {
        Ok(self.repo.world_history(workspace_id, key).await?)
    }

    /// Latest entry for each key in the workspace.
    pub async fn list(&self, workspace_id: &str) -> Result<Vec<WorldStateEntry>, StateError> {
        Ok(self.repo.list_world(workspace_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::repository::memory::InMemoryStateRepository;
    use crate::state::{StateError, StateStore};

    #[tokio::test]
    async fn planner_cannot_write_world() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let err = store
            .world()
            .add("w1", "llm_planner", "issues", json!([1, 2]), "fact")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::WriteRuleViolation { .. }));
        assert!(store.world().latest("w1", "issues").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tool_write_becomes_latest() {
        let store = StateStore::new(InMemoryStateRepository::new());
        store
            .world()
            .add("w1", "executor", "issues", json!([1]), "result")
            .await
            .unwrap();
        let written = store
            .world()
            .add("w1", "tool_abc", "issues", json!([1, 2]), "result")
            .await
            .unwrap();

        let latest = store.world().latest("w1", "issues").await.unwrap().unwrap();
        assert_eq!(latest.id, written.id);
        assert_eq!(latest.value, json!([1, 2]));
        assert_eq!(store.world().history("w1", "issues").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_returns_latest_per_key() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let world = store.world();
        world.add("w1", "tool:a", "k1", json!(1), "fact").await.unwrap();
        world.add("w1", "tool:a", "k1", json!(2), "fact").await.unwrap();
        world.add("w1", "tool:a", "k2", json!(3), "fact").await.unwrap();
        world.add("w2", "tool:a", "k3", json!(4), "fact").await.unwrap();

        let listed = world.list("w1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].value, json!(2));
    }
}
