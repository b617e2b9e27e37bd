//! Plan partition: versioned planning artifacts with one active version.

use playbook_types::error::RepositoryError;
use playbook_types::state::PlanVersion;
use serde_json::Value;

use super::{StateError, require_non_empty};
use crate::repository::state::StateRepository;

/// View of the Plan partition. Any non-empty creator may write.
pub struct PlanState<'a, R: StateRepository> {
    repo: &'a R,
}

impl<'a, R: StateRepository> PlanState<'a, R> {
    pub(super) fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Store a new version and make it the only active one.
    pub async fn add_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        payload: Value,
        created_by: &str,
    ) -> Result<PlanVersion, StateError> {
        require_non_empty("plan_id", plan_id)?;
        require_non_empty("created_by", created_by)?;
        let version = self
            .repo
            .insert_plan_version(workspace_id, plan_id, &payload, created_by)
            .await?;
        tracing::debug!(workspace_id, plan_id, version = version.version, "plan version added");
        Ok(version)
    }

    pub async fn get_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> Result<Option<PlanVersion>, StateError> {
        Ok(self.repo.get_plan_version(workspace_id, plan_id, version).await?)
    }

    /// Highest-numbered version, active or not.
    pub async fn latest_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> Result<Option<PlanVersion>, StateError> {
        let versions = self.repo.list_plan_versions(workspace_id, plan_id).await?;
        Ok(versions.into_iter().max_by_key(|v| v.version))
    }

    pub async fn active_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> Result<Option<PlanVersion>, StateError> {
        Ok(self.repo.active_plan_version(workspace_id, plan_id).await?)
    }

    pub async fn list_versions(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> Result<Vec<PlanVersion>, StateError> {
        Ok(self.repo.list_plan_versions(workspace_id, plan_id).await?)
    }

    /// Roll back (or forward) to an existing version.
    pub async fn activate_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> Result<PlanVersion, StateError> {
        match self
            .repo
            .set_active_plan_version(workspace_id, plan_id, version)
            .await
        {
            Ok(v) => Ok(v),
            Err(RepositoryError::NotFound) => Err(StateError::NotFound(format!(
                "plan '{plan_id}' version {version}"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::repository::memory::InMemoryStateRepository;
    use crate::state::{StateError, StateStore};

    #[tokio::test]
    async fn second_version_becomes_active() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let plan = store.plan();
        plan.add_version("w1", "launch", json!({"goal": "v1"}), "alice")
            .await
            .unwrap();
        plan.add_version("w1", "launch", json!({"goal": "v2"}), "alice")
            .await
            .unwrap();

        let active = plan.active_version("w1", "launch").await.unwrap().unwrap();
        assert_eq!(active.version, 2);
        assert_eq!(active.payload, json!({"goal": "v2"}));

        let v1 = plan.get_version("w1", "launch", 1).await.unwrap().unwrap();
        assert!(!v1.active);
        assert_eq!(v1.payload, json!({"goal": "v1"}));
    }

    #[tokio::test]
    async fn activate_rolls_back() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let plan = store.plan();
        plan.add_version("w1", "launch", json!(1), "alice").await.unwrap();
        plan.add_version("w1", "launch", json!(2), "alice").await.unwrap();

        plan.activate_version("w1", "launch", 1).await.unwrap();
        assert_eq!(plan.active_version("w1", "launch").await.unwrap().unwrap().version, 1);
        assert_eq!(plan.latest_version("w1", "launch").await.unwrap().unwrap().version, 2);

        let err = plan.activate_version("w1", "launch", 9).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn creator_required() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let err = store
            .plan()
            .add_version("w1", "launch", json!(1), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidInput(_)));
    }
}
