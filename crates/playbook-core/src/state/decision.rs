//! Decision partition: governance records written only by policies.

use chrono::Utc;
use playbook_types::error::RepositoryError;
use playbook_types::state::{DecisionRecord, DecisionResolution, DecisionStatus};
use serde_json::Value;
use uuid::Uuid;

use super::source::{may_write_decision, policy_id_from_source};
use super::{Partition, StateError, require_non_empty};
use crate::repository::state::StateRepository;

/// Rule-checked view of the Decision partition.
pub struct DecisionState<'a, R: StateRepository> {
    repo: &'a R,
}

impl<'a, R: StateRepository> DecisionState<'a, R> {
    pub(super) fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Create or replace the document for `decision_id`. Only policy
    /// sources may record; the policy identity is taken from the tag.
    /// Returns the document as stored.
    pub async fn record(
        &self,
        workspace_id: &str,
        source: &str,
        decision_id: &str,
        decision_type: &str,
        data: Value,
        status: DecisionStatus,
    ) -> Result<DecisionRecord, StateError> {
        if !may_write_decision(source) {
            tracing::warn!(workspace_id, source, decision_id, "decision write rejected");
            return Err(StateError::WriteRuleViolation {
                partition: Partition::Decision,
                writer: source.to_string(),
            });
        }
        require_non_empty("decision_id", decision_id)?;

        let now = Utc::now();
        let record = DecisionRecord {
            decision_id: decision_id.to_string(),
            workspace_id: workspace_id.to_string(),
            decision_type: decision_type.to_string(),
            data,
            status,
            policy_id: policy_id_from_source(source),
            created_at: now,
            updated_at: now,
        };
        let stored = self.repo.upsert_decision(&record).await?;
        tracing::debug!(workspace_id, decision_id, status = status.as_str(), "decision recorded");
        Ok(stored)
    }

    pub async fn get(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> Result<Option<DecisionRecord>, StateError> {
        Ok(self.repo.get_decision(workspace_id, decision_id).await?)
    }

    pub async fn list(
        &self,
        workspace_id: &str,
        status: Option<DecisionStatus>,
    ) -> Result<Vec<DecisionRecord>, StateError> {
        Ok(self.repo.list_decisions(workspace_id, status).await?)
    }

    /// Approve, reject or defer a `pending` or `deferred` decision. The
    /// resolution is appended alongside the document and the document's
    /// status is updated. Approved and rejected documents (every policy
    /// audit record) are final.
    pub async fn resolve(
        &self,
        workspace_id: &str,
        decision_id: &str,
        status: DecisionStatus,
        resolved_by: &str,
        reason: Option<&str>,
    ) -> Result<DecisionRecord, StateError> {
        if status == DecisionStatus::Pending {
            return Err(StateError::InvalidInput(
                "a decision cannot be resolved to pending".to_string(),
            ));
        }
        require_non_empty("resolved_by", resolved_by)?;

        let resolution = DecisionResolution {
            id: Uuid::now_v7(),
            workspace_id: workspace_id.to_string(),
            decision_id: decision_id.to_string(),
            status,
            resolved_by: resolved_by.to_string(),
            reason: reason.map(str::to_string),
            resolved_at: Utc::now(),
        };
        match self.repo.apply_resolution(&resolution).await {
            Ok(record) => {
                tracing::info!(
                    workspace_id,
                    decision_id,
                    status = status.as_str(),
                    resolved_by,
                    "decision resolved"
                );
                Ok(record)
            }
            Err(RepositoryError::NotFound) => {
                Err(StateError::NotFound(format!("decision '{decision_id}'")))
            }
            Err(RepositoryError::Conflict(_)) => {
                tracing::warn!(workspace_id, decision_id, resolved_by, "resolution of final decision rejected");
                Err(StateError::DecisionFinal(decision_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn resolutions(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> Result<Vec<DecisionResolution>, StateError> {
        Ok(self.repo.list_resolutions(workspace_id, decision_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use playbook_types::state::DecisionStatus;
    use serde_json::json;

    use crate::repository::memory::InMemoryStateRepository;
    use crate::state::{StateError, StateStore};

    #[tokio::test]
    async fn only_policies_record() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let err = store
            .decisions()
            .record("w1", "tool_abc", "d1", "tool_policy", json!({}), DecisionStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::WriteRuleViolation { .. }));

        let record = store
            .decisions()
            .record("w1", "policy:guard", "d1", "tool_policy", json!({}), DecisionStatus::Pending)
            .await
            .unwrap();
        assert_eq!(record.policy_id, "guard");
    }

    #[tokio::test]
    async fn resolve_appends_and_updates_status() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let decisions = store.decisions();
        decisions
            .record("w1", "policy:guard", "d1", "budget", json!({"amount": 5}), DecisionStatus::Pending)
            .await
            .unwrap();

        let resolved = decisions
            .resolve("w1", "d1", DecisionStatus::Approved, "carol", Some("within budget"))
            .await
            .unwrap();
        assert_eq!(resolved.status, DecisionStatus::Approved);

        let history = decisions.resolutions("w1", "d1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].resolved_by, "carol");

        let pending = decisions.list("w1", Some(DecisionStatus::Pending)).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn policy_verdict_cannot_be_overturned() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let decisions = store.decisions();
        decisions
            .record("w1", "policy:guard", "d1", "tool_policy", json!({"tool": "github.delete_repo"}), DecisionStatus::Rejected)
            .await
            .unwrap();

        let err = decisions
            .resolve("w1", "d1", DecisionStatus::Approved, "carol", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::DecisionFinal(ref id) if id == "d1"));

        let stored = decisions.get("w1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Rejected);
        assert!(decisions.resolutions("w1", "d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deferred_decision_can_be_resolved_later() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let decisions = store.decisions();
        decisions
            .record("w1", "policy:budget", "d2", "budget", json!({}), DecisionStatus::Pending)
            .await
            .unwrap();

        decisions
            .resolve("w1", "d2", DecisionStatus::Deferred, "carol", Some("next quarter"))
            .await
            .unwrap();
        let approved = decisions
            .resolve("w1", "d2", DecisionStatus::Approved, "dave", None)
            .await
            .unwrap();
        assert_eq!(approved.status, DecisionStatus::Approved);
        assert_eq!(decisions.resolutions("w1", "d2").await.unwrap().len(), 2);

        let err = decisions
            .resolve("w1", "d2", DecisionStatus::Rejected, "erin", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::DecisionFinal(_)));
    }

    #[tokio::test]
    async fn record_returns_stored_document() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let decisions = store.decisions();
        let first = decisions
            .record("w1", "policy:guard", "d3", "deploy", json!({"env": "prod"}), DecisionStatus::Pending)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let second = decisions
            .record("w1", "policy:guard", "d3", "deploy", json!({"env": "staging"}), DecisionStatus::Pending)
            .await
            .unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second, decisions.get("w1", "d3").await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn resolve_missing_decision() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let err = store
            .decisions()
            .resolve("w1", "nope", DecisionStatus::Rejected, "carol", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }
}
