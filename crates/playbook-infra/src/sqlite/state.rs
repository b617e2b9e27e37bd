//! SQLite state store repository.
//!
//! Implements `StateRepository` from `playbook-core` over four tables:
//! `world_state_entries`, `plan_versions`, `decision_records` and
//! `decision_resolutions`. JSON payloads are stored as TEXT.

use chrono::{DateTime, Utc};
use playbook_core::repository::state::StateRepository;
use playbook_types::error::RepositoryError;
use playbook_types::state::{
    DecisionRecord, DecisionResolution, DecisionStatus, PlanVersion, WorldStateEntry,
};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `StateRepository`.
pub struct SqliteStateRepository {
    pool: DatabasePool,
}

impl SqliteStateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json(s: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid JSON: {e}")))
}

fn to_json(value: &Value) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("invalid JSON: {e}")))
}

fn parse_status(s: &str) -> Result<DecisionStatus, RepositoryError> {
    DecisionStatus::parse(s)
        .ok_or_else(|| RepositoryError::Query(format!("invalid decision status: {s}")))
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_world_entry(row: &sqlx::sqlite::SqliteRow) -> Result<WorldStateEntry, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let value: String = row.try_get("value").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;

    Ok(WorldStateEntry {
        id: parse_uuid(&id)?,
        workspace_id: row.try_get("workspace_id").map_err(query_err)?,
        key: row.try_get("key").map_err(query_err)?,
        value: parse_json(&value)?,
        source: row.try_get("source").map_err(query_err)?,
        entry_type: row.try_get("entry_type").map_err(query_err)?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_plan_version(row: &sqlx::sqlite::SqliteRow) -> Result<PlanVersion, RepositoryError> {
    let version: i64 = row.try_get("version").map_err(query_err)?;
    let payload: String = row.try_get("payload").map_err(query_err)?;
    let active: i64 = row.try_get("active").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;

    Ok(PlanVersion {
        workspace_id: row.try_get("workspace_id").map_err(query_err)?,
        plan_id: row.try_get("plan_id").map_err(query_err)?,
        version: version as u32,
        payload: parse_json(&payload)?,
        created_by: row.try_get("created_by").map_err(query_err)?,
        active: active != 0,
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_decision(row: &sqlx::sqlite::SqliteRow) -> Result<DecisionRecord, RepositoryError> {
    let data: String = row.try_get("data").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_err)?;

    Ok(DecisionRecord {
        decision_id: row.try_get("decision_id").map_err(query_err)?,
        workspace_id: row.try_get("workspace_id").map_err(query_err)?,
        decision_type: row.try_get("decision_type").map_err(query_err)?,
        data: parse_json(&data)?,
        status: parse_status(&status)?,
        policy_id: row.try_get("policy_id").map_err(query_err)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn row_to_resolution(row: &sqlx::sqlite::SqliteRow) -> Result<DecisionResolution, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;
    let resolved_at: String = row.try_get("resolved_at").map_err(query_err)?;

    Ok(DecisionResolution {
        id: parse_uuid(&id)?,
        workspace_id: row.try_get("workspace_id").map_err(query_err)?,
        decision_id: row.try_get("decision_id").map_err(query_err)?,
        status: parse_status(&status)?,
        resolved_by: row.try_get("resolved_by").map_err(query_err)?,
        reason: row.try_get("reason").map_err(query_err)?,
        resolved_at: parse_datetime(&resolved_at)?,
    })
}

const WORLD_COLUMNS: &str = "id, workspace_id, key, value, source, entry_type, created_at";
const PLAN_COLUMNS: &str = "workspace_id, plan_id, version, payload, created_by, active, created_at";
const DECISION_COLUMNS: &str =
    "workspace_id, decision_id, decision_type, data, status, policy_id, created_at, updated_at";

// ---------------------------------------------------------------------------
// StateRepository implementation
// ---------------------------------------------------------------------------

impl StateRepository for SqliteStateRepository {
    // -----------------------------------------------------------------------
    // World
    // -----------------------------------------------------------------------

    async fn append_world(&self, entry: &WorldStateEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO world_state_entries (id, workspace_id, key, value, source, entry_type, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.workspace_id)
        .bind(&entry.key)
        .bind(to_json(&entry.value)?)
        .bind(&entry.source)
        .bind(&entry.entry_type)
        .bind(format_datetime(&entry.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!("world entry {} already exists", entry.id));
                }
            }
            RepositoryError::Query(e.to_string())
        })?;

        Ok(())
    }

    async fn latest_world(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Option<WorldStateEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {WORLD_COLUMNS} FROM world_state_entries
             WHERE workspace_id = ? AND key = ? ORDER BY seq DESC LIMIT 1"
        ))
        .bind(workspace_id)
        .bind(key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.as_ref().map(row_to_world_entry).transpose()
    }

    async fn world_history(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Vec<WorldStateEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WORLD_COLUMNS} FROM world_state_entries
             WHERE workspace_id = ? AND key = ? ORDER BY seq ASC"
        ))
        .bind(workspace_id)
        .bind(key)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(row_to_world_entry).collect()
    }

    async fn list_world(&self, workspace_id: &str) -> Result<Vec<WorldStateEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WORLD_COLUMNS} FROM world_state_entries w
             WHERE w.workspace_id = ?
               AND w.seq = (SELECT MAX(seq) FROM world_state_entries
                            WHERE workspace_id = w.workspace_id AND key = w.key)
             ORDER BY w.key"
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(row_to_world_entry).collect()
    }

    // -----------------------------------------------------------------------
    // Plan
    // -----------------------------------------------------------------------

    async fn insert_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        payload: &Value,
        created_by: &str,
    ) -> Result<PlanVersion, RepositoryError> {
        let payload_json = to_json(payload)?;
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM plan_versions WHERE workspace_id = ? AND plan_id = ?",
        )
        .bind(workspace_id)
        .bind(plan_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query("UPDATE plan_versions SET active = 0 WHERE workspace_id = ? AND plan_id = ?")
            .bind(workspace_id)
            .bind(plan_id)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO plan_versions (workspace_id, plan_id, version, payload, created_by, active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(workspace_id)
        .bind(plan_id)
        .bind(next)
        .bind(&payload_json)
        .bind(created_by)
        .bind(format_datetime(&created_at))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;

        Ok(PlanVersion {
            workspace_id: workspace_id.to_string(),
            plan_id: plan_id.to_string(),
            version: next as u32,
            payload: payload.clone(),
            created_by: created_by.to_string(),
            active: true,
            created_at,
        })
    }

    async fn get_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> Result<Option<PlanVersion>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plan_versions
             WHERE workspace_id = ? AND plan_id = ? AND version = ?"
        ))
        .bind(workspace_id)
        .bind(plan_id)
        .bind(version as i64)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.as_ref().map(row_to_plan_version).transpose()
    }

    async fn list_plan_versions(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> Result<Vec<PlanVersion>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plan_versions
             WHERE workspace_id = ? AND plan_id = ? ORDER BY version ASC"
        ))
        .bind(workspace_id)
        .bind(plan_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(row_to_plan_version).collect()
    }

    async fn active_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> Result<Option<PlanVersion>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plan_versions
             WHERE workspace_id = ? AND plan_id = ? AND active = 1"
        ))
        .bind(workspace_id)
        .bind(plan_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.as_ref().map(row_to_plan_version).transpose()
    }

    async fn set_active_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> Result<PlanVersion, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM plan_versions WHERE workspace_id = ? AND plan_id = ? AND version = ?",
        )
        .bind(workspace_id)
        .bind(plan_id)
        .bind(version as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            "UPDATE plan_versions SET active = (version = ?) WHERE workspace_id = ? AND plan_id = ?",
        )
        .bind(version as i64)
        .bind(workspace_id)
        .bind(plan_id)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let row = sqlx::query(&format!(
            "SELECT {PLAN_COLUMNS} FROM plan_versions
             WHERE workspace_id = ? AND plan_id = ? AND version = ?"
        ))
        .bind(workspace_id)
        .bind(plan_id)
        .bind(version as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?;
        let activated = row_to_plan_version(&row)?;

        tx.commit().await.map_err(query_err)?;
        Ok(activated)
    }

    // -----------------------------------------------------------------------
    // Decision
    // -----------------------------------------------------------------------

    async fn upsert_decision(&self, record: &DecisionRecord) -> Result<DecisionRecord, RepositoryError> {
        sqlx::query(
            r#"INSERT INTO decision_records
                   (workspace_id, decision_id, decision_type, data, status, policy_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (workspace_id, decision_id) DO UPDATE SET
                   decision_type = excluded.decision_type,
                   data = excluded.data,
                   status = excluded.status,
                   policy_id = excluded.policy_id,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&record.workspace_id)
        .bind(&record.decision_id)
        .bind(&record.decision_type)
        .bind(to_json(&record.data)?)
        .bind(record.status.as_str())
        .bind(&record.policy_id)
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        let row = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM decision_records WHERE workspace_id = ? AND decision_id = ?"
        ))
        .bind(&record.workspace_id)
        .bind(&record.decision_id)
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_err)?;

        row_to_decision(&row)
    }

    async fn get_decision(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> Result<Option<DecisionRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM decision_records WHERE workspace_id = ? AND decision_id = ?"
        ))
        .bind(workspace_id)
        .bind(decision_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.as_ref().map(row_to_decision).transpose()
    }

    async fn list_decisions(
        &self,
        workspace_id: &str,
        status: Option<DecisionStatus>,
    ) -> Result<Vec<DecisionRecord>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {DECISION_COLUMNS} FROM decision_records
                     WHERE workspace_id = ? AND status = ?
                     ORDER BY created_at DESC, rowid DESC"
                ))
                .bind(workspace_id)
                .bind(status.as_str())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {DECISION_COLUMNS} FROM decision_records
                     WHERE workspace_id = ?
                     ORDER BY created_at DESC, rowid DESC"
                ))
                .bind(workspace_id)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_err)?;

        rows.iter().map(row_to_decision).collect()
    }

    async fn apply_resolution(
        &self,
        resolution: &DecisionResolution,
    ) -> Result<DecisionRecord, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let resolved_at = format_datetime(&resolution.resolved_at);
        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM decision_records WHERE workspace_id = ? AND decision_id = ?",
        )
        .bind(&resolution.workspace_id)
        .bind(&resolution.decision_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?;
        let current = match current {
            Some(status) => parse_status(&status)?,
            None => return Err(RepositoryError::NotFound),
        };
        if current.is_final() {
            return Err(RepositoryError::Conflict(format!(
                "decision '{}' is already {}",
                resolution.decision_id,
                current.as_str()
            )));
        }

        sqlx::query(
            "UPDATE decision_records SET status = ?, updated_at = ?
             WHERE workspace_id = ? AND decision_id = ?",
        )
        .bind(resolution.status.as_str())
        .bind(&resolved_at)
        .bind(&resolution.workspace_id)
        .bind(&resolution.decision_id)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query(
            "INSERT INTO decision_resolutions
                 (id, workspace_id, decision_id, status, resolved_by, reason, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(resolution.id.to_string())
        .bind(&resolution.workspace_id)
        .bind(&resolution.decision_id)
        .bind(resolution.status.as_str())
        .bind(&resolution.resolved_by)
        .bind(resolution.reason.as_deref())
        .bind(&resolved_at)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let row = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM decision_records WHERE workspace_id = ? AND decision_id = ?"
        ))
        .bind(&resolution.workspace_id)
        .bind(&resolution.decision_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?;
        let record = row_to_decision(&row)?;

        tx.commit().await.map_err(query_err)?;
        Ok(record)
    }

    async fn list_resolutions(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> Result<Vec<DecisionResolution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, decision_id, status, resolved_by, reason, resolved_at
             FROM decision_resolutions
             WHERE workspace_id = ? AND decision_id = ? ORDER BY seq ASC",
        )
        .bind(workspace_id)
        .bind(decision_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(row_to_resolution).collect()
    }
}

#[cfg(test)]
mod tests {
    use playbook_core::state::{StateError, StateStore};
    use serde_json::json;

    use super::*;
    use crate::sqlite::pool::test_pool;

    async fn store() -> StateStore<SqliteStateRepository> {
        StateStore::new(SqliteStateRepository::new(test_pool().await))
    }

    #[tokio::test]
    async fn world_is_append_only() {
        let store = store().await;
        let world = store.world();

        world
            .add("w1", "tool:github.list_issues", "triage.fetch", json!({"n": 1}), "result")
            .await
            .unwrap();
        world
            .add("w1", "execution", "triage.fetch", json!({"n": 2}), "result")
            .await
            .unwrap();
        world
            .add("w1", "tool", "alpha", json!(true), "fact")
            .await
            .unwrap();

        let latest = world.latest("w1", "triage.fetch").await.unwrap().unwrap();
        assert_eq!(latest.value, json!({"n": 2}));

        let history = world.history("w1", "triage.fetch").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, "tool:github.list_issues");

        let all = world.list("w1").await.unwrap();
        let keys: Vec<_> = all.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "triage.fetch"]);
        assert_eq!(all[1].value, json!({"n": 2}));

        assert!(world.list("w2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn world_rejects_policy_writer() {
        let store = store().await;
        let err = store
            .world()
            .add("w1", "policy:tool-guard", "k", json!(1), "fact")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::WriteRuleViolation { .. }));
        assert!(store.world().latest("w1", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn plan_versions_and_rollback() {
        let store = store().await;
        let plan = store.plan();

        let v1 = plan.add_version("w1", "roadmap", json!({"q": 1}), "alice").await.unwrap();
        let v2 = plan.add_version("w1", "roadmap", json!({"q": 2}), "bob").await.unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));

        let active = plan.active_version("w1", "roadmap").await.unwrap().unwrap();
        assert_eq!(active.version, 2);

        let rolled = plan.activate_version("w1", "roadmap", 1).await.unwrap();
        assert!(rolled.active);
        assert_eq!(rolled.payload, json!({"q": 1}));

        let versions = plan.list_versions("w1", "roadmap").await.unwrap();
        assert_eq!(versions.iter().filter(|v| v.active).count(), 1);
        assert!(versions[0].active);

        let latest = plan.latest_version("w1", "roadmap").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);

        let v3 = plan.add_version("w1", "roadmap", json!({"q": 3}), "carol").await.unwrap();
        assert_eq!(v3.version, 3);
        let fetched = plan.get_version("w1", "roadmap", 1).await.unwrap().unwrap();
        assert!(!fetched.active);
    }

    #[tokio::test]
    async fn activating_missing_version_is_not_found() {
        let store = store().await;
        store.plan().add_version("w1", "p", json!({}), "alice").await.unwrap();
        let err = store.plan().activate_version("w1", "p", 7).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));

        let active = store.plan().active_version("w1", "p").await.unwrap().unwrap();
        assert_eq!(active.version, 1);
    }

    #[tokio::test]
    async fn decision_lifecycle() {
        let store = store().await;
        let decisions = store.decisions();

        let first = decisions
            .record("w1", "policy:deploy-gate", "d1", "deploy", json!({"env": "prod"}), DecisionStatus::Pending)
            .await
            .unwrap();
        assert_eq!(first.policy_id, "deploy-gate");

        decisions
            .record("w1", "policy:deploy-gate", "d1", "deploy", json!({"env": "staging"}), DecisionStatus::Pending)
            .await
            .unwrap();
        let stored = decisions.get("w1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.data, json!({"env": "staging"}));
        assert_eq!(stored.created_at, first.created_at);

        let resolved = decisions
            .resolve("w1", "d1", DecisionStatus::Approved, "alice", Some("looks fine"))
            .await
            .unwrap();
        assert_eq!(resolved.status, DecisionStatus::Approved);

        let resolutions = decisions.resolutions("w1", "d1").await.unwrap();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].reason.as_deref(), Some("looks fine"));

        assert!(decisions.list("w1", Some(DecisionStatus::Pending)).await.unwrap().is_empty());
        assert_eq!(decisions.list("w1", Some(DecisionStatus::Approved)).await.unwrap().len(), 1);
        assert_eq!(decisions.list("w1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_policy_decision_stays_rejected() {
        let store = store().await;
        let decisions = store.decisions();
        decisions
            .record("w1", "policy:guard", "d1", "tool_policy", json!({"tool": "fs.delete"}), DecisionStatus::Rejected)
            .await
            .unwrap();

        let err = decisions
            .resolve("w1", "d1", DecisionStatus::Approved, "carol", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::DecisionFinal(_)));

        let stored = decisions.get("w1", "d1").await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Rejected);
        assert!(decisions.resolutions("w1", "d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decision_write_rules() {
        let store = store().await;
        let err = store
            .decisions()
            .record("w1", "tool:github", "d1", "deploy", json!({}), DecisionStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::WriteRuleViolation { .. }));

        let err = store
            .decisions()
            .resolve("w1", "missing", DecisionStatus::Rejected, "alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        assert!(store.decisions().resolutions("w1", "missing").await.unwrap().is_empty());
    }
}
