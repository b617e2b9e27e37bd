//! SQLite tool slot mapping repository.
//!
//! Implements `SlotMappingRepository` from `playbook-core`. A workspace-wide
//! mapping (`project_id = None`) is stored with an empty project so the scope
//! triple is a plain `UNIQUE` key.

use chrono::{DateTime, Utc};
use playbook_core::repository::slot::SlotMappingRepository;
use playbook_types::error::RepositoryError;
use playbook_types::slot::ToolSlotMapping;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

const COLUMNS: &str =
    "id, workspace_id, project_id, slot, tool_id, priority, enabled, created_at, updated_at";

/// SQLite-backed implementation of `SlotMappingRepository`.
pub struct SqliteSlotMappingRepository {
    pool: DatabasePool,
}

impl SqliteSlotMappingRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MappingRow {
    id: String,
    workspace_id: String,
    project_id: String,
    slot: String,
    tool_id: String,
    priority: i64,
    enabled: i64,
    created_at: String,
    updated_at: String,
}

impl MappingRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            project_id: row.try_get("project_id")?,
            slot: row.try_get("slot")?,
            tool_id: row.try_get("tool_id")?,
            priority: row.try_get("priority")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_mapping(self) -> Result<ToolSlotMapping, RepositoryError> {
        Ok(ToolSlotMapping {
            id: parse_uuid(&self.id)?,
            workspace_id: self.workspace_id,
            project_id: (!self.project_id.is_empty()).then_some(self.project_id),
            slot: self.slot,
            tool_id: self.tool_id,
            priority: self.priority as i32,
            enabled: self.enabled != 0,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn map_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ToolSlotMapping>, RepositoryError> {
    rows.iter()
        .map(|row| {
            MappingRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_mapping()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

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

fn project_key(project_id: Option<&str>) -> &str {
    project_id.unwrap_or("")
}

// ---------------------------------------------------------------------------
// SlotMappingRepository implementation
// ---------------------------------------------------------------------------

impl SlotMappingRepository for SqliteSlotMappingRepository {
    async fn upsert(&self, mapping: &ToolSlotMapping) -> Result<ToolSlotMapping, RepositoryError> {
        let project = project_key(mapping.project_id.as_deref());

        sqlx::query(
            r#"INSERT INTO tool_slot_mappings
                   (id, workspace_id, project_id, slot, tool_id, priority, enabled, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (workspace_id, project_id, slot) DO UPDATE SET
                   tool_id = excluded.tool_id,
                   priority = excluded.priority,
                   enabled = excluded.enabled,
                   updated_at = excluded.updated_at"#,
        )
        .bind(mapping.id.to_string())
        .bind(&mapping.workspace_id)
        .bind(project)
        .bind(&mapping.slot)
        .bind(&mapping.tool_id)
        .bind(mapping.priority as i64)
        .bind(mapping.enabled as i64)
        .bind(format_datetime(&mapping.created_at))
        .bind(format_datetime(&mapping.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tool_slot_mappings WHERE workspace_id = ? AND project_id = ? AND slot = ?"
        ))
        .bind(&mapping.workspace_id)
        .bind(project)
        .bind(&mapping.slot)
        .fetch_one(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        MappingRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_mapping()
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ToolSlotMapping>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM tool_slot_mappings WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                MappingRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_mapping()?,
            )),
            None => Ok(None),
        }
    }

    async fn list_scope(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ToolSlotMapping>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tool_slot_mappings WHERE workspace_id = ? AND project_id = ? ORDER BY slot"
        ))
        .bind(workspace_id)
        .bind(project_key(project_id))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        map_rows(&rows)
    }

    async fn candidates(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
        slot: &str,
    ) -> Result<Vec<ToolSlotMapping>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tool_slot_mappings
             WHERE workspace_id = ? AND project_id = ? AND slot = ?
             ORDER BY priority DESC, created_at DESC"
        ))
        .bind(workspace_id)
        .bind(project_key(project_id))
        .bind(slot)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        map_rows(&rows)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM tool_slot_mappings WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use playbook_core::tool::{ToolRegistry, ToolSlotResolver};
    use playbook_types::slot::{ResolutionSource, SlotScope};

    use super::*;
    use crate::sqlite::pool::test_pool;

    #[tokio::test]
    async fn upsert_replaces_within_triple() {
        let repo = SqliteSlotMappingRepository::new(test_pool().await);

        let first = repo
            .upsert(&ToolSlotMapping::new("w1", None, "research.search", "web-search.query"))
            .await
            .unwrap();
        let second = repo
            .upsert(&ToolSlotMapping::new("w1", None, "research.search", "perplexity.ask").with_priority(5))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.tool_id, "perplexity.ask");
        assert_eq!(second.priority, 5);
        assert_eq!(second.project_id, None);

        let scope = repo.list_scope("w1", None).await.unwrap();
        assert_eq!(scope.len(), 1);
    }

    #[tokio::test]
    async fn scopes_are_separate() {
        let repo = SqliteSlotMappingRepository::new(test_pool().await);
        repo.upsert(&ToolSlotMapping::new("w1", None, "issues.list", "gitlab.list_issues"))
            .await
            .unwrap();
        let project = repo
            .upsert(&ToolSlotMapping::new("w1", Some("p1"), "issues.list", "github.list_issues"))
            .await
            .unwrap();

        let workspace = repo.candidates("w1", None, "issues.list").await.unwrap();
        assert_eq!(workspace.len(), 1);
        assert_eq!(workspace[0].tool_id, "gitlab.list_issues");

        let scoped = repo.list_scope("w1", Some("p1")).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].project_id.as_deref(), Some("p1"));

        let fetched = repo.get(&project.id).await.unwrap().unwrap();
        assert_eq!(fetched.tool_id, "github.list_issues");
    }

    #[tokio::test]
    async fn delete_mapping() {
        let repo = SqliteSlotMappingRepository::new(test_pool().await);
        let m = repo
            .upsert(&ToolSlotMapping::new("w1", None, "a.b", "x-y.z"))
            .await
            .unwrap();
        assert!(repo.delete(&m.id).await.unwrap());
        assert!(!repo.delete(&m.id).await.unwrap());
        assert!(repo.get(&m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolver_over_sqlite_prefers_project() {
        let repo = SqliteSlotMappingRepository::new(test_pool().await);
        repo.upsert(&ToolSlotMapping::new("w1", None, "issues.list", "gitlab.list_issues"))
            .await
            .unwrap();
        repo.upsert(&ToolSlotMapping::new("w1", Some("p1"), "issues.list", "github.list_issues"))
            .await
            .unwrap();
        let resolver = ToolSlotResolver::new(repo, Arc::new(ToolRegistry::new()), &[]);

        let scope = SlotScope {
            workspace_id: "w1".into(),
            project_id: Some("p1".into()),
        };
        let resolved = resolver.resolve("issues.list", &scope).await.unwrap();
        assert_eq!(resolved.tool_id, "github.list_issues");
        assert_eq!(resolved.source, ResolutionSource::ProjectMapping);

        let scope = SlotScope {
            workspace_id: "w1".into(),
            project_id: None,
        };
        let resolved = resolver.resolve("issues.list", &scope).await.unwrap();
        assert_eq!(resolved.tool_id, "gitlab.list_issues");
        assert_eq!(resolved.source, ResolutionSource::WorkspaceMapping);
    }
}
