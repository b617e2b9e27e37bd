//! Tool slot mapping repository trait definition.

use playbook_types::error::RepositoryError;
use playbook_types::slot::ToolSlotMapping;
use uuid::Uuid;

/// Repository trait for slot-to-tool mappings.
///
/// The triple (`workspace_id`, `project_id`, `slot`) is the upsert key.
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait SlotMappingRepository: Send + Sync {
    /// Insert or replace the mapping for its triple. Replacing keeps the
    /// stored `id` and `created_at`. Returns the stored mapping.
    fn upsert(
        &self,
        mapping: &ToolSlotMapping,
    ) -> impl std::future::Future<Output = Result<ToolSlotMapping, RepositoryError>> + Send;

    /// Get a mapping by its ID.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ToolSlotMapping>, RepositoryError>> + Send;

    /// List mappings in exactly one scope (`project_id = None` is the
    /// workspace-wide scope), ordered by slot.
    fn list_scope(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<ToolSlotMapping>, RepositoryError>> + Send;

    /// Mappings for one slot in exactly one scope, enabled or not.
    fn candidates(
        &self,
        workspace_id: &str,
        project_id: Option<&str>,
        slot: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ToolSlotMapping>, RepositoryError>> + Send;

    /// Delete a mapping by ID. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
