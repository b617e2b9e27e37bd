//! State store repository trait definition.
//!
//! Raw persistence for the World, Plan and Decision partitions. Write rules
//! are not enforced here; callers go through `crate::state::StateStore`.

use playbook_types::error::RepositoryError;
use playbook_types::state::{
    DecisionRecord, DecisionResolution, DecisionStatus, PlanVersion, WorldStateEntry,
};
use serde_json::Value;

/// Repository trait for state store persistence.
///
/// Covers three entity families:
/// - **World:** append-only entries, queried by key.
/// - **Plan:** versioned payloads with a single active version per plan.
/// - **Decision:** current decision documents plus appended resolutions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // World
    // -----------------------------------------------------------------------

    /// Append a world entry. Entries are never updated.
    fn append_world(
        &self,
        entry: &WorldStateEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Most recently appended entry for a key.
    fn latest_world(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorldStateEntry>, RepositoryError>> + Send;

    /// Every entry for a key, oldest first.
    fn world_history(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorldStateEntry>, RepositoryError>> + Send;

    /// Latest entry for every key in the workspace, ordered by key.
    fn list_world(
        &self,
        workspace_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorldStateEntry>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Plan
    // -----------------------------------------------------------------------

    /// Store a new version with the next version number, mark it active and
    /// deactivate every other version of the plan in one atomic step.
    fn insert_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        payload: &Value,
        created_by: &str,
    ) -> impl std::future::Future<Output = Result<PlanVersion, RepositoryError>> + Send;

    /// Get one version of a plan.
    fn get_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> impl std::future::Future<Output = Result<Option<PlanVersion>, RepositoryError>> + Send;

    /// Every version of a plan, ascending by version number.
    fn list_plan_versions(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<PlanVersion>, RepositoryError>> + Send;

    /// The active version of a plan.
    fn active_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<PlanVersion>, RepositoryError>> + Send;

    /// Make an existing version the only active one.
    /// Returns `RepositoryError::NotFound` if the version does not exist.
    fn set_active_plan_version(
        &self,
        workspace_id: &str,
        plan_id: &str,
        version: u32,
    ) -> impl std::future::Future<Output = Result<PlanVersion, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Decision
    // -----------------------------------------------------------------------

    /// Insert or replace the decision document for its ID. Replacing keeps
    /// the original `created_at`. Returns the stored document.
    fn upsert_decision(
        &self,
        record: &DecisionRecord,
    ) -> impl std::future::Future<Output = Result<DecisionRecord, RepositoryError>> + Send;

    /// Get a decision document by ID.
    fn get_decision(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<DecisionRecord>, RepositoryError>> + Send;

    /// Decisions in a workspace, newest first, optionally filtered by status.
    fn list_decisions(
        &self,
        workspace_id: &str,
        status: Option<DecisionStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<DecisionRecord>, RepositoryError>> + Send;

    /// Append a resolution and set the decision's status to it atomically.
    /// Only `pending` and `deferred` documents can be resolved.
    /// Returns `RepositoryError::NotFound` if the decision does not exist and
    /// `RepositoryError::Conflict` if it is already approved or rejected;
    /// nothing is written in either case.
    fn apply_resolution(
        &self,
        resolution: &DecisionResolution,
    ) -> impl std::future::Future<Output = Result<DecisionRecord, RepositoryError>> + Send;

    /// Resolutions applied to a decision, oldest first.
    fn list_resolutions(
        &self,
        workspace_id: &str,
        decision_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<DecisionResolution>, RepositoryError>> + Send;
}
