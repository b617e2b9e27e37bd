//! Three-partition state store.
//!
//! World (facts and results), Plan (versioned planning artifacts) and
//! Decision (governance records) share one `StateRepository` but are only
//! reachable through partition views that enforce who may write what.
//! Write-rule violations are never downgraded to warnings.

pub mod decision;
pub mod plan;
pub mod source;
pub mod world;

use playbook_types::error::RepositoryError;
use thiserror::Error;

use crate::repository::state::StateRepository;

pub use decision::DecisionState;
pub use plan::PlanState;
pub use world::WorldState;

/// The three state partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    World,
    Plan,
    Decision,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Partition::World => "world",
            Partition::Plan => "plan",
            Partition::Decision => "decision",
        })
    }
}

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("write rule violation: source '{writer}' may not write to the {partition} partition")]
    WriteRuleViolation { partition: Partition, writer: String },

    #[error("decision '{0}' is already approved or rejected and cannot be resolved")]
    DecisionFinal(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Entry point to the partitioned state store.
///
/// Cheap to share behind an `Arc`; the views borrow the store.
pub struct StateStore<R: StateRepository> {
    repo: R,
}

impl<R: StateRepository> StateStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// The append-only World partition.
    pub fn world(&self) -> WorldState<'_, R> {
        WorldState::new(&self.repo)
    }

    /// The versioned Plan partition.
    pub fn plan(&self) -> PlanState<'_, R> {
        PlanState::new(&self.repo)
    }

    /// The policy-written Decision partition.
    pub fn decisions(&self) -> DecisionState<'_, R> {
        DecisionState::new(&self.repo)
    }
}

impl<R: StateRepository + std::fmt::Debug> std::fmt::Debug for StateStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("repo", &self.repo).finish()
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), StateError> {
    if value.trim().is_empty() {
        return Err(StateError::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(())
}
