//! State store record types for the World, Plan and Decision partitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// An append-only fact or result produced by a tool or execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldStateEntry {
    pub id: Uuid,
    pub workspace_id: String,
    pub key: String,
    pub value: Value,
    /// Tag of the writer (e.g. `tool:github.list_issues`).
    pub source: String,
    /// Free-form kind (`fact`, `result`, `observation`, ...).
    pub entry_type: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One version of a planning artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanVersion {
    pub workspace_id: String,
    pub plan_id: String,
    /// 1-based, assigned by the store.
    pub version: u32,
    pub payload: Value,
    pub created_by: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Status of a governance decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
    Deferred,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Deferred => "deferred",
        }
    }

    /// Approved and rejected documents are final: resolutions may not
    /// change them.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }
}

/// The current document for one decision id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub workspace_id: String,
    pub decision_type: String,
    pub data: Value,
    pub status: DecisionStatus,
    /// Identity of the policy that wrote the record.
    pub policy_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A resolution applied to a decision, kept separately from the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResolution {
    pub id: Uuid,
    pub workspace_id: String,
    pub decision_id: String,
    pub status: DecisionStatus,
    pub resolved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_status_parse_roundtrip() {
        for status in [
            DecisionStatus::Pending,
            DecisionStatus::Approved,
            DecisionStatus::Rejected,
            DecisionStatus::Deferred,
        ] {
            assert_eq!(DecisionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DecisionStatus::parse("maybe"), None);
        assert!(DecisionStatus::Rejected.is_final());
        assert!(!DecisionStatus::Deferred.is_final());
    }
}
