//! Lifecycle events for the playbook event bus.
//!
//! `PlaybookEvent` is broadcast by the scheduler for every run and step
//! transition. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ErrorKind, RunStatus};

/// Events emitted during playbook execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybookEvent {
    /// A run has started.
    RunStarted {
        run_id: Uuid,
        playbook_name: String,
        step_count: usize,
        started_at: DateTime<Utc>,
    },

    /// A scheduling round is about to execute.
    RoundStarted {
        run_id: Uuid,
        /// 1-based round number.
        round: u32,
        step_ids: Vec<String>,
    },

    /// A step began executing.
    StepStarted {
        run_id: Uuid,
        step_id: String,
        index: usize,
        started_at: DateTime<Utc>,
    },

    /// An attempt failed and will be retried after `delay_ms`.
    StepRetrying {
        run_id: Uuid,
        step_id: String,
        index: usize,
        attempt: u32,
        error: String,
        error_type: ErrorKind,
        delay_ms: u64,
    },

    /// A step completed successfully.
    StepCompleted {
        run_id: Uuid,
        step_id: String,
        index: usize,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },

    /// A step failed after exhausting its handling.
    StepFailed {
        run_id: Uuid,
        step_id: String,
        index: usize,
        error: String,
        error_type: ErrorKind,
        attempts: u32,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },

    /// A step was skipped (condition false, cancelled, or error skipped).
    StepSkipped {
        run_id: Uuid,
        step_id: String,
        index: usize,
        reason: String,
        at: DateTime<Utc>,
    },

    /// A run reached its final status.
    RunCompleted {
        run_id: Uuid,
        playbook_name: String,
        status: RunStatus,
        duration_ms: u64,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

impl PlaybookEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            PlaybookEvent::RunStarted { run_id, .. }
            | PlaybookEvent::RoundStarted { run_id, .. }
            | PlaybookEvent::StepStarted { run_id, .. }
            | PlaybookEvent::StepRetrying { run_id, .. }
            | PlaybookEvent::StepCompleted { run_id, .. }
            | PlaybookEvent::StepFailed { run_id, .. }
            | PlaybookEvent::StepSkipped { run_id, .. }
            | PlaybookEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }

    /// The step this event refers to, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            PlaybookEvent::StepStarted { step_id, .. }
            | PlaybookEvent::StepRetrying { step_id, .. }
            | PlaybookEvent::StepCompleted { step_id, .. }
            | PlaybookEvent::StepFailed { step_id, .. }
            | PlaybookEvent::StepSkipped { step_id, .. } => Some(step_id),
            PlaybookEvent::RunStarted { .. }
            | PlaybookEvent::RoundStarted { .. }
            | PlaybookEvent::RunCompleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failed_serializes_with_tag() {
        let now = Utc::now();
        let event = PlaybookEvent::StepFailed {
            run_id: Uuid::nil(),
            step_id: "fetch".to_string(),
            index: 2,
            error: "connection refused".to_string(),
            error_type: ErrorKind::Network,
            attempts: 3,
            started_at: now,
            completed_at: now,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step_failed\""));
        assert!(json.contains("\"error_type\":\"network\""));
        let parsed: PlaybookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.step_id(), Some("fetch"));
    }

    #[test]
    fn run_level_events_have_no_step() {
        let event = PlaybookEvent::RoundStarted {
            run_id: Uuid::nil(),
            round: 1,
            step_ids: vec!["a".to_string()],
        };
        assert_eq!(event.step_id(), None);
        assert_eq!(event.run_id(), Uuid::nil());
    }
}
