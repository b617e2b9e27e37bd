//! Tool invocation boundary.
//!
//! The core only knows "invoke resolved tool id with inputs, get back a
//! result or an error". `ToolExecutor` is that boundary; `ToolRegistry`
//! describes the concrete tools that exist; `slot_resolver` maps logical
//! slot names onto them.

pub mod box_executor;
pub mod registry;
pub mod slot_resolver;

use playbook_types::execution::ErrorKind;
use serde_json::{Map, Value};
use thiserror::Error;

pub use box_executor::BoxToolExecutor;
pub use registry::ToolRegistry;
pub use slot_resolver::{SlotError, SlotExplanation, ToolSlotResolver};

/// Error returned by a tool invocation.
///
/// Tools may attach an explicit `kind`; otherwise the message is classified
/// by keyword when the step runner decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    pub kind: Option<ErrorKind>,
    /// Server-supplied wait hint for rate limits.
    pub retry_after_ms: Option<u64>,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            retry_after_ms: None,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(message)
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self {
            kind: Some(ErrorKind::RateLimit),
            retry_after_ms,
            ..Self::new(message)
        }
    }
}

/// Executes concrete tools.
///
/// Implementations live outside the core (connectors, LLM calls, sandboxed
/// agents). Uses RPITIT; wrap in [`BoxToolExecutor`] for dynamic dispatch.
pub trait ToolExecutor: Send + Sync {
    /// Invoke `tool_id` with resolved inputs.
    fn invoke(
        &self,
        tool_id: &str,
        inputs: &Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<Value, ToolError>> + Send;
}
