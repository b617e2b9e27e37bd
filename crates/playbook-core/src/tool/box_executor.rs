//! BoxToolExecutor -- object-safe dynamic dispatch wrapper for ToolExecutor.
//!
//! 1. `ToolExecutorDyn` is an object-safe trait with boxed futures
//! 2. Blanket-impl `ToolExecutorDyn` for all `T: ToolExecutor`
//! 3. `BoxToolExecutor` wraps `Box<dyn ToolExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use super::{ToolError, ToolExecutor};

/// Object-safe version of [`ToolExecutor`] with boxed futures.
pub trait ToolExecutorDyn: Send + Sync {
    fn invoke_boxed<'a>(
        &'a self,
        tool_id: &'a str,
        inputs: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;
}

impl<T: ToolExecutor> ToolExecutorDyn for T {
    fn invoke_boxed<'a>(
        &'a self,
        tool_id: &'a str,
        inputs: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
        Box::pin(self.invoke(tool_id, inputs))
    }
}

/// Type-erased tool executor, chosen at runtime.
///
/// `ToolExecutor` uses RPITIT and cannot be a trait object directly, so the
/// scheduler holds this wrapper instead.
pub struct BoxToolExecutor {
    inner: Box<dyn ToolExecutorDyn + Send + Sync>,
}

impl BoxToolExecutor {
    pub fn new<T: ToolExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn invoke(
        &self,
        tool_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        self.inner.invoke_boxed(tool_id, inputs).await
    }
}

impl std::fmt::Debug for BoxToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxToolExecutor").finish_non_exhaustive()
    }
}
