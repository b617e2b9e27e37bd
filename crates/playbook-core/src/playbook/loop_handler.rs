//! `for_each` fan-out.
//!
//! A loop step runs its body once per element of an array, concurrently on
//! the current task, with `item` and `index` bound. Iteration failures are
//! recorded inline and never cancel siblings; the step fails only when every
//! iteration failed.

use std::future::Future;

use futures_util::future::join_all;
use playbook_types::execution::StepErrorInfo;
use serde_json::{Map, Value, json};

use super::context::Scope;

// ---------------------------------------------------------------------------
// Collection source
// ---------------------------------------------------------------------------

/// Where a `for_each` collection comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForEachSource {
    /// `input.<name>[...]`: known before the run starts.
    Input { path: String },
    /// `step.<id>[.field]`: output of a sibling step.
    Step { step_id: String, path: String },
}

impl ForEachSource {
    /// Parse a `for_each` path. `None` for unsupported roots.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        let (root, rest) = path.split_once('.')?;
        match root {
            "input" | "inputs" if !rest.is_empty() => Some(Self::Input {
                path: path.to_string(),
            }),
            "step" | "steps" => {
                let step_id = rest.split(['.', '[']).next().unwrap_or_default();
                if step_id.is_empty() {
                    return None;
                }
                Some(Self::Step {
                    step_id: step_id.to_string(),
                    path: path.to_string(),
                })
            }
            _ => None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Input { path } | Self::Step { path, .. } => path,
        }
    }

    /// Resolve the collection. `None` when the path is missing or not an array.
    pub fn resolve(&self, scope: &Scope<'_>) -> Option<Vec<Value>> {
        match scope.lookup(self.path())? {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Iterations
// ---------------------------------------------------------------------------

/// Outcome of one body invocation.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub index: usize,
    pub result: Result<Value, StepErrorInfo>,
    /// Tool invocations made by this iteration.
    pub attempts: u32,
}

/// Aggregated loop result.
#[derive(Debug, Clone)]
pub struct LoopAggregate {
    /// `results`, `count` and (for non-empty loops) `success_count`.
    pub outputs: Map<String, Value>,
    pub success_count: usize,
    pub attempts: u32,
    /// Error of the last failed iteration, when every iteration failed.
    pub error: Option<StepErrorInfo>,
}

/// Run `body` once per item, all iterations driven concurrently.
pub async fn run_iterations<'a, F, Fut>(items: &'a [Value], body: F) -> Vec<IterationOutcome>
where
    F: Fn(usize, &'a Value) -> Fut,
    Fut: Future<Output = IterationOutcome>,
{
    join_all(items.iter().enumerate().map(|(index, item)| body(index, item))).await
}

/// Build the loop output from iteration outcomes (in index order).
pub fn aggregate(mut outcomes: Vec<IterationOutcome>) -> LoopAggregate {
    if outcomes.is_empty() {
        let mut outputs = Map::new();
        outputs.insert("results".to_string(), json!([]));
        outputs.insert("count".to_string(), json!(0));
        return LoopAggregate {
            outputs,
            success_count: 0,
            attempts: 0,
            error: None,
        };
    }

    outcomes.sort_by_key(|o| o.index);
    let count = outcomes.len();
    let attempts = outcomes.iter().map(|o| o.attempts).sum();
    let mut success_count = 0;
    let mut last_error = None;

    let results: Vec<Value> = outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(output) => {
                success_count += 1;
                json!({ "index": outcome.index, "status": "completed", "output": output })
            }
            Err(error) => {
                let entry = json!({ "index": outcome.index, "status": "failed", "error": &error });
                last_error = Some(error);
                entry
            }
        })
        .collect();

    let mut outputs = Map::new();
    outputs.insert("results".to_string(), Value::Array(results));
    outputs.insert("count".to_string(), json!(count));
    outputs.insert("success_count".to_string(), json!(success_count));

    LoopAggregate {
        outputs,
        success_count,
        attempts,
        error: if success_count == 0 { last_error } else { None },
    }
}
