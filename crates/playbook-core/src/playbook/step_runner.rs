//! Executes one step of a playbook run.
//!
//! `StepRunner` resolves the step's tool (literal or slot), enforces its
//! policy, resolves templates, invokes the tool with retry and timeout
//! (once, or once per `for_each` element), projects declared outputs and
//! records the result in the World partition. The step's `on_error`
//! strategy decides how a failure is recorded and whether the run halts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use playbook_types::event::PlaybookEvent;
use playbook_types::execution::{ErrorKind, StepErrorInfo, StepResult, StepStatus};
use playbook_types::playbook::{ErrorStrategy, StepDefinition, ToolRef};
use playbook_types::slot::SlotScope;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::policy::{PolicyCheck, PolicyEngine, PolicyError};
use crate::repository::slot::SlotMappingRepository;
use crate::repository::state::StateRepository;
use crate::state::StateStore;
use crate::tool::{BoxToolExecutor, SlotError, ToolError, ToolSlotResolver};

use super::context::{ExecutionContext, Scope};
use super::loop_handler::{self, ForEachSource, IterationOutcome};
use super::retry::{RetryHandler, classify};
use super::template::TemplateEngine;

/// World entry type written for step results.
pub const RESULT_ENTRY_TYPE: &str = "result";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Run-level facts every step of a run shares.
#[derive(Debug, Clone, Copy)]
pub struct RunScope<'a> {
    pub run_id: Uuid,
    pub workspace_id: &'a str,
    pub project_id: Option<&'a str>,
    pub ctx: &'a ExecutionContext,
}

/// Result of running one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    /// Whether the run must stop scheduling further rounds.
    pub halt: bool,
}

/// A successful execution, before it is recorded.
struct Executed {
    tool_id: String,
    outputs: Map<String, Value>,
    attempts: u32,
}

/// A failed execution, before the error strategy is applied.
struct Failure {
    error: StepErrorInfo,
    tool_id: Option<String>,
    /// Halts the run regardless of `on_error`.
    fatal: bool,
}

impl Failure {
    fn new(message: impl Into<String>, error_type: ErrorKind) -> Self {
        Self {
            error: StepErrorInfo {
                message: message.into(),
                error_type,
                attempts: 0,
                retries_exhausted: false,
            },
            tool_id: None,
            fatal: false,
        }
    }

    fn from_error(error: StepErrorInfo) -> Self {
        Self {
            error,
            tool_id: None,
            fatal: false,
        }
    }

    fn with_tool(mut self, tool_id: &str) -> Self {
        self.tool_id = Some(tool_id.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes individual playbook steps.
pub struct StepRunner<R: StateRepository, M: SlotMappingRepository> {
    state: Arc<StateStore<R>>,
    resolver: Arc<ToolSlotResolver<M>>,
    policy: PolicyEngine,
    executor: Arc<BoxToolExecutor>,
    templates: TemplateEngine,
    event_bus: EventBus,
    default_timeout: Duration,
}

impl<R: StateRepository, M: SlotMappingRepository> StepRunner<R, M> {
    pub fn new(
        state: Arc<StateStore<R>>,
        resolver: Arc<ToolSlotResolver<M>>,
        policy: PolicyEngine,
        executor: Arc<BoxToolExecutor>,
        templates: TemplateEngine,
        event_bus: EventBus,
        default_timeout: Duration,
    ) -> Self {
        Self {
            state,
            resolver,
            policy,
            executor,
            templates,
            event_bus,
            default_timeout,
        }
    }

    pub fn state(&self) -> &StateStore<R> {
        &self.state
    }

    /// Run a step to a terminal status.
    pub async fn run_step(&self, step: &StepDefinition, index: usize, run: &RunScope<'_>) -> StepOutcome {
        let started_at = Utc::now();
        self.event_bus.publish(PlaybookEvent::StepStarted {
            run_id: run.run_id,
            step_id: step.id.clone(),
            index,
            started_at,
        });
        tracing::debug!(run_id = %run.run_id, step_id = %step.id, index, "step started");

        match self.execute(step, index, run).await {
            Ok(executed) => self.complete(step, index, run, started_at, executed).await,
            Err(failure) => self.fail(step, index, run, started_at, failure),
        }
    }

    async fn complete(
        &self,
        step: &StepDefinition,
        index: usize,
        run: &RunScope<'_>,
        started_at: DateTime<Utc>,
        executed: Executed,
    ) -> StepOutcome {
        let key = format!("{}.{}", run.ctx.playbook_name, step.id);
        if let Err(e) = self
            .state
            .world()
            .add(
                run.workspace_id,
                &format!("tool:{}", executed.tool_id),
                &key,
                Value::Object(executed.outputs.clone()),
                RESULT_ENTRY_TYPE,
            )
            .await
        {
            tracing::warn!(
                run_id = %run.run_id,
                step_id = %step.id,
                error = %e,
                "failed to record step result in world state"
            );
        }

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        self.event_bus.publish(PlaybookEvent::StepCompleted {
            run_id: run.run_id,
            step_id: step.id.clone(),
            index,
            started_at,
            completed_at,
            duration_ms,
        });
        tracing::debug!(
            run_id = %run.run_id,
            step_id = %step.id,
            tool_id = %executed.tool_id,
            attempts = executed.attempts,
            duration_ms,
            "step completed"
        );

        StepOutcome {
            result: StepResult {
                step_id: step.id.clone(),
                index,
                status: StepStatus::Completed,
                outputs: executed.outputs,
                error: None,
                skip_reason: None,
                tool_id: Some(executed.tool_id),
                attempts: executed.attempts,
                started_at: Some(started_at),
                completed_at: Some(completed_at),
            },
            halt: false,
        }
    }

    fn fail(
        &self,
        step: &StepDefinition,
        index: usize,
        run: &RunScope<'_>,
        started_at: DateTime<Utc>,
        failure: Failure,
    ) -> StepOutcome {
        let completed_at = Utc::now();
        let Failure {
            error,
            tool_id,
            fatal,
        } = failure;

        if step.on_error == ErrorStrategy::SkipStep && !fatal {
            let reason = format!("error: {}", error.message);
            self.event_bus.publish(PlaybookEvent::StepSkipped {
                run_id: run.run_id,
                step_id: step.id.clone(),
                index,
                reason: reason.clone(),
                at: completed_at,
            });
            tracing::warn!(
                run_id = %run.run_id,
                step_id = %step.id,
                error = %error.message,
                "step failed, skipped per on_error"
            );
            return StepOutcome {
                result: StepResult {
                    step_id: step.id.clone(),
                    index,
                    status: StepStatus::Skipped,
                    outputs: Map::new(),
                    attempts: error.attempts,
                    error: Some(error),
                    skip_reason: Some(reason),
                    tool_id,
                    started_at: Some(started_at),
                    completed_at: Some(completed_at),
                },
                halt: false,
            };
        }

        let halt = fatal || step.on_error.stops_run();
        self.event_bus.publish(PlaybookEvent::StepFailed {
            run_id: run.run_id,
            step_id: step.id.clone(),
            index,
            error: error.message.clone(),
            error_type: error.error_type,
            attempts: error.attempts,
            started_at,
            completed_at,
        });
        tracing::warn!(
            run_id = %run.run_id,
            step_id = %step.id,
            error = %error.message,
            error_type = %error.error_type,
            attempts = error.attempts,
            halt,
            "step failed"
        );

        StepOutcome {
            result: StepResult {
                step_id: step.id.clone(),
                index,
                status: StepStatus::Failed,
                outputs: Map::new(),
                attempts: error.attempts,
                error: Some(error),
                skip_reason: None,
                tool_id,
                started_at: Some(started_at),
                completed_at: Some(completed_at),
            },
            halt,
        }
    }

    async fn execute(
        &self,
        step: &StepDefinition,
        index: usize,
        run: &RunScope<'_>,
    ) -> Result<Executed, Failure> {
        let tool_id = self.resolve_tool(step, run).await?;

        if let Some(policy) = &step.policy {
            let check = PolicyCheck {
                workspace_id: run.workspace_id,
                run_id: run.run_id,
                step_id: &step.id,
                tool_id: &tool_id,
                interaction: step.interaction,
            };
            self.policy
                .enforce(&self.state, policy, &check)
                .await
                .map_err(|e| {
                    let kind = match &e {
                        PolicyError::Violation { .. } => ErrorKind::Permission,
                        PolicyError::Audit(_) => ErrorKind::Unknown,
                    };
                    Failure::new(e.to_string(), kind).with_tool(&tool_id)
                })?;
        }

        let Some(path) = step.for_each.as_deref() else {
            let (result, attempts) = self
                .invoke_body(step, index, &tool_id, &Scope::new(run.ctx), run.run_id)
                .await;
            return match result {
                Ok(outputs) => Ok(Executed {
                    tool_id,
                    outputs,
                    attempts,
                }),
                Err(error) => Err(Failure::from_error(error).with_tool(&tool_id)),
            };
        };

        let items = ForEachSource::parse(path)
            .and_then(|source| source.resolve(&Scope::new(run.ctx)))
            .ok_or_else(|| {
                let mut failure = Failure::new(
                    format!("for_each '{path}' did not resolve to an array"),
                    ErrorKind::Validation,
                );
                failure.fatal = true;
                failure.with_tool(&tool_id)
            })?;

        tracing::debug!(run_id = %run.run_id, step_id = %step.id, count = items.len(), "for_each fan-out");
        let outcomes = loop_handler::run_iterations(&items, |i, item| {
            let tool_id = tool_id.as_str();
            async move {
                let scope = Scope::with_item(run.ctx, item, i);
                let (result, attempts) = self.invoke_body(step, index, tool_id, &scope, run.run_id).await;
                IterationOutcome {
                    index: i,
                    result: result.map(Value::Object),
                    attempts,
                }
            }
        })
        .await;

        let aggregate = loop_handler::aggregate(outcomes);
        match aggregate.error {
            Some(mut error) => {
                error.attempts = aggregate.attempts;
                Err(Failure::from_error(error).with_tool(&tool_id))
            }
            None => Ok(Executed {
                tool_id,
                outputs: aggregate.outputs,
                attempts: aggregate.attempts,
            }),
        }
    }

    /// Map the step's tool reference to a concrete tool ID.
    async fn resolve_tool(&self, step: &StepDefinition, run: &RunScope<'_>) -> Result<String, Failure> {
        match step.tool_ref() {
            Some(ToolRef::Tool(tool_id)) => Ok(tool_id.to_string()),
            Some(ToolRef::Slot(slot)) => {
                let scope = SlotScope {
                    workspace_id: run.workspace_id.to_string(),
                    project_id: run.project_id.map(str::to_string),
                };
                let resolved = self.resolver.resolve(slot, &scope).await.map_err(|e| {
                    let kind = match &e {
                        SlotError::NotFound { .. } | SlotError::EmptySlot => ErrorKind::NotFound,
                        SlotError::Repository(_) => ErrorKind::Unknown,
                    };
                    Failure::new(e.to_string(), kind)
                })?;
                tracing::debug!(
                    run_id = %run.run_id,
                    step_id = %step.id,
                    slot,
                    tool_id = %resolved.tool_id,
                    source = ?resolved.source,
                    "slot resolved"
                );
                Ok(resolved.tool_id)
            }
            None => Err(Failure::new(
                format!("step '{}' must set exactly one of 'tool' or 'tool_slot'", step.id),
                ErrorKind::Validation,
            )),
        }
    }

    /// Resolve templates and invoke the tool once (with retries). Returns the
    /// projected outputs and the number of invocations made.
    async fn invoke_body(
        &self,
        step: &StepDefinition,
        index: usize,
        tool_id: &str,
        scope: &Scope<'_>,
        run_id: Uuid,
    ) -> (Result<Map<String, Value>, StepErrorInfo>, u32) {
        let inputs = match self.templates.resolve_inputs(step, scope) {
            Ok(inputs) => inputs,
            Err(e) => {
                let error = StepErrorInfo {
                    message: e.to_string(),
                    error_type: ErrorKind::Validation,
                    attempts: 0,
                    retries_exhausted: false,
                };
                return (Err(error), 0);
            }
        };

        let (result, attempts) = self.invoke_with_retry(step, index, tool_id, &inputs, run_id).await;
        (result.map(|value| project_outputs(&step.outputs, value)), attempts)
    }

    async fn invoke_with_retry(
        &self,
        step: &StepDefinition,
        index: usize,
        tool_id: &str,
        inputs: &Map<String, Value>,
        run_id: Uuid,
    ) -> (Result<Value, StepErrorInfo>, u32) {
        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, self.executor.invoke(tool_id, inputs)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::with_kind(
                    format!("tool '{tool_id}' timed out after {}s", timeout.as_secs()),
                    ErrorKind::Timeout,
                )),
            };

            let err = match result {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => err,
            };

            let kind = classify(&err);
            if RetryHandler::should_retry(&step.retry, step.on_error, kind, attempt) {
                let delay_ms = RetryHandler::delay_ms(&step.retry, attempt, err.retry_after_ms);
                tracing::debug!(
                    run_id = %run_id,
                    step_id = %step.id,
                    attempt,
                    error_type = %kind,
                    delay_ms,
                    "retrying step"
                );
                self.event_bus.publish(PlaybookEvent::StepRetrying {
                    run_id,
                    step_id: step.id.clone(),
                    index,
                    attempt,
                    error: err.message.clone(),
                    error_type: kind,
                    delay_ms,
                });
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                continue;
            }

            let error = StepErrorInfo {
                message: err.message,
                error_type: kind,
                attempts: attempt,
                retries_exhausted: RetryHandler::retries_exhausted(&step.retry, step.on_error, attempt),
            };
            return (Err(error), attempt);
        }
    }
}

/// Pick the declared outputs from a tool result. No declared names keeps
/// the whole object; a non-object result is stored under `result`.
pub fn project_outputs(declared: &[String], result: Value) -> Map<String, Value> {
    match result {
        Value::Object(map) if declared.is_empty() => map,
        Value::Object(map) => declared
            .iter()
            .filter_map(|name| map.get(name).map(|v| (name.clone(), v.clone())))
            .collect(),
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}
