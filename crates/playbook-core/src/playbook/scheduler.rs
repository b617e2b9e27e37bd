//! Round-barrier DAG scheduler.
//!
//! Each round computes every pending step whose dependencies have settled,
//! evaluates conditions, runs the ready set concurrently on the current task
//! and waits for all of it. Declared outputs are merged into the shared
//! context only between rounds, so steps of one round never observe each
//! other.
//!
//! # Execution flow
//!
//! 1. Validate the definition and check external producers against the
//!    request's upstream outputs.
//! 2. Register a cancellation token and publish `run_started`.
//! 3. Per round: check cancellation, mark condition-false steps skipped,
//!    run the ready set, merge outputs, halt on a stopping failure.
//! 4. Mark anything still pending as skipped (`cancelled`) and publish
//!    `run_completed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use playbook_types::config::EngineConfig;
use playbook_types::event::PlaybookEvent;
use playbook_types::execution::{RunStatus, StepResult, StepStatus};
use playbook_types::playbook::{PlaybookDefinition, StepDefinition};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::policy::PolicyEngine;
use crate::repository::slot::SlotMappingRepository;
use crate::repository::state::StateRepository;
use crate::state::StateStore;
use crate::tool::{BoxToolExecutor, ToolSlotResolver};

use super::context::{ExecutionContext, Scope};
use super::dag::DependencyGraph;
use super::definition::{PlaybookError, validate_playbook};
use super::expression::Condition;
use super::loop_handler::ForEachSource;
use super::step_runner::{RunScope, StepRunner};
use super::template::TemplateEngine;

/// Skip reason for steps whose condition evaluated false.
pub const SKIP_CONDITION_FALSE: &str = "condition evaluated false";

/// Skip reason for steps that never ran because the run stopped.
pub const SKIP_CANCELLED: &str = "cancelled";

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// Everything a run needs besides the definition.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Run ID to use; a UUIDv7 is generated when absent.
    pub run_id: Option<Uuid>,
    pub workspace_id: String,
    pub project_id: Option<String>,
    /// Plan inputs (`input.*`).
    pub inputs: Map<String, Value>,
    /// Workflow context (`context.*`, `$context.*`).
    pub context: Map<String, Value>,
    /// Outputs of upstream playbooks keyed by producer ID.
    pub upstream: HashMap<String, Map<String, Value>>,
}

impl RunRequest {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ..Self::default()
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_upstream(mut self, producer_id: impl Into<String>, outputs: Map<String, Value>) -> Self {
        self.upstream.insert(producer_id.into(), outputs);
        self
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct PlaybookRun {
    pub run_id: Uuid,
    pub playbook_name: String,
    pub status: RunStatus,
    /// One result per step, in definition order.
    pub step_results: Vec<StepResult>,
    /// Final context: inputs, variables and every merged step output.
    pub context: ExecutionContext,
    /// Step IDs executed in each round, in round order.
    pub rounds: Vec<Vec<String>>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PlaybookRun {
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }

    /// 1-based round a step executed in. `None` for steps that never ran.
    pub fn round_of(&self, step_id: &str) -> Option<usize> {
        self.rounds
            .iter()
            .position(|round| round.iter().any(|id| id == step_id))
            .map(|i| i + 1)
    }

    /// Outputs of a completed step.
    pub fn outputs(&self, step_id: &str) -> Option<&Map<String, Value>> {
        self.context.get_step_outputs(step_id)
    }

    fn count(&self, status: StepStatus) -> usize {
        self.step_results.iter().filter(|r| r.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// SchedulerError
// ---------------------------------------------------------------------------

/// Errors that escape the scheduler. Step failures never do; they are
/// recorded in the run's step results.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Configuration error detected before any step ran.
    #[error("playbook error: {0}")]
    Config(#[from] PlaybookError),

    /// Run not found (for cancel).
    #[error("playbook run not found: {0}")]
    RunNotFound(Uuid),

    /// A run with this ID is already executing.
    #[error("playbook run already running: {0}")]
    AlreadyRunning(Uuid),
}

// ---------------------------------------------------------------------------
// PlaybookScheduler
// ---------------------------------------------------------------------------

/// Executes playbooks round by round.
///
/// Generic over the state and slot-mapping repositories; every collaborator
/// is injected.
pub struct PlaybookScheduler<R: StateRepository, M: SlotMappingRepository> {
    runner: StepRunner<R, M>,
    event_bus: EventBus,
    /// Cancellation tokens keyed by run_id.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: StateRepository, M: SlotMappingRepository> PlaybookScheduler<R, M> {
    pub fn new(
        state: Arc<StateStore<R>>,
        resolver: Arc<ToolSlotResolver<M>>,
        policy: PolicyEngine,
        executor: BoxToolExecutor,
        event_bus: EventBus,
        config: &EngineConfig,
    ) -> Self {
        let runner = StepRunner::new(
            state,
            resolver,
            policy,
            Arc::new(executor),
            TemplateEngine::new(config.template_mode),
            event_bus.clone(),
            Duration::from_secs(config.default_step_timeout_secs),
        );
        Self {
            runner,
            event_bus,
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn state(&self) -> &StateStore<R> {
        self.runner.state()
    }

    /// Request cancellation of a running playbook. Takes effect at the next
    /// round boundary. The run keeps its ID reserved until it returns.
    pub fn cancel(&self, run_id: Uuid) -> Result<(), SchedulerError> {
        match self.cancellation_tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id = %run_id, "playbook run cancelled");
                Ok(())
            }
            None => Err(SchedulerError::RunNotFound(run_id)),
        }
    }

    /// Execute a playbook to completion.
    ///
    /// Only configuration errors detected before any step runs are returned
    /// as `Err`; step failures are part of the returned `PlaybookRun`.
    pub async fn run(
        &self,
        definition: &PlaybookDefinition,
        request: RunRequest,
    ) -> Result<PlaybookRun, SchedulerError> {
        validate_playbook(definition)?;
        let graph = DependencyGraph::build(&definition.steps);
        graph.check_external(|producer| request.upstream.contains_key(producer))?;

        let run_id = request.run_id.unwrap_or_else(Uuid::now_v7);
        let mut ctx = ExecutionContext::new(
            definition.name.clone(),
            run_id,
            request.inputs,
            request.context,
            request.upstream,
        );
        check_input_collections(&definition.steps, &ctx)?;

        let cancel_token = match self.cancellation_tokens.entry(run_id) {
            Entry::Occupied(_) => return Err(SchedulerError::AlreadyRunning(run_id)),
            Entry::Vacant(slot) => slot.insert(CancellationToken::new()).clone(),
        };

        let started_at = Utc::now();
        self.event_bus.publish(PlaybookEvent::RunStarted {
            run_id,
            playbook_name: definition.name.clone(),
            step_count: definition.steps.len(),
            started_at,
        });
        tracing::info!(
            run_id = %run_id,
            playbook = definition.name.as_str(),
            steps = definition.steps.len(),
            "starting playbook run"
        );

        let mut results: HashMap<String, StepResult> = HashMap::new();
        let mut rounds: Vec<Vec<String>> = Vec::new();
        let mut halted = false;
        let mut cancelled = false;
        let mut error: Option<String> = None;

        loop {
            let pending: Vec<(usize, &StepDefinition)> = definition
                .steps
                .iter()
                .enumerate()
                .filter(|(_, step)| !results.contains_key(&step.id))
                .collect();
            if pending.is_empty() {
                break;
            }
            if cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut ready = Vec::new();
            let mut skipped_any = false;
            for (index, step) in pending {
                let settled = graph
                    .dependencies_of(&step.id)
                    .all(|dep| results.contains_key(dep));
                if !settled {
                    continue;
                }
                if !condition_holds(step, &ctx) {
                    let result = StepResult::skipped(&step.id, index, SKIP_CONDITION_FALSE);
                    self.publish_skipped(run_id, &result);
                    tracing::debug!(run_id = %run_id, step_id = %step.id, "condition false, step skipped");
                    results.insert(step.id.clone(), result);
                    skipped_any = true;
                    continue;
                }
                ready.push((index, step));
            }

            if ready.is_empty() {
                if skipped_any {
                    continue;
                }
                let blocked: Vec<&str> = definition
                    .steps
                    .iter()
                    .filter(|s| !results.contains_key(&s.id))
                    .map(|s| s.id.as_str())
                    .collect();
                error = Some(format!(
                    "unsatisfiable dependencies: no step is ready, pending [{}]",
                    blocked.join(", ")
                ));
                halted = true;
                break;
            }

            let round = rounds.len() as u32 + 1;
            let step_ids: Vec<String> = ready.iter().map(|(_, s)| s.id.clone()).collect();
            self.event_bus.publish(PlaybookEvent::RoundStarted {
                run_id,
                round,
                step_ids: step_ids.clone(),
            });
            tracing::debug!(run_id = %run_id, round, steps = ?step_ids, "executing round");
            rounds.push(step_ids);

            let outcomes = {
                let scope = RunScope {
                    run_id,
                    workspace_id: &request.workspace_id,
                    project_id: request.project_id.as_deref(),
                    ctx: &ctx,
                };
                join_all(
                    ready
                        .iter()
                        .map(|(index, step)| self.runner.run_step(step, *index, &scope)),
                )
                .await
            };

            for outcome in outcomes {
                let result = outcome.result;
                if result.status == StepStatus::Completed {
                    ctx.set_step_outputs(&result.step_id, result.outputs.clone());
                }
                if outcome.halt {
                    halted = true;
                    if error.is_none() {
                        let message = result.error.as_ref().map_or("unknown error", |e| e.message.as_str());
                        error = Some(format!("step '{}' failed: {}", result.step_id, message));
                    }
                }
                results.insert(result.step_id.clone(), result);
            }

            if halted {
                break;
            }
        }

        for (index, step) in definition.steps.iter().enumerate() {
            if !results.contains_key(&step.id) {
                let result = StepResult::skipped(&step.id, index, SKIP_CANCELLED);
                self.publish_skipped(run_id, &result);
                results.insert(step.id.clone(), result);
            }
        }
        self.cancellation_tokens.remove(&run_id);

        let status = if cancelled {
            error.get_or_insert_with(|| "cancelled".to_string());
            RunStatus::Cancelled
        } else if halted {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let step_results: Vec<StepResult> = definition
            .steps
            .iter()
            .filter_map(|step| results.remove(&step.id))
            .collect();
        let completed_at = Utc::now();
        let run = PlaybookRun {
            run_id,
            playbook_name: definition.name.clone(),
            status,
            step_results,
            context: ctx,
            rounds,
            error,
            started_at,
            completed_at,
        };

        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        self.event_bus.publish(PlaybookEvent::RunCompleted {
            run_id,
            playbook_name: definition.name.clone(),
            status,
            duration_ms,
            completed: run.count(StepStatus::Completed),
            failed: run.count(StepStatus::Failed),
            skipped: run.count(StepStatus::Skipped),
        });
        tracing::info!(
            run_id = %run_id,
            playbook = definition.name.as_str(),
            status = ?status,
            rounds = run.rounds.len(),
            duration_ms,
            "playbook run finished"
        );

        Ok(run)
    }

    fn publish_skipped(&self, run_id: Uuid, result: &StepResult) {
        self.event_bus.publish(PlaybookEvent::StepSkipped {
            run_id,
            step_id: result.step_id.clone(),
            index: result.index,
            reason: result.skip_reason.clone().unwrap_or_default(),
            at: result.completed_at.unwrap_or_else(Utc::now),
        });
    }
}

/// Conditions are validated at load time; an absent condition always holds.
fn condition_holds(step: &StepDefinition, ctx: &ExecutionContext) -> bool {
    match step.condition.as_deref().map(Condition::parse) {
        None => true,
        Some(Ok(condition)) => condition.is_true(&Scope::new(ctx)),
        Some(Err(_)) => false,
    }
}

/// `input.` collections are known up front and must be arrays.
fn check_input_collections(steps: &[StepDefinition], ctx: &ExecutionContext) -> Result<(), PlaybookError> {
    for step in steps {
        let Some(source @ ForEachSource::Input { .. }) = step.for_each.as_deref().and_then(ForEachSource::parse)
        else {
            continue;
        };
        if source.resolve(&Scope::new(ctx)).is_none() {
            return Err(PlaybookError::NotAnArray {
                step_id: step.id.clone(),
                path: source.path().to_string(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
