//! Playbook execution: definition parsing, dependency graph, templates and
//! the round scheduler.
//!
//! - `definition` -- YAML/JSON parsing and load-time validation
//! - `dag` -- reference extraction, cycle detection, wave preview
//! - `context` -- run context, lookup scope and paths
//! - `expression` -- condition AST
//! - `template` -- step-internal and workflow-mapping template dialects
//! - `loop_handler` -- `for_each` fan-out and aggregation
//! - `retry` -- error classification and retry decisions
//! - `step_runner` -- executes one step
//! - `scheduler` -- round-barrier execution of a whole playbook

pub mod context;
pub mod dag;
pub mod definition;
pub mod expression;
pub mod loop_handler;
pub mod retry;
pub mod scheduler;
pub mod step_runner;
pub mod template;

pub use definition::{PlaybookError, parse_playbook_json, parse_playbook_yaml, validate_playbook};
pub use scheduler::{PlaybookRun, PlaybookScheduler, RunRequest, SchedulerError};
pub use template::{TemplateEngine, TemplateError};
