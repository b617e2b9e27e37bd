//! Observability for the playbook execution core.
//!
//! Installs the global `tracing` subscriber used by the scheduler, step
//! runner and repositories, optionally bridged to OpenTelemetry.

pub mod tracing_setup;
