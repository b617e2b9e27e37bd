//! Shared domain types for the playbook execution core.
//!
//! Playbook and step definitions, execution results, tool slot mappings,
//! tool policies, state store records, lifecycle events and engine
//! configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod playbook;
pub mod policy;
pub mod slot;
pub mod state;
