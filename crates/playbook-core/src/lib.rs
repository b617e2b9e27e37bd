//! Playbook execution core.
//!
//! Defines the "ports" (repository traits, tool executor) that the
//! infrastructure layer implements, plus the scheduler, template engine,
//! slot resolver, policy gate and partitioned state store built on them.
//! Depends only on `playbook-types`, never on `playbook-infra` or any
//! database crate.

pub mod event;
pub mod playbook;
pub mod policy;
pub mod repository;
pub mod state;
pub mod tool;
