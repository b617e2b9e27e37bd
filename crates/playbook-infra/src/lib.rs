//! Infrastructure layer for the playbook execution core.
//!
//! Contains implementations of the repository traits defined in `playbook-core`
//! (SQLite slot mappings and the partitioned state store) and the
//! `config.toml` loader.

pub mod config;
pub mod sqlite;
