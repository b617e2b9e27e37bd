//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `config.toml` that controls template
//! strictness, the runtime environment, timeouts and storage location.

use serde::{Deserialize, Serialize};

use crate::policy::Environment;

/// How unresolvable template references are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    /// Leave the reference as literal text and log it.
    #[default]
    Lenient,
    /// Fail the owning step.
    Strict,
}

/// Top-level configuration for the execution core. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub template_mode: TemplateMode,

    /// Environment checked against policy restrictions.
    #[serde(default)]
    pub environment: Environment,

    /// Per-attempt timeout when a step does not set one.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Connector names recognised in two-segment `connector.verb` tool IDs.
    #[serde(default = "default_known_connectors")]
    pub known_connectors: Vec<String>,

    /// SQLite URL; falls back to the data directory default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_known_connectors() -> Vec<String> {
    [
        "github", "gitlab", "slack", "gmail", "notion", "jira", "linear", "http", "fs",
        "cms", "llm", "sql", "s3",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_mode: TemplateMode::default(),
            environment: Environment::default(),
            default_step_timeout_secs: default_step_timeout_secs(),
            event_bus_capacity: default_event_bus_capacity(),
            known_connectors: default_known_connectors(),
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.template_mode, TemplateMode::Lenient);
        assert_eq!(config.environment, Environment::Sandbox);
        assert_eq!(config.default_step_timeout_secs, 300);
        assert!(config.known_connectors.iter().any(|c| c == "github"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
template_mode = "strict"
environment = "production"
"#,
        )
        .unwrap();
        assert_eq!(config.template_mode, TemplateMode::Strict);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.event_bus_capacity, 1024);
        assert!(config.database_url.is_none());
    }
}
