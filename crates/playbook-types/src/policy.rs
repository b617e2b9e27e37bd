//! Tool policy types.

use serde::{Deserialize, Serialize};

/// Risk classification of a tool operation. `Read < Write`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Read,
    Write,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Where a policy allows its tools to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentRestriction {
    SandboxOnly,
    #[default]
    ProductionAllowed,
}

/// The environment the engine is running in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

/// Constraints on the resolved tool of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Policy identity; recorded on every decision this policy produces.
    pub id: String,
    /// Anchored `*` / `?` patterns. Empty allows every tool.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Highest risk the tool's operation may have.
    #[serde(default = "default_max_risk")]
    pub max_risk: RiskLevel,
    #[serde(default)]
    pub environment: EnvironmentRestriction,
    /// Write-risk tools must run in a previewing interaction mode.
    #[serde(default)]
    pub require_preview: bool,
}

fn default_max_risk() -> RiskLevel {
    RiskLevel::Write
}

impl ToolPolicy {
    /// A policy that allows everything.
    pub fn permissive(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            allowed_tools: Vec::new(),
            max_risk: RiskLevel::Write,
            environment: EnvironmentRestriction::ProductionAllowed,
            require_preview: false,
        }
    }
}

/// A registered concrete tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolDescriptor {
    pub fn new(id: impl Into<String>, risk: RiskLevel) -> Self {
        Self {
            id: id.into(),
            risk,
            description: None,
        }
    }
}
