//! Tool policy gate.
//!
//! A step's policy is evaluated against the step's *resolved* tool ID:
//! allow-list, maximum risk, environment restriction and preview
//! requirement. Every evaluation is recorded in the Decision partition,
//! approved or rejected, before the tool runs.

pub mod glob;

use std::sync::Arc;

use playbook_types::playbook::InteractionMode;
use playbook_types::policy::{Environment, EnvironmentRestriction, RiskLevel, ToolPolicy};
use playbook_types::state::DecisionStatus;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::state::StateRepository;
use crate::state::{StateError, StateStore};
use crate::tool::ToolRegistry;

/// Decision type written for every policy evaluation.
pub const POLICY_DECISION_TYPE: &str = "tool_policy";

/// Verbs whose operations only read. Anything else counts as a write.
const READ_VERBS: &[&str] = &[
    "get", "list", "read", "search", "query", "fetch", "find", "lookup", "describe", "view",
    "show", "count", "check", "status", "inspect", "preview", "browse", "download",
];

/// One reason a policy rejected a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationReason {
    NotAllowed { patterns: Vec<String> },
    RiskExceeded { risk: RiskLevel, max_risk: RiskLevel },
    SandboxOnly { environment: Environment },
    PreviewRequired { interaction: InteractionMode },
}

impl std::fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAllowed { patterns } => {
                write!(f, "tool is not in the allow-list [{}]", patterns.join(", "))
            }
            Self::RiskExceeded { risk, max_risk } => write!(
                f,
                "risk level '{}' exceeds maximum '{}'",
                risk.as_str(),
                max_risk.as_str()
            ),
            Self::SandboxOnly { environment } => write!(
                f,
                "policy is sandbox-only but the engine runs in '{}'",
                environment.as_str()
            ),
            Self::PreviewRequired { interaction } => write!(
                f,
                "write tools require preview or confirm interaction, step is '{}'",
                interaction.as_str()
            ),
        }
    }
}

/// Errors from the policy gate.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(
        "policy '{policy_id}' rejected tool '{tool_id}' (decision {decision_id}): {}",
        join_reasons(.reasons)
    )]
    Violation {
        policy_id: String,
        tool_id: String,
        reasons: Vec<ViolationReason>,
        decision_id: String,
    },

    #[error("failed to record policy decision: {0}")]
    Audit(#[source] StateError),
}

fn join_reasons(reasons: &[ViolationReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// What is being checked.
#[derive(Debug, Clone, Copy)]
pub struct PolicyCheck<'a> {
    pub workspace_id: &'a str,
    pub run_id: Uuid,
    pub step_id: &'a str,
    pub tool_id: &'a str,
    pub interaction: InteractionMode,
}

/// Result of an approved check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyApproval {
    pub decision_id: String,
    pub risk: RiskLevel,
}

/// Infer risk from the verb segment of a tool ID (`github.list_issues`
/// → `list` → read). Unknown verbs are writes.
pub fn infer_risk(tool_id: &str) -> RiskLevel {
    let verb_segment = tool_id.rsplit('.').next().unwrap_or(tool_id);
    let verb = verb_segment
        .split(['_', '-'])
        .next()
        .unwrap_or(verb_segment)
        .to_ascii_lowercase();
    if READ_VERBS.contains(&verb.as_str()) {
        RiskLevel::Read
    } else {
        RiskLevel::Write
    }
}

/// Evaluates tool policies and audits every evaluation.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    registry: Arc<ToolRegistry>,
    environment: Environment,
}

impl PolicyEngine {
    pub fn new(registry: Arc<ToolRegistry>, environment: Environment) -> Self {
        Self {
            registry,
            environment,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Risk of a tool: the registry's declared level, else inferred.
    pub fn risk_of(&self, tool_id: &str) -> RiskLevel {
        self.registry
            .get(tool_id)
            .map(|d| d.risk)
            .unwrap_or_else(|| infer_risk(tool_id))
    }

    /// Pure evaluation: the tool's risk and every violated constraint.
    pub fn evaluate(
        &self,
        policy: &ToolPolicy,
        tool_id: &str,
        interaction: InteractionMode,
    ) -> (RiskLevel, Vec<ViolationReason>) {
        let risk = self.risk_of(tool_id);
        let mut reasons = Vec::new();

        if !glob::allowed_by(&policy.allowed_tools, tool_id) {
            reasons.push(ViolationReason::NotAllowed {
                patterns: policy.allowed_tools.clone(),
            });
        }
        if risk > policy.max_risk {
            reasons.push(ViolationReason::RiskExceeded {
                risk,
                max_risk: policy.max_risk,
            });
        }
        if policy.environment == EnvironmentRestriction::SandboxOnly
            && self.environment == Environment::Production
        {
            reasons.push(ViolationReason::SandboxOnly {
                environment: self.environment,
            });
        }
        if policy.require_preview && risk == RiskLevel::Write && !interaction.previews_writes() {
            reasons.push(ViolationReason::PreviewRequired { interaction });
        }

        (risk, reasons)
    }

    /// Evaluate and record the decision. A rejection is recorded before
    /// `PolicyError::Violation` is returned.
    pub async fn enforce<R: StateRepository>(
        &self,
        state: &StateStore<R>,
        policy: &ToolPolicy,
        check: &PolicyCheck<'_>,
    ) -> Result<PolicyApproval, PolicyError> {
        let (risk, reasons) = self.evaluate(policy, check.tool_id, check.interaction);
        let status = if reasons.is_empty() {
            DecisionStatus::Approved
        } else {
            DecisionStatus::Rejected
        };

        let decision_id = Uuid::now_v7().to_string();
        let data = json!({
            "run_id": check.run_id,
            "step_id": check.step_id,
            "tool_id": check.tool_id,
            "risk": risk.as_str(),
            "max_risk": policy.max_risk.as_str(),
            "environment": self.environment.as_str(),
            "interaction": check.interaction.as_str(),
            "allowed_tools": policy.allowed_tools,
            "reasons": reasons.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        state
            .decisions()
            .record(
                check.workspace_id,
                &format!("policy:{}", policy.id),
                &decision_id,
                POLICY_DECISION_TYPE,
                data,
                status,
            )
            .await
            .map_err(PolicyError::Audit)?;

        if reasons.is_empty() {
            tracing::debug!(
                policy_id = %policy.id,
                tool_id = check.tool_id,
                step_id = check.step_id,
                "policy approved tool"
            );
            Ok(PolicyApproval { decision_id, risk })
        } else {
            tracing::warn!(
                policy_id = %policy.id,
                tool_id = check.tool_id,
                step_id = check.step_id,
                reasons = reasons.len(),
                "policy rejected tool"
            );
            Err(PolicyError::Violation {
                policy_id: policy.id.clone(),
                tool_id: check.tool_id.to_string(),
                reasons,
                decision_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbook_types::policy::ToolDescriptor;

    use crate::repository::memory::InMemoryStateRepository;

    fn engine(environment: Environment) -> PolicyEngine {
        let registry: ToolRegistry = [ToolDescriptor::new("cms.publish_preview", RiskLevel::Read)]
            .into_iter()
            .collect();
        PolicyEngine::new(Arc::new(registry), environment)
    }

    fn check<'a>(tool_id: &'a str, interaction: InteractionMode) -> PolicyCheck<'a> {
        PolicyCheck {
            workspace_id: "w1",
            run_id: Uuid::nil(),
            step_id: "publish",
            tool_id,
            interaction,
        }
    }

    #[test]
    fn risk_inference() {
        assert_eq!(infer_risk("github.list_issues"), RiskLevel::Read);
        assert_eq!(infer_risk("web-search.query"), RiskLevel::Read);
        assert_eq!(infer_risk("github.add_label"), RiskLevel::Write);
        assert_eq!(infer_risk("frobnicate"), RiskLevel::Write);
    }

    #[test]
    fn registry_risk_overrides_inference() {
        let engine = engine(Environment::Sandbox);
        assert_eq!(engine.risk_of("cms.publish_preview"), RiskLevel::Read);
        assert_eq!(engine.risk_of("cms.publish"), RiskLevel::Write);
    }

    #[test]
    fn evaluate_collects_every_reason() {
        let engine = engine(Environment::Production);
        let policy = ToolPolicy {
            id: "strict".into(),
            allowed_tools: vec!["fs.*".into()],
            max_risk: RiskLevel::Read,
            environment: EnvironmentRestriction::SandboxOnly,
            require_preview: true,
        };
        let (risk, reasons) = engine.evaluate(&policy, "cms.publish", InteractionMode::Autonomous);
        assert_eq!(risk, RiskLevel::Write);
        assert_eq!(reasons.len(), 4);

        let (_, reasons) = engine.evaluate(&policy, "fs.read", InteractionMode::Autonomous);
        assert_eq!(
            reasons,
            vec![ViolationReason::SandboxOnly { environment: Environment::Production }]
        );
    }

    #[test]
    fn preview_mode_satisfies_preview_requirement() {
        let engine = engine(Environment::Sandbox);
        let policy = ToolPolicy {
            require_preview: true,
            ..ToolPolicy::permissive("preview")
        };
        let (_, autonomous) = engine.evaluate(&policy, "cms.publish", InteractionMode::Autonomous);
        assert_eq!(autonomous.len(), 1);
        let (_, confirm) = engine.evaluate(&policy, "cms.publish", InteractionMode::Confirm);
        assert!(confirm.is_empty());
        let (_, read) = engine.evaluate(&policy, "cms.list_pages", InteractionMode::Autonomous);
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn approval_is_audited() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let engine = engine(Environment::Sandbox);
        let policy = ToolPolicy::permissive("open");

        let approval = engine
            .enforce(&store, &policy, &check("github.list_issues", InteractionMode::Autonomous))
            .await
            .unwrap();
        assert_eq!(approval.risk, RiskLevel::Read);

        let record = store.decisions().get("w1", &approval.decision_id).await.unwrap().unwrap();
        assert_eq!(record.status, DecisionStatus::Approved);
        assert_eq!(record.policy_id, "open");
        assert_eq!(record.decision_type, POLICY_DECISION_TYPE);
        assert_eq!(record.data["tool_id"], "github.list_issues");
    }

    #[tokio::test]
    async fn rejection_is_audited_then_raised() {
        let store = StateStore::new(InMemoryStateRepository::new());
        let engine = engine(Environment::Sandbox);
        let policy = ToolPolicy {
            allowed_tools: vec!["github.list_*".into()],
            ..ToolPolicy::permissive("readonly")
        };

        let err = engine
            .enforce(&store, &policy, &check("github.add_label", InteractionMode::Autonomous))
            .await
            .unwrap_err();
        let decision_id = match &err {
            PolicyError::Violation { decision_id, reasons, .. } => {
                assert_eq!(reasons.len(), 1);
                decision_id.clone()
            }
            other => panic!("unexpected error: {other:?}"),
        };
        assert!(err.to_string().contains("allow-list"));

        let record = store.decisions().get("w1", &decision_id).await.unwrap().unwrap();
        assert_eq!(record.status, DecisionStatus::Rejected);
        assert_eq!(record.data["reasons"].as_array().unwrap().len(), 1);
    }
}
