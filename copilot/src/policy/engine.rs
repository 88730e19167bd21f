//! Decision table and evaluation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::audit::{ToolCallOutcome, ToolCallRecord};
use super::{AutonomyMode, PolicyDecision, PolicyError, PolicyEvaluation};
use crate::tools::{McpToolDefinition, RiskTier, ToolCall, ToolCatalogue};

/// (tier, mode, decision, reason). High/FullAuto is further gated by the
/// per-tool allow-list in [`decide`].
const DECISION_TABLE: &[(RiskTier, AutonomyMode, PolicyDecision, &str)] = &[
    (
        RiskTier::Low,
        AutonomyMode::Manual,
        PolicyDecision::Hold,
        "manual mode holds every tool call for confirmation",
    ),
    (
        RiskTier::Low,
        AutonomyMode::Assisted,
        PolicyDecision::Allow,
        "low-risk tool runs in assisted mode",
    ),
    (
        RiskTier::Low,
        AutonomyMode::SupervisedAuto,
        PolicyDecision::Allow,
        "low-risk tool runs in supervised-auto mode",
    ),
    (
        RiskTier::Low,
        AutonomyMode::FullAuto,
        PolicyDecision::Allow,
        "low-risk tool runs in full-auto mode",
    ),
    (
        RiskTier::Medium,
        AutonomyMode::Manual,
        PolicyDecision::Hold,
        "manual mode holds every tool call for confirmation",
    ),
    (
        RiskTier::Medium,
        AutonomyMode::Assisted,
        PolicyDecision::Hold,
        "medium-risk tool needs confirmation in assisted mode",
    ),
    (
        RiskTier::Medium,
        AutonomyMode::SupervisedAuto,
        PolicyDecision::Allow,
        "medium-risk tool runs in supervised-auto mode",
    ),
    (
        RiskTier::Medium,
        AutonomyMode::FullAuto,
        PolicyDecision::Allow,
        "medium-risk tool runs in full-auto mode",
    ),
    (
        RiskTier::High,
        AutonomyMode::Manual,
        PolicyDecision::Hold,
        "manual mode holds every tool call for confirmation",
    ),
    (
        RiskTier::High,
        AutonomyMode::Assisted,
        PolicyDecision::Hold,
        "high-risk tool needs confirmation",
    ),
    (
        RiskTier::High,
        AutonomyMode::SupervisedAuto,
        PolicyDecision::Hold,
        "high-risk tool needs confirmation",
    ),
    (
        RiskTier::High,
        AutonomyMode::FullAuto,
        PolicyDecision::Deny,
        "high-risk tool is not allow-listed for full-auto",
    ),
];

fn decide(definition: &McpToolDefinition, mode: AutonomyMode) -> PolicyEvaluation {
    if definition.risk_tier == RiskTier::High
        && mode == AutonomyMode::FullAuto
        && definition.full_auto_allowed
    {
        return PolicyEvaluation::new(
            PolicyDecision::Allow,
            "high-risk tool is allow-listed for full-auto",
        )
        .with_context(definition.risk_tier, mode);
    }

    DECISION_TABLE
        .iter()
        .find(|(tier, m, _, _)| *tier == definition.risk_tier && *m == mode)
        .map(|(_, _, decision, reason)| PolicyEvaluation::new(*decision, *reason))
        .unwrap_or_else(|| {
            PolicyEvaluation::deny(format!(
                "risk tier '{}' is not recognised",
                definition.risk_tier
            ))
        })
        .with_context(definition.risk_tier, mode)
}

/// One tool's standing under an autonomy mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapability {
    pub tool_name: String,
    pub description: String,
    pub risk_tier: RiskTier,
    pub reason: String,
}

/// What the copilot may do under one autonomy mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyCapabilities {
    pub mode: AutonomyMode,
    pub allowed: Vec<ToolCapability>,
    pub held: Vec<ToolCapability>,
    pub denied: Vec<ToolCapability>,
}

impl AutonomyCapabilities {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} allowed, {} held, {} denied",
            self.mode,
            self.allowed.len(),
            self.held.len(),
            self.denied.len()
        )
    }
}

/// Stateless policy engine over a frozen catalogue.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    catalogue: Arc<ToolCatalogue>,
}

impl PolicyEngine {
    pub fn new(catalogue: Arc<ToolCatalogue>) -> Self {
        Self { catalogue }
    }

    pub fn catalogue(&self) -> &ToolCatalogue {
        &self.catalogue
    }

    /// Decide whether `call` may run under `mode`.
    ///
    /// Denies when the definition is missing, names a different tool, has an
    /// unknown tier, or when the input breaks the tool's contract.
    pub fn evaluate_policy(
        call: &ToolCall,
        mode: AutonomyMode,
        definition: Option<&McpToolDefinition>,
    ) -> PolicyEvaluation {
        let Some(definition) = definition else {
            return PolicyEvaluation::deny(format!(
                "tool '{}' is not in the catalogue",
                call.tool_name
            ));
        };

        if definition.name != call.tool_name {
            return PolicyEvaluation::deny(format!(
                "definition '{}' does not match call to '{}'",
                definition.name, call.tool_name
            ));
        }

        if let Err(violation) = definition.validate_input(&call.input) {
            return PolicyEvaluation::deny(format!("input rejected: {violation}"))
                .with_context(definition.risk_tier, mode);
        }

        let evaluation = decide(definition, mode);
        debug!(
            tool = %call.tool_name,
            mode = %mode,
            tier = %definition.risk_tier,
            decision = %evaluation.decision,
            "Evaluated tool call"
        );
        evaluation
    }

    /// As [`Self::evaluate_policy`], with the mode still an unparsed tag.
    pub fn evaluate_tagged(
        call: &ToolCall,
        mode_tag: &str,
        definition: Option<&McpToolDefinition>,
    ) -> PolicyEvaluation {
        match mode_tag.parse::<AutonomyMode>() {
            Ok(mode) => Self::evaluate_policy(call, mode, definition),
            Err(e) => PolicyEvaluation::deny(e.to_string()),
        }
    }

    /// Look the call's tool up in this engine's catalogue and evaluate.
    pub fn evaluate(&self, call: &ToolCall, mode: AutonomyMode) -> PolicyEvaluation {
        Self::evaluate_policy(call, mode, self.catalogue.get(&call.tool_name))
    }

    /// Build the audit record for an evaluated call.
    ///
    /// Fails when the outcome contradicts the decision.
    pub fn create_tool_call_record(
        session_id: &str,
        call: &ToolCall,
        evaluation: &PolicyEvaluation,
        outcome: ToolCallOutcome,
    ) -> Result<ToolCallRecord, PolicyError> {
        outcome.check_against(evaluation.decision)?;

        Ok(ToolCallRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
            persona: call.persona,
            decision: evaluation.decision,
            reason: evaluation.reason.clone(),
            outcome,
            timestamp: chrono::Utc::now(),
        })
    }

    /// List what each catalogue tool would get under `mode`.
    pub fn describe_autonomy_capabilities(&self, mode: AutonomyMode) -> AutonomyCapabilities {
        let mut capabilities = AutonomyCapabilities {
            mode,
            allowed: Vec::new(),
            held: Vec::new(),
            denied: Vec::new(),
        };

        for definition in self.catalogue.iter() {
            let evaluation = decide(definition, mode);
            let entry = ToolCapability {
                tool_name: definition.name.clone(),
                description: definition.description.clone(),
                risk_tier: definition.risk_tier,
                reason: evaluation.reason,
            };
            match evaluation.decision {
                PolicyDecision::Allow => capabilities.allowed.push(entry),
                PolicyDecision::Hold => capabilities.held.push(entry),
                PolicyDecision::Deny => capabilities.denied.push(entry),
            }
        }

        capabilities
    }
}
