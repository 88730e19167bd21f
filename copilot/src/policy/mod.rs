//! Autonomy Policy Engine
//!
//! Every tool call a persona proposes passes through here before anything
//! runs. The engine is a pure function of (risk tier, autonomy mode, allow-list
//! flag, input contract) and fails closed: anything it cannot positively
//! classify is denied.
//!
//! ```text
//!   ProposedAction ──► evaluate_policy ──► Allow ──► executor ──► ToolCallRecord
//!                                     ├──► Hold  ──► PendingDraft ──► ToolCallRecord
//!                                     └──► Deny  ──────────────────► ToolCallRecord
//! ```

pub mod audit;
pub mod engine;

pub use audit::{AuditLog, SharedAuditLog, ToolCallOutcome, ToolCallRecord};
pub use engine::{AutonomyCapabilities, PolicyEngine, ToolCapability};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::RiskTier;

/// How much the copilot may do without asking.
///
/// Ordered from least to most autonomous.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    #[default]
    Manual,
    Assisted,
    SupervisedAuto,
    FullAuto,
}

impl AutonomyMode {
    pub fn all() -> &'static [AutonomyMode] {
        &[
            Self::Manual,
            Self::Assisted,
            Self::SupervisedAuto,
            Self::FullAuto,
        ]
    }
}

impl std::fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Assisted => write!(f, "assisted"),
            Self::SupervisedAuto => write!(f, "supervised_auto"),
            Self::FullAuto => write!(f, "full_auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown autonomy mode: '{0}'")]
pub struct UnknownAutonomyMode(pub String);

impl std::str::FromStr for AutonomyMode {
    type Err = UnknownAutonomyMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "manual" => Ok(Self::Manual),
            "assisted" => Ok(Self::Assisted),
            "supervised_auto" => Ok(Self::SupervisedAuto),
            "full_auto" => Ok(Self::FullAuto),
            _ => Err(UnknownAutonomyMode(s.to_string())),
        }
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Hold,
    Deny,
}

impl std::fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Hold => write!(f, "hold"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// Decision plus the reason shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub decision: PolicyDecision,
    pub reason: String,
    pub risk_tier: Option<RiskTier>,
    pub autonomy_mode: Option<AutonomyMode>,
}

impl PolicyEvaluation {
    pub fn new(decision: PolicyDecision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
            risk_tier: None,
            autonomy_mode: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::new(PolicyDecision::Deny, reason)
    }

    pub fn with_context(mut self, risk_tier: RiskTier, mode: AutonomyMode) -> Self {
        self.risk_tier = Some(risk_tier);
        self.autonomy_mode = Some(mode);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Outcome '{outcome}' is inconsistent with decision '{decision}'")]
    InconsistentRecord {
        decision: PolicyDecision,
        outcome: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autonomy_ordering() {
        assert!(AutonomyMode::Manual < AutonomyMode::Assisted);
        assert!(AutonomyMode::Assisted < AutonomyMode::SupervisedAuto);
        assert!(AutonomyMode::SupervisedAuto < AutonomyMode::FullAuto);
        assert_eq!(AutonomyMode::default(), AutonomyMode::Manual);
    }

    #[test]
    fn test_autonomy_from_str() {
        for mode in AutonomyMode::all() {
            assert_eq!(mode.to_string().parse::<AutonomyMode>().unwrap(), *mode);
        }
        assert_eq!(
            "Full-Auto".parse::<AutonomyMode>().unwrap(),
            AutonomyMode::FullAuto
        );
        assert!("yolo".parse::<AutonomyMode>().is_err());
        assert!("".parse::<AutonomyMode>().is_err());
    }

    #[test]
    fn test_decision_serde() {
        let json = serde_json::to_string(&PolicyDecision::Hold).unwrap();
        assert_eq!(json, "\"hold\"");
    }
}
