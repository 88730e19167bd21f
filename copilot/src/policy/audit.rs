//! Append-only audit trail of tool call decisions.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PolicyDecision, PolicyError};
use crate::persona::PersonaId;

/// What happened to an evaluated tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Executed {
        success: bool,
        payload: Option<Value>,
        error: Option<String>,
    },
    Held {
        draft_id: String,
    },
    Denied,
}

impl ToolCallOutcome {
    pub fn executed(success: bool, payload: Option<Value>, error: Option<String>) -> Self {
        Self::Executed {
            success,
            payload,
            error,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Executed { .. } => "executed",
            Self::Held { .. } => "held",
            Self::Denied => "denied",
        }
    }

    /// Allow pairs with Executed, Hold with Held, Deny with Denied.
    pub fn check_against(&self, decision: PolicyDecision) -> Result<(), PolicyError> {
        let consistent = matches!(
            (decision, self),
            (PolicyDecision::Allow, Self::Executed { .. })
                | (PolicyDecision::Hold, Self::Held { .. })
                | (PolicyDecision::Deny, Self::Denied)
        );
        if consistent {
            Ok(())
        } else {
            Err(PolicyError::InconsistentRecord {
                decision,
                outcome: self.label().to_string(),
            })
        }
    }
}

/// Immutable audit record, built by
/// [`PolicyEngine::create_tool_call_record`](super::PolicyEngine::create_tool_call_record).
/// The log refuses any record whose outcome contradicts its decision, however
/// it was constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub session_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub input: Value,
    pub persona: Option<PersonaId>,
    pub decision: PolicyDecision,
    pub reason: String,
    pub outcome: ToolCallOutcome,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} -> {} ({})",
            self.decision,
            self.tool_name,
            self.outcome.label(),
            self.reason
        )
    }
}

/// Append-only log. Records are returned by value; there is no way to edit
/// or remove one.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: RwLock<Vec<ToolCallRecord>>,
}

pub type SharedAuditLog = Arc<AuditLog>;

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedAuditLog {
        Arc::new(self)
    }

    /// Append `record`. Fails, leaving the log untouched, when its outcome
    /// contradicts its decision.
    pub fn append(&self, record: ToolCallRecord) -> Result<(), PolicyError> {
        record.outcome.check_against(record.decision)?;
        // A poisoned lock still holds every record appended so far.
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    pub fn records(&self) -> Vec<ToolCallRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn records_for_session(&self, session_id: &str) -> Vec<ToolCallRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, record_id: &str) -> Option<ToolCallRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id == record_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
