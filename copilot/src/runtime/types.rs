//! Request, response and health types for the runtime boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ensemble::Challenge;
use crate::persona::PersonaId;
use crate::policy::ToolCallRecord;
use crate::router::ConversationMode;
use crate::session::{PendingDraft, SessionId};

/// One operator message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Existing session to continue; `None` starts a new one.
    #[serde(default)]
    pub session_id: Option<SessionId>,

    pub input: String,

    /// Autonomy override as an unparsed tag. Applied to the session before
    /// deliberation; unknown tags are rejected.
    #[serde(default)]
    pub autonomy_mode: Option<String>,
}

impl InvokeRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            session_id: None,
            input: input.into(),
            autonomy_mode: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_autonomy(mut self, mode: impl Into<String>) -> Self {
        self.autonomy_mode = Some(mode.into());
        self
    }
}

/// A proposed call the policy engine refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeniedAction {
    pub tool_name: String,
    pub input: Value,
    pub proposed_by: Vec<PersonaId>,
    pub reason: String,
    /// Audit record for the denial
    pub record_id: String,
}

/// Result of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub session_id: SessionId,

    /// True when this invocation created the session
    pub session_created: bool,

    pub deliberation_id: String,

    pub text: String,

    pub mode: ConversationMode,

    /// Personas whose contributions made it into the text, in priority order
    pub cited_personas: Vec<PersonaId>,

    /// Calls that ran during this turn
    pub executed: Vec<ToolCallRecord>,

    /// Calls waiting for confirmation
    pub held: Vec<PendingDraft>,

    pub denied: Vec<DeniedAction>,

    pub unresolved_challenges: Vec<Challenge>,
}

impl InvokeResponse {
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} personas, {} executed, {} held, {} denied, {} open challenges",
            self.mode,
            self.cited_personas.len(),
            self.executed.len(),
            self.held.len(),
            self.denied.len(),
            self.unresolved_challenges.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Serving, with reduced quality (e.g. no memory)
    Degraded,
    /// Cannot deliberate
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorHealth {
    pub name: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub collaborators: Vec<CollaboratorHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthResponse {
    pub fn collaborator(&self, name: &str) -> Option<&CollaboratorHealth> {
        self.collaborators.iter().find(|c| c.name == name)
    }
}
