//! Event types for copilot lifecycle notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ensemble::ResolutionStrategy;
use crate::persona::PersonaId;
use crate::policy::{AutonomyMode, PolicyDecision};
use crate::router::ConversationMode;
use crate::session::DraftStatus;

/// All copilot lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CopilotEvent {
    /// A session was created
    SessionCreated {
        session_id: String,
        autonomy_mode: AutonomyMode,
        timestamp: DateTime<Utc>,
    },

    /// The session's autonomy mode changed
    AutonomyChanged {
        session_id: String,
        from: AutonomyMode,
        to: AutonomyMode,
        timestamp: DateTime<Utc>,
    },

    /// A deliberation finished and produced a response
    DeliberationCompleted {
        session_id: String,
        deliberation_id: String,
        mode: ConversationMode,
        strategy: ResolutionStrategy,
        cited_personas: Vec<PersonaId>,
        failed_personas: Vec<PersonaId>,
        challenges: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Personas disagreed
    ChallengeDetected {
        session_id: String,
        deliberation_id: String,
        challenge_id: String,
        personas: Vec<PersonaId>,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// A proposed tool call went through the policy engine
    ToolCallEvaluated {
        session_id: String,
        record_id: String,
        tool_name: String,
        persona: Option<PersonaId>,
        decision: PolicyDecision,
        timestamp: DateTime<Utc>,
    },

    /// A held call is waiting for confirmation
    DraftCreated {
        session_id: String,
        draft_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// An operator confirmed or rejected a draft
    DraftResolved {
        session_id: String,
        draft_id: String,
        status: DraftStatus,
        timestamp: DateTime<Utc>,
    },

    /// Drafts passed their time-to-live
    DraftsExpired {
        session_id: String,
        draft_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl CopilotEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SessionCreated { timestamp, .. }
            | Self::AutonomyChanged { timestamp, .. }
            | Self::DeliberationCompleted { timestamp, .. }
            | Self::ChallengeDetected { timestamp, .. }
            | Self::ToolCallEvaluated { timestamp, .. }
            | Self::DraftCreated { timestamp, .. }
            | Self::DraftResolved { timestamp, .. }
            | Self::DraftsExpired { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::AutonomyChanged { .. } => "autonomy_changed",
            Self::DeliberationCompleted { .. } => "deliberation_completed",
            Self::ChallengeDetected { .. } => "challenge_detected",
            Self::ToolCallEvaluated { .. } => "tool_call_evaluated",
            Self::DraftCreated { .. } => "draft_created",
            Self::DraftResolved { .. } => "draft_resolved",
            Self::DraftsExpired { .. } => "drafts_expired",
        }
    }

    /// Every event is session-scoped.
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::AutonomyChanged { session_id, .. }
            | Self::DeliberationCompleted { session_id, .. }
            | Self::ChallengeDetected { session_id, .. }
            | Self::ToolCallEvaluated { session_id, .. }
            | Self::DraftCreated { session_id, .. }
            | Self::DraftResolved { session_id, .. }
            | Self::DraftsExpired { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_tag() {
        let event = CopilotEvent::DraftResolved {
            session_id: "s-1".into(),
            draft_id: "d-1".into(),
            status: DraftStatus::Confirmed,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "draft_resolved");
        assert_eq!(json["status"], "confirmed");
        assert_eq!(event.event_type(), "draft_resolved");
        assert_eq!(event.session_id(), "s-1");

        let back: CopilotEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "draft_resolved");
    }
}
