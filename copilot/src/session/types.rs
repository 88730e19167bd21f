//! Session state and its records
//!
//! `SessionState` fields are private. Reads go through getters; writes are
//! crate-internal and reached only through a `SessionHandle`, so turn history
//! stays append-only and drafts only move forward.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::SessionError;
use crate::ensemble::{CopilotResponse, ProposedAction};
use crate::policy::AutonomyMode;
use crate::runtime::ArtefactDiff;

/// Unique identifier for sessions
pub type SessionId = String;

/// Unique identifier for drafts; doubles as the confirmation handle
pub type DraftId = String;

/// Lifecycle of a held tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Waiting for the operator
    Proposed,
    /// Operator approved; executed once
    Confirmed,
    /// Operator declined; never executed
    Rejected,
    /// Passed its time-to-live without a decision
    Expired,
}

impl DraftStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Proposed)
    }
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposed => write!(f, "proposed"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Operator decision on a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftResolution {
    Confirm,
    Reject,
}

impl DraftResolution {
    fn status(self) -> DraftStatus {
        match self {
            Self::Confirm => DraftStatus::Confirmed,
            Self::Reject => DraftStatus::Rejected,
        }
    }
}

/// A tool call held for operator confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDraft {
    /// Confirmation handle
    pub id: DraftId,

    pub session_id: SessionId,

    /// The call as proposed, with provenance
    pub action: ProposedAction,

    /// Why the policy engine held it
    pub reason: String,

    /// Diff preview for artefact-mutating tools
    pub preview: Option<ArtefactDiff>,

    pub status: DraftStatus,

    pub created_at: DateTime<Utc>,

    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingDraft {
    pub fn new(session_id: &str, action: ProposedAction, reason: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            action,
            reason: reason.into(),
            preview: None,
            status: DraftStatus::Proposed,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_preview(mut self, preview: ArtefactDiff) -> Self {
        self.preview = Some(preview);
        self
    }
}

/// One completed request/response exchange. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Position in the session, starting at 0
    pub seq: u64,

    pub input: String,

    pub response: CopilotResponse,

    /// Audit records produced during this turn
    pub tool_call_ids: Vec<String>,

    pub timestamp: DateTime<Utc>,
}

/// Everything the copilot knows about one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    id: SessionId,
    turns: Vec<ConversationTurn>,
    pending_drafts: Vec<PendingDraft>,
    resolved_drafts: Vec<PendingDraft>,
    autonomy_mode: AutonomyMode,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
}

impl SessionState {
    pub fn new(autonomy_mode: AutonomyMode) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turns: Vec::new(),
            pending_drafts: Vec::new(),
            resolved_drafts: Vec::new(),
            autonomy_mode,
            created_at: now,
            last_activity: now,
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Turn history, oldest first
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn pending_drafts(&self) -> &[PendingDraft] {
        &self.pending_drafts
    }

    pub fn resolved_drafts(&self) -> &[PendingDraft] {
        &self.resolved_drafts
    }

    pub fn autonomy_mode(&self) -> AutonomyMode {
        self.autonomy_mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Look up a draft whether pending or resolved.
    pub fn draft(&self, draft_id: &str) -> Option<&PendingDraft> {
        self.pending_drafts
            .iter()
            .chain(self.resolved_drafts.iter())
            .find(|d| d.id == draft_id)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            autonomy_mode: self.autonomy_mode,
            turns: self.turns.len(),
            pending_drafts: self.pending_drafts.len(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    // =========================================================================
    // Crate-internal mutation (SessionHandle only)
    // =========================================================================

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub(crate) fn push_turn(
        &mut self,
        input: &str,
        response: CopilotResponse,
        tool_call_ids: Vec<String>,
    ) -> &ConversationTurn {
        let seq = self.turns.len() as u64;
        self.turns.push(ConversationTurn {
            seq,
            input: input.to_string(),
            response,
            tool_call_ids,
            timestamp: Utc::now(),
        });
        self.touch();
        &self.turns[self.turns.len() - 1]
    }

    pub(crate) fn push_draft(&mut self, draft: PendingDraft) {
        self.pending_drafts.push(draft);
        self.touch();
    }

    /// One-way transition out of `Proposed`.
    pub(crate) fn resolve_draft(
        &mut self,
        draft_id: &str,
        resolution: DraftResolution,
    ) -> Result<PendingDraft, SessionError> {
        let Some(idx) = self.pending_drafts.iter().position(|d| d.id == draft_id) else {
            return Err(match self.resolved_drafts.iter().find(|d| d.id == draft_id) {
                Some(resolved) => SessionError::DraftAlreadyResolved {
                    draft_id: draft_id.to_string(),
                    status: resolved.status,
                },
                None => SessionError::DraftNotFound {
                    draft_id: draft_id.to_string(),
                },
            });
        };

        let mut draft = self.pending_drafts.remove(idx);
        draft.status = resolution.status();
        draft.resolved_at = Some(Utc::now());
        self.resolved_drafts.push(draft.clone());
        self.touch();
        Ok(draft)
    }

    /// Expire drafts created before `now - ttl`. Returns the expired ids.
    pub(crate) fn expire_drafts(
        &mut self,
        now: DateTime<Utc>,
        ttl: ChronoDuration,
    ) -> Vec<DraftId> {
        let cutoff = now - ttl;
        let (expired, kept): (Vec<PendingDraft>, Vec<PendingDraft>) = self
            .pending_drafts
            .drain(..)
            .partition(|d| d.created_at <= cutoff);
        self.pending_drafts = kept;

        let ids = expired.iter().map(|d| d.id.clone()).collect();
        for mut draft in expired {
            draft.status = DraftStatus::Expired;
            draft.resolved_at = Some(now);
            self.resolved_drafts.push(draft);
        }
        ids
    }

    pub(crate) fn set_autonomy_mode(&mut self, mode: AutonomyMode) -> AutonomyMode {
        let previous = self.autonomy_mode;
        self.autonomy_mode = mode;
        self.touch();
        previous
    }

    pub(crate) fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }
}

/// Listing entry for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub autonomy_mode: AutonomyMode,
    pub turns: usize,
    pub pending_drafts: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
