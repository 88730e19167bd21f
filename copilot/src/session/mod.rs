//! Session Manager
//!
//! Sole authority over conversation state. Every mutation of a session goes
//! through a [`SessionHandle`], which holds that session's lock for the life
//! of one request.
//!
//! # Draft lifecycle
//!
//! ```text
//! Proposed ──► Confirmed
//!    │  └────► Rejected
//!    └───────► Expired   (time-to-live, swept on acquire)
//! ```
//!
//! Transitions are one-way; resolving a draft twice is an error.

pub mod manager;
pub mod types;

pub use manager::{SessionHandle, SessionManager, SharedSessionManager};
pub use types::{
    ConversationTurn, DraftId, DraftResolution, DraftStatus, PendingDraft, SessionId,
    SessionState, SessionSummary,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session: {session_id}")]
    UnknownSession { session_id: String },

    #[error("draft not found: {draft_id}")]
    DraftNotFound { draft_id: String },

    #[error("draft {draft_id} already {status}")]
    DraftAlreadyResolved { draft_id: String, status: DraftStatus },
}
