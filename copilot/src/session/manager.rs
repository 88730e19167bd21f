//! Session registry with per-session serialization.
//!
//! Each session sits behind its own `tokio::sync::Mutex`. A `SessionHandle`
//! owns the guard for the whole of a request, so two invocations against the
//! same session queue in FIFO order and never interleave, while different
//! sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::types::{
    ConversationTurn, DraftId, DraftResolution, PendingDraft, SessionId, SessionState,
    SessionSummary,
};
use super::SessionError;
use crate::ensemble::CopilotResponse;
use crate::events::{CopilotEvent, SharedEventBus};
use crate::memory::{MemoryRecord, MemoryRecordKind, MemoryStore, SharedMemoryStore};
use crate::policy::AutonomyMode;

pub type SharedSessionManager = Arc<SessionManager>;

/// Owns every live session.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionState>>>>,
    memory: SharedMemoryStore,
    events: SharedEventBus,
    draft_ttl: ChronoDuration,
}

impl SessionManager {
    pub fn new(memory: SharedMemoryStore, events: SharedEventBus, draft_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            memory,
            events,
            draft_ttl: ChronoDuration::from_std(draft_ttl)
                .unwrap_or_else(|_| ChronoDuration::weeks(52 * 100)),
        }
    }

    pub fn shared(self) -> SharedSessionManager {
        Arc::new(self)
    }

    /// Create a session and return it already locked.
    pub async fn create(&self, autonomy_mode: AutonomyMode) -> SessionHandle {
        let state = SessionState::new(autonomy_mode);
        let session_id = state.id().to_string();
        let slot = Arc::new(Mutex::new(state));
        // Lock before publishing the slot so nobody can get in first.
        let guard = Arc::clone(&slot).lock_owned().await;

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), slot);

        info!(session_id = %session_id, autonomy = %autonomy_mode, "Session created");
        self.events.publish(CopilotEvent::SessionCreated {
            session_id,
            autonomy_mode,
            timestamp: Utc::now(),
        });

        self.handle(guard)
    }

    /// Lock an existing session, or create one when `session_id` is `None`.
    ///
    /// Returns the handle and whether the session was created. Expired drafts
    /// are swept before the handle is returned.
    pub async fn acquire(
        &self,
        session_id: Option<&str>,
        default_autonomy: AutonomyMode,
    ) -> Result<(SessionHandle, bool), SessionError> {
        let Some(session_id) = session_id else {
            return Ok((self.create(default_autonomy).await, true));
        };

        let slot = self.slot(session_id).await?;
        let guard = slot.lock_owned().await;
        let mut handle = self.handle(guard);
        handle.expire_stale_drafts(Utc::now());
        Ok((handle, false))
    }

    /// Point-in-time copy of a session. Waits for any in-flight request on it.
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionState, SessionError> {
        let slot = self.slot(session_id).await?;
        let state = slot.lock().await;
        Ok(state.clone())
    }

    /// Summaries of sessions not currently locked by a request.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .filter_map(|slot| slot.try_lock().ok().map(|state| state.summary()))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Expire stale drafts across all sessions. Busy sessions are skipped;
    /// they are swept on their next acquire anyway.
    pub async fn sweep_expired_drafts(&self) -> usize {
        let slots: Vec<Arc<Mutex<SessionState>>> =
            self.sessions.read().await.values().cloned().collect();
        let now = Utc::now();
        let mut total = 0;

        for slot in slots {
            let Ok(guard) = slot.try_lock_owned() else {
                continue;
            };
            let mut handle = self.handle(guard);
            total += handle.expire_stale_drafts(now).len();
        }

        if total > 0 {
            info!(expired = total, "Swept expired drafts");
        }
        total
    }

    async fn slot(&self, session_id: &str) -> Result<Arc<Mutex<SessionState>>, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })
    }

    fn handle(&self, guard: OwnedMutexGuard<SessionState>) -> SessionHandle {
        SessionHandle {
            guard,
            memory: Arc::clone(&self.memory),
            events: Arc::clone(&self.events),
            draft_ttl: self.draft_ttl,
        }
    }
}

/// Exclusive access to one session for the duration of a request.
///
/// Dropping the handle releases the session to the next waiter.
pub struct SessionHandle {
    guard: OwnedMutexGuard<SessionState>,
    memory: SharedMemoryStore,
    events: SharedEventBus,
    draft_ttl: ChronoDuration,
}

impl SessionHandle {
    pub fn state(&self) -> &SessionState {
        &self.guard
    }

    pub fn id(&self) -> &str {
        self.guard.id()
    }

    pub fn autonomy_mode(&self) -> AutonomyMode {
        self.guard.autonomy_mode()
    }

    /// Append a turn and write its summary to memory.
    ///
    /// A memory write failure is logged; the turn is kept either way.
    pub async fn append_turn(
        &mut self,
        input: &str,
        response: CopilotResponse,
        tool_call_ids: Vec<String>,
    ) -> ConversationTurn {
        let turn = self.guard.push_turn(input, response, tool_call_ids).clone();

        let summary = format!(
            "Turn {} ({}): {} => {}",
            turn.seq,
            turn.response.mode,
            truncate(input, 200),
            truncate(&turn.response.text, 400)
        );
        let record = MemoryRecord::new(self.guard.id(), MemoryRecordKind::Summary, &summary)
            .with_key(format!("turn-{}", turn.seq));
        if let Err(e) = self.memory.append(record).await {
            warn!(
                session_id = %self.guard.id(),
                seq = turn.seq,
                error = %e,
                "Failed to record turn summary"
            );
        }

        debug!(session_id = %self.guard.id(), seq = turn.seq, "Turn appended");
        turn
    }

    pub fn add_draft(&mut self, draft: PendingDraft) {
        debug!(
            session_id = %self.guard.id(),
            draft_id = %draft.id,
            tool = %draft.action.tool_name,
            "Draft held"
        );
        self.guard.push_draft(draft);
    }

    /// Move a proposed draft to `Confirmed` or `Rejected`, recording the
    /// decision in memory.
    pub async fn resolve_draft(
        &mut self,
        draft_id: &str,
        resolution: DraftResolution,
    ) -> Result<PendingDraft, SessionError> {
        let draft = self.guard.resolve_draft(draft_id, resolution)?;

        let content = format!(
            "Operator {} draft {} for {} with {}",
            draft.status, draft.id, draft.action.tool_name, draft.action.input
        );
        let record = MemoryRecord::new(self.guard.id(), MemoryRecordKind::Decision, &content)
            .with_key(format!("draft-{}", draft.id));
        if let Err(e) = self.memory.append(record).await {
            warn!(
                session_id = %self.guard.id(),
                draft_id = %draft.id,
                error = %e,
                "Failed to record draft decision"
            );
        }

        info!(
            session_id = %self.guard.id(),
            draft_id = %draft.id,
            status = %draft.status,
            "Draft resolved"
        );
        self.events.publish(CopilotEvent::DraftResolved {
            session_id: self.guard.id().to_string(),
            draft_id: draft.id.clone(),
            status: draft.status,
            timestamp: Utc::now(),
        });
        Ok(draft)
    }

    /// Returns the previous mode when it changed.
    pub fn set_autonomy_mode(&mut self, mode: AutonomyMode) -> Option<AutonomyMode> {
        let previous = self.guard.set_autonomy_mode(mode);
        if previous == mode {
            return None;
        }
        info!(session_id = %self.guard.id(), from = %previous, to = %mode, "Autonomy mode changed");
        self.events.publish(CopilotEvent::AutonomyChanged {
            session_id: self.guard.id().to_string(),
            from: previous,
            to: mode,
            timestamp: Utc::now(),
        });
        Some(previous)
    }

    /// Expire drafts older than the configured time-to-live.
    pub fn expire_stale_drafts(&mut self, now: DateTime<Utc>) -> Vec<DraftId> {
        let expired = self.guard.expire_drafts(now, self.draft_ttl);
        if !expired.is_empty() {
            info!(session_id = %self.guard.id(), count = expired.len(), "Drafts expired");
            self.events.publish(CopilotEvent::DraftsExpired {
                session_id: self.guard.id().to_string(),
                draft_ids: expired.clone(),
                timestamp: now,
            });
        }
        expired
    }

    /// Operator-visible label, e.g. the client that opened the session.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.guard.set_metadata(key, value);
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
