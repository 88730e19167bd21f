//! Copilot runtime: the entry point that ties sessions, deliberation, policy
//! and execution together.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::artefacts::{ArtefactDiff, ArtefactEdit, ArtefactService, SharedArtefactService};
use super::executor::{SharedToolExecutor, ToolExecutionContext, ToolExecutor, ToolResult};
use super::types::{
    CollaboratorHealth, DeniedAction, HealthResponse, HealthStatus, InvokeRequest, InvokeResponse,
};
use crate::config::EnsembleConfig;
use crate::ensemble::{
    DeliberationOutcome, EnsembleOrchestrator, ProposedAction, SharedReasoningService,
};
use crate::error::{CopilotError, CopilotResult};
use crate::events::{CopilotEvent, EventBus, EventFilter, FilteredReceiver, SharedEventBus};
use crate::memory::{InMemoryMemoryStore, MemoryStore, SharedMemoryStore};
use crate::persona::PersonaRegistry;
use crate::policy::{
    AuditLog, AutonomyCapabilities, AutonomyMode, PolicyDecision, PolicyEngine, PolicyEvaluation,
    SharedAuditLog, ToolCallOutcome, ToolCallRecord,
};
use crate::session::{
    DraftResolution, PendingDraft, SessionHandle, SessionId, SessionManager, SessionState,
    SessionSummary, SharedSessionManager,
};
use crate::tools::{ToolCall, ToolCatalogue};

const CONFIRMED_REASON: &str = "confirmed by operator";

/// Builder for [`CopilotRuntime`].
pub struct CopilotRuntimeBuilder {
    config: EnsembleConfig,
    reasoning: SharedReasoningService,
    executor: SharedToolExecutor,
    catalogue: Option<ToolCatalogue>,
    memory: Option<SharedMemoryStore>,
    artefacts: Option<SharedArtefactService>,
    events: Option<SharedEventBus>,
    default_autonomy: AutonomyMode,
}

impl CopilotRuntimeBuilder {
    pub fn new(reasoning: SharedReasoningService, executor: SharedToolExecutor) -> Self {
        Self {
            config: EnsembleConfig::default(),
            reasoning,
            executor,
            catalogue: None,
            memory: None,
            artefacts: None,
            events: None,
            default_autonomy: AutonomyMode::default(),
        }
    }

    pub fn config(mut self, config: EnsembleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalogue(mut self, catalogue: ToolCatalogue) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    pub fn memory(mut self, memory: SharedMemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Route artefact-mutating tools through `artefacts` instead of the executor.
    pub fn artefacts(mut self, artefacts: SharedArtefactService) -> Self {
        self.artefacts = Some(artefacts);
        self
    }

    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Mode for sessions created without an explicit override.
    pub fn default_autonomy(mut self, mode: AutonomyMode) -> Self {
        self.default_autonomy = mode;
        self
    }

    /// Validate configuration and assemble the runtime.
    pub fn build(self) -> CopilotResult<CopilotRuntime> {
        self.config.validate(PersonaRegistry::builtin())?;

        let config = Arc::new(self.config);
        let catalogue = Arc::new(self.catalogue.unwrap_or_else(ToolCatalogue::builtin));
        let memory = self
            .memory
            .unwrap_or_else(|| InMemoryMemoryStore::new().shared());
        let events = self.events.unwrap_or_else(|| EventBus::new().shared());
        let sessions = SessionManager::new(
            Arc::clone(&memory),
            Arc::clone(&events),
            config.draft_ttl,
        )
        .shared();
        let orchestrator = EnsembleOrchestrator::new(
            Arc::clone(&config),
            Arc::clone(&self.reasoning),
            Arc::clone(&memory),
        );

        info!(
            tools = catalogue.len(),
            default_autonomy = %self.default_autonomy,
            artefact_service = self.artefacts.is_some(),
            "Copilot runtime ready"
        );

        Ok(CopilotRuntime {
            policy: PolicyEngine::new(Arc::clone(&catalogue)),
            catalogue,
            orchestrator,
            sessions,
            reasoning: self.reasoning,
            executor: self.executor,
            memory,
            artefacts: self.artefacts,
            audit: AuditLog::new().shared(),
            events,
            default_autonomy: self.default_autonomy,
        })
    }
}

/// The copilot core.
pub struct CopilotRuntime {
    catalogue: Arc<ToolCatalogue>,
    policy: PolicyEngine,
    orchestrator: EnsembleOrchestrator,
    sessions: SharedSessionManager,
    reasoning: SharedReasoningService,
    executor: SharedToolExecutor,
    memory: SharedMemoryStore,
    artefacts: Option<SharedArtefactService>,
    audit: SharedAuditLog,
    events: SharedEventBus,
    default_autonomy: AutonomyMode,
}

impl CopilotRuntime {
    pub fn builder(
        reasoning: SharedReasoningService,
        executor: SharedToolExecutor,
    ) -> CopilotRuntimeBuilder {
        CopilotRuntimeBuilder::new(reasoning, executor)
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Handle one operator message end to end.
    ///
    /// Validation failures return before anything is recorded. Every proposed
    /// action that reaches the policy engine ends in exactly one audit record.
    /// An autonomy override governs this invocation only; the session keeps
    /// its stored mode.
    pub async fn invoke(&self, request: InvokeRequest) -> CopilotResult<InvokeResponse> {
        let input = request.input.trim();
        if input.is_empty() {
            return Err(CopilotError::validation("input must not be empty"));
        }
        let override_mode = request
            .autonomy_mode
            .as_deref()
            .map(str::parse::<AutonomyMode>)
            .transpose()
            .map_err(|e| CopilotError::validation(e.to_string()))?;

        let (mut session, session_created) = self
            .sessions
            .acquire(request.session_id.as_deref(), self.default_autonomy)
            .await?;
        let autonomy = override_mode.unwrap_or_else(|| session.autonomy_mode());
        if override_mode.is_some_and(|mode| mode != session.autonomy_mode()) {
            debug!(
                session_id = %session.id(),
                session_mode = %session.autonomy_mode(),
                request_mode = %autonomy,
                "Autonomy override for this invocation"
            );
        }

        let outcome = self
            .orchestrator
            .deliberate(session.state(), input, &self.catalogue)
            .await?;
        self.publish_deliberation(session.id(), &outcome);

        let mut executed = Vec::new();
        let mut held = Vec::new();
        let mut denied = Vec::new();
        let mut record_ids = Vec::new();

        for action in &outcome.response.proposed_actions {
            let call = action.to_tool_call();
            let evaluation = self.policy.evaluate(&call, autonomy);

            match evaluation.decision {
                PolicyDecision::Allow => {
                    let ctx = ToolExecutionContext {
                        session_id: session.id().to_string(),
                        persona: call.persona,
                        autonomy_mode: autonomy,
                        draft_id: None,
                    };
                    let record = self.execute_and_record(call, evaluation, ctx).await?;
                    record_ids.push(record.id.clone());
                    executed.push(record);
                }
                PolicyDecision::Hold => {
                    let (draft, record) = self
                        .hold(&mut session, action, &call, &evaluation, autonomy)
                        .await?;
                    record_ids.push(record.id);
                    held.push(draft);
                }
                PolicyDecision::Deny => {
                    let record = PolicyEngine::create_tool_call_record(
                        session.id(),
                        &call,
                        &evaluation,
                        ToolCallOutcome::Denied,
                    )?;
                    self.append_record(&record)?;
                    record_ids.push(record.id.clone());
                    denied.push(DeniedAction {
                        tool_name: call.tool_name,
                        input: call.input,
                        proposed_by: action.proposed_by.clone(),
                        reason: evaluation.reason,
                        record_id: record.id,
                    });
                }
            }
        }

        let DeliberationOutcome {
            deliberation,
            response,
        } = outcome;
        let turn = session
            .append_turn(input, response.clone(), record_ids)
            .await;

        let invoke_response = InvokeResponse {
            session_id: session.id().to_string(),
            session_created,
            deliberation_id: deliberation.id,
            text: response.text,
            mode: response.mode,
            cited_personas: response.cited_personas,
            executed,
            held,
            denied,
            unresolved_challenges: response.unresolved_challenges,
        };
        info!(
            session_id = %invoke_response.session_id,
            seq = turn.seq,
            summary = %invoke_response.summary(),
            "Invocation complete"
        );
        Ok(invoke_response)
    }

    /// Confirm a held draft: one execution attempt, one audit record.
    ///
    /// A tool that has left the catalogue since the draft was held is denied
    /// instead of executed.
    pub async fn confirm_draft(
        &self,
        session_id: &str,
        draft_id: &str,
    ) -> CopilotResult<ToolCallRecord> {
        let (mut session, _) = self
            .sessions
            .acquire(Some(session_id), self.default_autonomy)
            .await?;
        let draft = session
            .resolve_draft(draft_id, DraftResolution::Confirm)
            .await?;

        let call = draft.action.to_tool_call();
        let evaluation = match self.catalogue.get(&call.tool_name) {
            Some(definition) => PolicyEvaluation::new(PolicyDecision::Allow, CONFIRMED_REASON)
                .with_context(definition.risk_tier, session.autonomy_mode()),
            None => PolicyEvaluation::deny(format!(
                "tool '{}' is no longer in the catalogue",
                call.tool_name
            )),
        };

        if evaluation.decision == PolicyDecision::Deny {
            let record = PolicyEngine::create_tool_call_record(
                session.id(),
                &call,
                &evaluation,
                ToolCallOutcome::Denied,
            )?;
            self.append_record(&record)?;
            warn!(
                session_id,
                draft_id,
                tool = %record.tool_name,
                "Confirmed draft denied"
            );
            return Ok(record);
        }

        let ctx = ToolExecutionContext {
            session_id: session.id().to_string(),
            persona: call.persona,
            autonomy_mode: session.autonomy_mode(),
            draft_id: Some(draft.id.clone()),
        };
        self.execute_and_record(call, evaluation, ctx).await
    }

    /// Reject a held draft. Nothing runs and nothing is added to the audit log.
    pub async fn reject_draft(
        &self,
        session_id: &str,
        draft_id: &str,
    ) -> CopilotResult<PendingDraft> {
        let (mut session, _) = self
            .sessions
            .acquire(Some(session_id), self.default_autonomy)
            .await?;
        Ok(session
            .resolve_draft(draft_id, DraftResolution::Reject)
            .await?)
    }

    /// Change a session's stored autonomy mode. Returns the previous mode
    /// when it changed.
    pub async fn set_autonomy_mode(
        &self,
        session_id: &str,
        mode: AutonomyMode,
    ) -> CopilotResult<Option<AutonomyMode>> {
        let (mut session, _) = self
            .sessions
            .acquire(Some(session_id), self.default_autonomy)
            .await?;
        Ok(session.set_autonomy_mode(mode))
    }

    /// Attach an operator-visible label to a session.
    pub async fn set_session_metadata(
        &self,
        session_id: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> CopilotResult<()> {
        let (mut session, _) = self
            .sessions
            .acquire(Some(session_id), self.default_autonomy)
            .await?;
        session.set_metadata(key, value);
        Ok(())
    }

    // =========================================================================
    // Read-only surface
    // =========================================================================

    /// Check collaborators. Touches no session state.
    pub async fn health(&self) -> HealthResponse {
        let memory_check = async {
            let start = Instant::now();
            let result = self.memory.ping().await;
            CollaboratorHealth {
                name: "memory_store".into(),
                healthy: result.is_ok(),
                latency_ms: start.elapsed().as_millis() as u64,
                detail: result.err().map(|e| e.to_string()),
            }
        };
        let reasoning_check = async {
            let start = Instant::now();
            let available = self.reasoning.is_available().await;
            CollaboratorHealth {
                name: "reasoning".into(),
                healthy: available,
                latency_ms: start.elapsed().as_millis() as u64,
                detail: (!available).then(|| "reasoning endpoint unreachable".to_string()),
            }
        };
        let (memory, reasoning) = tokio::join!(memory_check, reasoning_check);

        let status = if !reasoning.healthy {
            HealthStatus::Unhealthy
        } else if !memory.healthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthResponse {
            status,
            collaborators: vec![memory, reasoning],
            checked_at: Utc::now(),
        }
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Snapshot of one session.
    pub async fn session(&self, session_id: &str) -> CopilotResult<SessionState> {
        Ok(self.sessions.snapshot(session_id).await?)
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list_sessions().await
    }

    /// Start an empty session, e.g. to fix its autonomy mode up front.
    pub async fn create_session(&self, autonomy_mode: AutonomyMode) -> SessionId {
        self.sessions.create(autonomy_mode).await.id().to_string()
    }

    pub async fn sweep_expired_drafts(&self) -> usize {
        self.sessions.sweep_expired_drafts().await
    }

    pub fn describe_capabilities(&self, mode: AutonomyMode) -> AutonomyCapabilities {
        self.policy.describe_autonomy_capabilities(mode)
    }

    pub fn catalogue(&self) -> &ToolCatalogue {
        &self.catalogue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CopilotEvent> {
        self.events.subscribe()
    }

    /// Events for one session, optionally narrowed to `event_types`.
    pub fn subscribe_session(&self, session_id: &str, event_types: &[&str]) -> FilteredReceiver {
        let mut filter = EventFilter::new().session(session_id);
        if !event_types.is_empty() {
            filter = filter.types(event_types.to_vec());
        }
        self.events.subscribe_filtered(filter)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Hold a call as a draft, with a diff preview for artefact edits.
    async fn hold(
        &self,
        session: &mut SessionHandle,
        action: &ProposedAction,
        call: &ToolCall,
        evaluation: &PolicyEvaluation,
        autonomy: AutonomyMode,
    ) -> CopilotResult<(PendingDraft, ToolCallRecord)> {
        let mut draft = PendingDraft::new(session.id(), action.clone(), evaluation.reason.clone());
        if let Some(preview) = self.preview(call).await {
            draft = draft.with_preview(preview);
        }

        let record = PolicyEngine::create_tool_call_record(
            session.id(),
            call,
            evaluation,
            ToolCallOutcome::Held {
                draft_id: draft.id.clone(),
            },
        )?;
        self.append_record(&record)?;

        debug!(
            session_id = %session.id(),
            draft_id = %draft.id,
            autonomy = %autonomy,
            "Holding call"
        );
        session.add_draft(draft.clone());
        self.events.publish(CopilotEvent::DraftCreated {
            session_id: session.id().to_string(),
            draft_id: draft.id.clone(),
            tool_name: call.tool_name.clone(),
            timestamp: Utc::now(),
        });
        Ok((draft, record))
    }

    async fn preview(&self, call: &ToolCall) -> Option<ArtefactDiff> {
        let service = self.artefacts.as_ref()?;
        if !self.catalogue.get(&call.tool_name)?.mutates_artefact {
            return None;
        }
        let edit = ArtefactEdit::from_input(&call.input).ok()?;
        match service.calculate_diff(&edit.artefact_id, &edit.content).await {
            Ok(diff) => Some(diff),
            Err(e) => {
                warn!(
                    artefact_id = %edit.artefact_id,
                    error = %e,
                    "Could not compute draft preview"
                );
                None
            }
        }
    }

    /// Run an allowed call and record the result.
    ///
    /// Execution happens on its own task so that a caller dropping this
    /// future cannot cancel a call that already started, and the record is
    /// appended either way.
    async fn execute_and_record(
        &self,
        call: ToolCall,
        evaluation: PolicyEvaluation,
        ctx: ToolExecutionContext,
    ) -> CopilotResult<ToolCallRecord> {
        let mutates = self
            .catalogue
            .get(&call.tool_name)
            .is_some_and(|d| d.mutates_artefact);
        let artefacts = self.artefacts.clone().filter(|_| mutates);
        let executor = Arc::clone(&self.executor);
        let audit = Arc::clone(&self.audit);
        let events = Arc::clone(&self.events);
        let (fallback_call, fallback_evaluation, session_id) =
            (call.clone(), evaluation.clone(), ctx.session_id.clone());

        let task = tokio::spawn(async move {
            let result = dispatch(executor.as_ref(), artefacts.as_deref(), &call, &ctx).await;
            let record = PolicyEngine::create_tool_call_record(
                &ctx.session_id,
                &call,
                &evaluation,
                result.into_outcome(),
            )?;
            append_record(&audit, &events, &record)?;
            Ok::<_, CopilotError>(record)
        });

        match task.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(
                    session_id = %session_id,
                    tool = %fallback_call.tool_name,
                    error = %join_error,
                    "Tool execution task failed"
                );
                let record = PolicyEngine::create_tool_call_record(
                    &session_id,
                    &fallback_call,
                    &fallback_evaluation,
                    ToolCallOutcome::executed(
                        false,
                        None,
                        Some(format!("execution aborted: {join_error}")),
                    ),
                )?;
                self.append_record(&record)?;
                Ok(record)
            }
        }
    }

    fn append_record(&self, record: &ToolCallRecord) -> CopilotResult<()> {
        append_record(&self.audit, &self.events, record)
    }

    fn publish_deliberation(&self, session_id: &str, outcome: &DeliberationOutcome) {
        let deliberation = &outcome.deliberation;
        let now = Utc::now();
        self.events.publish(CopilotEvent::DeliberationCompleted {
            session_id: session_id.to_string(),
            deliberation_id: deliberation.id.clone(),
            mode: deliberation.mode,
            strategy: deliberation.strategy,
            cited_personas: outcome.response.cited_personas.clone(),
            failed_personas: deliberation.failed_personas(),
            challenges: deliberation.challenges.len(),
            duration_ms: deliberation.duration_ms,
            timestamp: now,
        });
        for challenge in &deliberation.challenges {
            self.events.publish(CopilotEvent::ChallengeDetected {
                session_id: session_id.to_string(),
                deliberation_id: deliberation.id.clone(),
                challenge_id: challenge.id.clone(),
                personas: challenge.personas.clone(),
                description: challenge.description.clone(),
                timestamp: now,
            });
        }
    }
}

fn append_record(
    audit: &AuditLog,
    events: &EventBus,
    record: &ToolCallRecord,
) -> CopilotResult<()> {
    audit.append(record.clone())?;
    events.publish(CopilotEvent::ToolCallEvaluated {
        session_id: record.session_id.clone(),
        record_id: record.id.clone(),
        tool_name: record.tool_name.clone(),
        persona: record.persona,
        decision: record.decision,
        timestamp: record.timestamp,
    });
    Ok(())
}

/// Artefact edits go to the artefact service when one is configured;
/// everything else goes to the executor.
async fn dispatch(
    executor: &dyn ToolExecutor,
    artefacts: Option<&dyn ArtefactService>,
    call: &ToolCall,
    ctx: &ToolExecutionContext,
) -> ToolResult {
    let Some(service) = artefacts else {
        return executor.execute(call, ctx).await;
    };
    let edit = match ArtefactEdit::from_input(&call.input) {
        Ok(edit) => edit,
        Err(e) => return ToolResult::err(e.to_string()),
    };
    match service.merge_artefact(&edit, call.persona).await {
        Ok(revision) => ToolResult::ok(json!({
            "artefact_id": revision.artefact_id,
            "revision": revision.revision,
        })),
        Err(e) => ToolResult::err(e.to_string()),
    }
}
