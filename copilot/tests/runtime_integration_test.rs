//! Copilot runtime integration tests.
//!
//! Tests verify:
//! - Hold then confirm runs the tool once and adds one record
//! - Hold then reject never runs the tool
//! - Drafts resolve exactly once, and expire after their time-to-live
//! - An autonomy override governs one invocation only
//! - Turn history is append-only and carries the turn's record ids
//! - Concurrent invocations on one session do not interleave
//! - Validation failures leave no trace

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{fast_config, runtime, CountingExecutor, ScriptedReasoning};
use copilot::ensemble::{ReasoningError, ReasoningReply};
use copilot::{
    AutonomyMode, CopilotError, CopilotEvent, CopilotRuntime, DraftStatus, EnsembleConfig,
    ErrorKind, HealthStatus, InMemoryArtefactService, InvokeRequest, PersonaId, PolicyDecision,
    ProposedAction, SessionError, ToolCallOutcome,
};

fn note_proposal() -> ScriptedReasoning {
    ScriptedReasoning::new().reply(
        PersonaId::Operator,
        ReasoningReply::new("Log the plan.", 0.8).with_action(ProposedAction::new(
            "create_note",
            json!({ "title": "Q3 plan", "body": "Billing first" }),
        )),
    )
}

// ── Draft round trips ──────────────────────────────────────────────

#[tokio::test]
async fn test_hold_then_confirm_executes_once() {
    let executor = CountingExecutor::new();
    let runtime = runtime(note_proposal().shared(), Arc::clone(&executor));

    let response = runtime
        .invoke(InvokeRequest::new("Plan the roadmap"))
        .await
        .unwrap();
    assert!(response.session_created);
    assert!(response.executed.is_empty());
    assert_eq!(response.held.len(), 1);
    assert_eq!(executor.count(), 0);
    assert_eq!(runtime.audit_log().len(), 1);

    let draft = &response.held[0];
    assert_eq!(draft.status, DraftStatus::Proposed);
    assert_eq!(draft.action.proposed_by, vec![PersonaId::Operator]);

    let record = runtime
        .confirm_draft(&response.session_id, &draft.id)
        .await
        .unwrap();
    assert_eq!(record.decision, PolicyDecision::Allow);
    assert!(matches!(
        record.outcome,
        ToolCallOutcome::Executed { success: true, .. }
    ));
    assert_eq!(executor.count(), 1);
    assert_eq!(runtime.audit_log().len(), 2);

    let (_, ctx) = &executor.calls()[0];
    assert_eq!(ctx.draft_id.as_deref(), Some(draft.id.as_str()));
    assert_eq!(ctx.persona, Some(PersonaId::Operator));

    // second resolution fails and changes nothing
    let err = runtime
        .confirm_draft(&response.session_id, &draft.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DRAFT_ALREADY_RESOLVED");
    assert_eq!(executor.count(), 1);
    assert_eq!(runtime.audit_log().len(), 2);

    let session = runtime.session(&response.session_id).await.unwrap();
    assert!(session.pending_drafts().is_empty());
    assert_eq!(session.resolved_drafts()[0].status, DraftStatus::Confirmed);
}

#[tokio::test]
async fn test_hold_then_reject_never_executes() {
    let executor = CountingExecutor::new();
    let runtime = runtime(note_proposal().shared(), Arc::clone(&executor));

    let response = runtime
        .invoke(InvokeRequest::new("Plan the roadmap"))
        .await
        .unwrap();
    let draft_id = response.held[0].id.clone();

    let rejected = runtime
        .reject_draft(&response.session_id, &draft_id)
        .await
        .unwrap();
    assert_eq!(rejected.status, DraftStatus::Rejected);
    assert_eq!(executor.count(), 0);
    assert_eq!(runtime.audit_log().len(), 1);

    let err = runtime
        .confirm_draft(&response.session_id, &draft_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DRAFT_ALREADY_RESOLVED");
    assert_eq!(executor.count(), 0);
}

#[tokio::test]
async fn test_unknown_draft_is_validation_error() {
    let runtime = runtime(note_proposal().shared(), CountingExecutor::new());
    let session_id = runtime.create_session(AutonomyMode::Manual).await;
    let err = runtime.reject_draft(&session_id, "missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.code(), "DRAFT_NOT_FOUND");
}

// ── Policy outcomes ────────────────────────────────────────────────

#[tokio::test]
async fn test_allowed_call_executes_during_invoke() {
    let executor = CountingExecutor::new();
    let runtime = runtime(note_proposal().shared(), Arc::clone(&executor));

    let response = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_autonomy("assisted"))
        .await
        .unwrap();

    assert_eq!(response.executed.len(), 1);
    assert!(response.held.is_empty());
    assert_eq!(executor.count(), 1);
    let session = runtime.session(&response.session_id).await.unwrap();
    assert_eq!(session.autonomy_mode(), AutonomyMode::Manual);
}

#[tokio::test]
async fn test_autonomy_override_applies_to_one_invocation() {
    let executor = CountingExecutor::new();
    let runtime = runtime(note_proposal().shared(), Arc::clone(&executor));
    let session_id = runtime.create_session(AutonomyMode::Manual).await;
    let mut events = runtime.subscribe_session(&session_id, &["autonomy_changed"]);

    let escalated = runtime
        .invoke(
            InvokeRequest::new("Plan the roadmap")
                .with_session(session_id.clone())
                .with_autonomy("full_auto"),
        )
        .await
        .unwrap();
    assert_eq!(escalated.executed.len(), 1);
    assert_eq!(executor.count(), 1);

    // the next request without an override is back under the session's mode
    let next = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_session(session_id.clone()))
        .await
        .unwrap();
    assert!(next.executed.is_empty());
    assert_eq!(next.held.len(), 1);
    assert_eq!(executor.count(), 1);

    let session = runtime.session(&session_id).await.unwrap();
    assert_eq!(session.autonomy_mode(), AutonomyMode::Manual);
    assert!(events.try_recv().is_err());

    // an explicit session change does persist
    let previous = runtime
        .set_autonomy_mode(&session_id, AutonomyMode::Assisted)
        .await
        .unwrap();
    assert_eq!(previous, Some(AutonomyMode::Manual));
    let after = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_session(session_id.clone()))
        .await
        .unwrap();
    assert_eq!(after.executed.len(), 1);
    assert!(matches!(
        events.try_recv().unwrap(),
        CopilotEvent::AutonomyChanged {
            from: AutonomyMode::Manual,
            to: AutonomyMode::Assisted,
            ..
        }
    ));
}

#[tokio::test]
async fn test_one_persona_conflicting_edits_are_withheld() {
    let first = ProposedAction::new(
        "update_artefact",
        json!({ "artefact_id": "roadmap", "content": "A" }),
    );
    let second = ProposedAction::new(
        "update_artefact",
        json!({ "artefact_id": "roadmap", "content": "B" }),
    );
    let reasoning = ScriptedReasoning::new()
        .reply(
            PersonaId::Operator,
            ReasoningReply::new("Either works.", 0.8)
                .with_action(first)
                .with_action(second),
        )
        .shared();
    let executor = CountingExecutor::new();
    let artefacts = Arc::new(InMemoryArtefactService::new());
    artefacts.seed("roadmap", "original").await;
    let runtime = CopilotRuntime::builder(reasoning, Arc::clone(&executor) as _)
        .config(fast_config())
        .artefacts(Arc::clone(&artefacts) as _)
        .build()
        .unwrap();

    let response = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_autonomy("supervised_auto"))
        .await
        .unwrap();

    assert!(response.executed.is_empty());
    assert!(response.held.is_empty());
    assert_eq!(response.unresolved_challenges.len(), 1);
    assert_eq!(response.unresolved_challenges[0].personas, vec![PersonaId::Operator]);
    assert!(runtime.audit_log().is_empty());
    let head = artefacts.head("roadmap").await.unwrap();
    assert_eq!(head.revision, 1);
    assert_eq!(head.content, "original");
}

#[tokio::test]
async fn test_denied_call_is_recorded_not_executed() {
    let reasoning = ScriptedReasoning::new()
        .reply(
            PersonaId::Operator,
            ReasoningReply::new("Email the team.", 0.8).with_action(ProposedAction::new(
                "send_email",
                json!({ "to": ["team@example.com"], "subject": "Plan", "body": "Done" }),
            )),
        )
        .shared();
    let executor = CountingExecutor::new();
    let runtime = runtime(reasoning, Arc::clone(&executor));

    let response = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_autonomy("full_auto"))
        .await
        .unwrap();

    assert_eq!(response.denied.len(), 1);
    assert_eq!(response.denied[0].tool_name, "send_email");
    assert_eq!(executor.count(), 0);

    let record = runtime.audit_log().get(&response.denied[0].record_id).unwrap();
    assert_eq!(record.decision, PolicyDecision::Deny);
    assert_eq!(record.outcome, ToolCallOutcome::Denied);
}

#[tokio::test]
async fn test_artefact_edits_route_to_artefact_service() {
    let edit = ProposedAction::new(
        "update_artefact",
        json!({ "artefact_id": "roadmap", "content": "Q3: billing\n" }),
    );
    let reasoning = ScriptedReasoning::new()
        .reply(
            PersonaId::Operator,
            ReasoningReply::new("Update it.", 0.8).with_action(edit),
        )
        .shared();
    let executor = CountingExecutor::new();
    let artefacts = Arc::new(InMemoryArtefactService::new());
    artefacts.seed("roadmap", "Q3: search\n").await;
    let runtime = CopilotRuntime::builder(reasoning, Arc::clone(&executor) as _)
        .config(fast_config())
        .artefacts(Arc::clone(&artefacts) as _)
        .build()
        .unwrap();

    // assisted: held with a preview
    let held = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_autonomy("assisted"))
        .await
        .unwrap();
    let preview = held.held[0].preview.as_ref().unwrap();
    assert_eq!(preview.base_revision, Some(1));
    assert_eq!(preview.added_lines, 1);
    assert_eq!(preview.removed_lines, 1);

    // supervised: merged straight away
    let merged = runtime
        .invoke(
            InvokeRequest::new("Plan the roadmap")
                .with_session(held.session_id.clone())
                .with_autonomy("supervised_auto"),
        )
        .await
        .unwrap();
    assert_eq!(merged.executed.len(), 1);
    assert_eq!(executor.count(), 0);
    let head = artefacts.head("roadmap").await.unwrap();
    assert_eq!(head.revision, 2);
    assert_eq!(head.content, "Q3: billing\n");
}

// ── Draft expiry ───────────────────────────────────────────────────

fn short_ttl_runtime(executor: Arc<CountingExecutor>) -> CopilotRuntime {
    CopilotRuntime::builder(note_proposal().shared(), executor)
        .config(EnsembleConfig {
            draft_ttl: Duration::from_millis(50),
            ..fast_config()
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_expired_draft_cannot_be_confirmed() {
    let executor = CountingExecutor::new();
    let runtime = short_ttl_runtime(Arc::clone(&executor));

    let response = runtime
        .invoke(InvokeRequest::new("Plan the roadmap"))
        .await
        .unwrap();
    let draft_id = response.held[0].id.clone();
    let mut expiries = runtime.subscribe_session(&response.session_id, &["drafts_expired"]);
    tokio::time::sleep(Duration::from_millis(120)).await;

    let err = runtime
        .confirm_draft(&response.session_id, &draft_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DRAFT_ALREADY_RESOLVED");
    assert!(matches!(
        err,
        CopilotError::Session(SessionError::DraftAlreadyResolved {
            status: DraftStatus::Expired,
            ..
        })
    ));
    assert_eq!(executor.count(), 0);
    assert_eq!(runtime.audit_log().len(), 1);

    let session = runtime.session(&response.session_id).await.unwrap();
    assert!(session.pending_drafts().is_empty());
    assert_eq!(session.draft(&draft_id).unwrap().status, DraftStatus::Expired);
    match expiries.try_recv().unwrap() {
        CopilotEvent::DraftsExpired { draft_ids, .. } => assert_eq!(draft_ids, vec![draft_id]),
        other => panic!("expected DraftsExpired, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sweep_expires_idle_drafts() {
    let runtime = short_ttl_runtime(CountingExecutor::new());

    let response = runtime
        .invoke(InvokeRequest::new("Plan the roadmap"))
        .await
        .unwrap();
    let draft_id = response.held[0].id.clone();
    assert_eq!(runtime.sweep_expired_drafts().await, 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(runtime.sweep_expired_drafts().await, 1);
    assert_eq!(runtime.sweep_expired_drafts().await, 0);

    let session = runtime.session(&response.session_id).await.unwrap();
    let draft = session.draft(&draft_id).unwrap();
    assert_eq!(draft.status, DraftStatus::Expired);
    assert!(draft.resolved_at.is_some());
    assert_eq!(runtime.list_sessions().await[0].pending_drafts, 0);
}

#[tokio::test]
async fn test_zero_draft_ttl_fails_build() {
    let result = CopilotRuntime::builder(note_proposal().shared(), CountingExecutor::new())
        .config(EnsembleConfig {
            draft_ttl: Duration::ZERO,
            ..fast_config()
        })
        .build();
    let err = result.err().unwrap();
    assert_eq!(err.code(), "CONFIG_ERROR");
}

// ── Session history ────────────────────────────────────────────────

#[tokio::test]
async fn test_history_is_append_only() {
    let runtime = runtime(note_proposal().shared(), CountingExecutor::new());

    let first = runtime
        .invoke(InvokeRequest::new("Plan the roadmap"))
        .await
        .unwrap();
    let second = runtime
        .invoke(
            InvokeRequest::new("What is the status so far?")
                .with_session(first.session_id.clone()),
        )
        .await
        .unwrap();
    assert!(!second.session_created);

    let session = runtime.session(&first.session_id).await.unwrap();
    let turns = session.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].seq, 0);
    assert_eq!(turns[0].input, "Plan the roadmap");
    assert_eq!(turns[1].seq, 1);
    assert!(turns[0].timestamp <= turns[1].timestamp);

    let recorded: Vec<String> = runtime
        .audit_log()
        .records_for_session(&first.session_id)
        .into_iter()
        .map(|r| r.id)
        .collect();
    let referenced: Vec<String> = turns
        .iter()
        .flat_map(|t| t.tool_call_ids.clone())
        .collect();
    assert_eq!(recorded, referenced);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_do_not_interleave() {
    let reasoning = ScriptedReasoning::new()
        .delay(PersonaId::Operator, Duration::from_millis(40))
        .delay(PersonaId::Analyst, Duration::from_millis(10))
        .delay(PersonaId::Advocate, Duration::from_millis(25))
        .shared();
    let runtime = Arc::new(runtime(Arc::clone(&reasoning), CountingExecutor::new()));
    let session_id = runtime.create_session(AutonomyMode::Manual).await;

    let a = {
        let runtime = Arc::clone(&runtime);
        let request = InvokeRequest::new("Plan the roadmap").with_session(session_id.clone());
        tokio::spawn(async move { runtime.invoke(request).await })
    };
    let b = {
        let runtime = Arc::clone(&runtime);
        let request = InvokeRequest::new("Plan the timeline").with_session(session_id.clone());
        tokio::spawn(async move { runtime.invoke(request).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // each deliberation's calls form one contiguous block
    let calls = reasoning.calls();
    assert_eq!(calls.len(), 6);
    for block in calls.chunks(3) {
        assert!(
            block.iter().all(|c| c.input == block[0].input),
            "interleaved calls"
        );
        let mut personas: Vec<PersonaId> = block.iter().map(|c| c.persona).collect();
        personas.sort();
        personas.dedup();
        assert_eq!(personas.len(), 3);
    }

    let session = runtime.session(&session_id).await.unwrap();
    assert_eq!(session.turns().len(), 2);
    assert_eq!(session.turns()[0].input, calls[0].input);
    assert_eq!(session.turns()[1].input, calls[3].input);
}

// ── Validation and failure ─────────────────────────────────────────

#[tokio::test]
async fn test_validation_failures_leave_no_trace() {
    let reasoning = note_proposal().shared();
    let runtime = runtime(Arc::clone(&reasoning), CountingExecutor::new());

    let err = runtime.invoke(InvokeRequest::new("   ")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_autonomy("reckless"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_session("no-such-session"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_SESSION");

    assert!(runtime.audit_log().is_empty());
    assert!(runtime.list_sessions().await.is_empty());
    assert!(reasoning.calls().is_empty());
}

#[tokio::test]
async fn test_exhausted_ensemble_appends_no_turn() {
    let down = ReasoningError::Unavailable("backend down".into());
    let reasoning = ScriptedReasoning::new()
        .fail(PersonaId::Operator, down.clone())
        .fail(PersonaId::Analyst, down.clone())
        .fail(PersonaId::Advocate, down)
        .shared();
    let runtime = runtime(reasoning, CountingExecutor::new());
    let session_id = runtime.create_session(AutonomyMode::Manual).await;

    let err = runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_session(session_id.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EnsembleExhausted);
    assert!(err.is_retryable());

    let session = runtime.session(&session_id).await.unwrap();
    assert!(session.turns().is_empty());
}

// ── Read-only surface ──────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_collaborators() {
    let runtime = runtime(ScriptedReasoning::new().shared(), CountingExecutor::new());
    let health = runtime.health().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.collaborator("memory_store").unwrap().healthy);
    assert!(health.collaborator("reasoning").unwrap().healthy);

    let runtime = runtime_unavailable();
    let health = runtime.health().await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(!health.collaborator("reasoning").unwrap().healthy);
    assert!(runtime.list_sessions().await.is_empty());
}

fn runtime_unavailable() -> CopilotRuntime {
    runtime(ScriptedReasoning::new().unavailable().shared(), CountingExecutor::new())
}

#[tokio::test]
async fn test_lifecycle_events_published() {
    let runtime = runtime(note_proposal().shared(), CountingExecutor::new());
    let mut events = runtime.subscribe();

    runtime
        .invoke(InvokeRequest::new("Plan the roadmap"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type());
    }
    assert_eq!(
        seen,
        vec![
            "session_created",
            "deliberation_completed",
            "tool_call_evaluated",
            "draft_created"
        ]
    );
}

#[tokio::test]
async fn test_session_metadata_and_scoped_events() {
    let runtime = runtime(note_proposal().shared(), CountingExecutor::new());
    let ours = runtime.create_session(AutonomyMode::Manual).await;
    let theirs = runtime.create_session(AutonomyMode::Manual).await;
    let mut scoped = runtime.subscribe_session(&ours, &[]);

    runtime
        .set_session_metadata(&ours, "client", "copilot-cli")
        .await
        .unwrap();
    runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_session(theirs.clone()))
        .await
        .unwrap();
    runtime
        .invoke(InvokeRequest::new("Plan the roadmap").with_session(ours.clone()))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = scoped.try_recv() {
        assert_eq!(event.session_id(), ours);
        seen.push(event.event_type());
    }
    assert_eq!(seen.first(), Some(&"deliberation_completed"));

    let session = runtime.session(&ours).await.unwrap();
    assert_eq!(session.metadata().get("client").map(String::as_str), Some("copilot-cli"));
    assert!(runtime
        .set_session_metadata("no-such-session", "k", "v")
        .await
        .is_err());
}
