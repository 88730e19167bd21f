//! Ensemble orchestrator: one deliberation per turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::challenge::ChallengeDetector;
use super::reasoning::{ReasoningRequest, ReasoningService, SharedReasoningService};
use super::synthesis;
use super::types::{
    Challenge, Contribution, Deliberation, DeliberationOutcome, ResolutionStrategy,
};
use crate::config::EnsembleConfig;
use crate::error::{CopilotError, CopilotResult};
use crate::memory::{MemoryQuery, MemoryStore, SharedMemoryStore};
use crate::persona::{prompts, PersonaId, PersonaRegistry};
use crate::router::{ClassifierContext, ConversationMode, ModeClassifier};
use crate::session::SessionState;
use crate::tools::{McpToolDefinition, ToolCatalogue};

const PERSONA_MAX_TOKENS: u32 = 1024;
const SYNTHESIS_MAX_TOKENS: u32 = 768;

/// Timeout and retry settings for one persona call.
#[derive(Debug, Clone, Copy)]
struct CallPolicy {
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl CallPolicy {
    fn from_config(config: &EnsembleConfig) -> Self {
        Self {
            timeout: config.per_call_timeout,
            max_retries: config.max_retries,
            backoff: config.retry_backoff,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Call the reasoning service with per-attempt timeout and exponential
/// backoff. Only transient failures are retried. Never fails: the result is
/// always a contribution, successful or not.
async fn call_with_retry(
    reasoning: &dyn ReasoningService,
    request: &ReasoningRequest,
    policy: CallPolicy,
) -> Contribution {
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let (retryable, reason) =
            match tokio::time::timeout(policy.timeout, reasoning.call(request)).await {
                Ok(Ok(reply)) => {
                    debug!(
                        persona = %request.persona,
                        attempts,
                        latency_ms = elapsed_ms(start),
                        confidence = reply.confidence,
                        "Persona replied"
                    );
                    return Contribution::succeeded(
                        request.persona,
                        reply.text,
                        reply.confidence,
                        reply.proposed_actions,
                        elapsed_ms(start),
                        attempts,
                    );
                }
                Ok(Err(e)) => (e.is_retryable(), e.to_string()),
                Err(_) => (
                    true,
                    format!("timed out after {}ms", policy.timeout.as_millis()),
                ),
            };

        if !retryable || attempts > policy.max_retries {
            warn!(
                persona = %request.persona,
                attempts,
                reason = %reason,
                "Persona call failed"
            );
            return Contribution::failed(request.persona, reason, elapsed_ms(start), attempts);
        }

        let delay = policy.delay_before(attempts);
        debug!(
            persona = %request.persona,
            attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Retrying persona call"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Runs the persona panel for a turn and merges the result.
pub struct EnsembleOrchestrator {
    registry: &'static PersonaRegistry,
    classifier: ModeClassifier,
    detector: ChallengeDetector,
    reasoning: SharedReasoningService,
    memory: SharedMemoryStore,
    config: Arc<EnsembleConfig>,
}

impl EnsembleOrchestrator {
    pub fn new(
        config: Arc<EnsembleConfig>,
        reasoning: SharedReasoningService,
        memory: SharedMemoryStore,
    ) -> Self {
        Self {
            registry: PersonaRegistry::builtin(),
            classifier: ModeClassifier::from_config(&config),
            detector: ChallengeDetector::from_config(&config),
            reasoning,
            memory,
            config,
        }
    }

    pub fn with_registry(mut self, registry: &'static PersonaRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &'static PersonaRegistry {
        self.registry
    }

    pub fn classifier(&self) -> &ModeClassifier {
        &self.classifier
    }

    /// Mode-mapped personas, plus the risk persona when activated, in
    /// priority order.
    pub fn active_personas(&self, mode: ConversationMode, sceptic: bool) -> Vec<PersonaId> {
        let mut ids = self.config.personas_for(mode).to_vec();
        if sceptic {
            if let Some(risk) = self.registry.risk_persona() {
                ids.push(risk.id);
            }
        }
        self.registry.ordered(&ids)
    }

    /// Run one deliberation over `input` in the context of `session`.
    ///
    /// Fails only when no persona produced a contribution.
    pub async fn deliberate(
        &self,
        session: &SessionState,
        input: &str,
        catalogue: &ToolCatalogue,
    ) -> CopilotResult<DeliberationOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = clock + self.config.deliberation_timeout;

        let ctx = ClassifierContext::new(input, session.turns());
        let analysis = self.classifier.analyze(&ctx);
        let active = self.active_personas(analysis.mode, analysis.sceptic);

        info!(
            session_id = %session.id(),
            mode = %analysis.mode,
            sceptic = analysis.sceptic,
            personas = ?active,
            "Starting deliberation"
        );

        let memory = match self
            .memory
            .lookup(&MemoryQuery::new(
                session.id(),
                input,
                self.config.memory_lookup_limit,
            ))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    session_id = %session.id(),
                    error = %e,
                    "Memory lookup failed, deliberating without memory"
                );
                Vec::new()
            }
        };
        let tools: Vec<&McpToolDefinition> = catalogue.iter().collect();
        let user_prompt = prompts::build_user_prompt(input, &memory, &tools);

        let contributions = self
            .fan_out(&active, analysis.mode, input, &user_prompt, deadline)
            .await;

        if !contributions.iter().any(Contribution::is_success) {
            let failures: Vec<String> = contributions
                .iter()
                .map(|c| {
                    format!("{}: {}", c.persona, c.failure_reason().unwrap_or("unknown"))
                })
                .collect();
            warn!(session_id = %session.id(), failures = ?failures, "Every persona failed");
            return Err(CopilotError::EnsembleExhausted {
                attempted: active.len(),
                failures,
            });
        }

        let challenges = self.detector.detect(&contributions, self.registry);
        let (strategy, synthesis_note) = if challenges.is_empty() {
            (ResolutionStrategy::Direct, None)
        } else {
            let note = self
                .synthesise(analysis.mode, input, &contributions, &challenges, deadline)
                .await;
            (ResolutionStrategy::SynthesiserPass, note)
        };

        let deliberation = Deliberation {
            id: uuid::Uuid::new_v4().to_string(),
            mode: analysis.mode,
            sceptic_activated: analysis.sceptic,
            contributions,
            challenges,
            strategy,
            synthesis_note,
            started_at,
            duration_ms: elapsed_ms(clock),
        };
        let response = synthesis::compose(&deliberation, self.registry);

        info!(
            session_id = %session.id(),
            deliberation_id = %deliberation.id,
            strategy = %deliberation.strategy,
            cited = ?response.cited_personas,
            challenges = deliberation.challenges.len(),
            duration_ms = deliberation.duration_ms,
            "Deliberation complete"
        );

        Ok(DeliberationOutcome {
            deliberation,
            response,
        })
    }

    // =========================================================================
    // Fan-out / fan-in
    // =========================================================================

    async fn fan_out(
        &self,
        active: &[PersonaId],
        mode: ConversationMode,
        input: &str,
        user_prompt: &str,
        deadline: Instant,
    ) -> Vec<Contribution> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let policy = CallPolicy::from_config(&self.config);
        let mut set = JoinSet::new();
        let mut task_personas = HashMap::new();

        for persona in active {
            let Some(persona_config) = self.registry.get(*persona) else {
                continue;
            };
            let request = ReasoningRequest {
                persona: *persona,
                mode,
                input: input.to_string(),
                system_prompt: prompts::system_prompt(persona_config, mode),
                user_prompt: user_prompt.to_string(),
                max_tokens: PERSONA_MAX_TOKENS,
            };
            let reasoning = Arc::clone(&self.reasoning);
            let semaphore = Arc::clone(&semaphore);

            let handle = set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Contribution::failed(
                        request.persona,
                        "concurrency limiter closed",
                        0,
                        0,
                    );
                };
                call_with_retry(reasoning.as_ref(), &request, policy).await
            });
            task_personas.insert(handle.id(), *persona);
        }

        let started = Instant::now();
        let mut collected: HashMap<PersonaId, Contribution> = HashMap::new();

        loop {
            match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((_, contribution)))) => {
                    collected.insert(contribution.persona, contribution);
                }
                Ok(Some(Err(join_error))) => {
                    if let Some(persona) = task_personas.get(&join_error.id()) {
                        warn!(persona = %persona, error = %join_error, "Persona task aborted");
                        collected.insert(
                            *persona,
                            Contribution::failed(
                                *persona,
                                format!("persona task failed: {join_error}"),
                                elapsed_ms(started),
                                0,
                            ),
                        );
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = set.len(),
                        timeout_ms = self.config.deliberation_timeout.as_millis() as u64,
                        "Deliberation deadline reached, cancelling remaining personas"
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        let deadline_ms = elapsed_ms(started);
        active
            .iter()
            .map(|persona| {
                collected.remove(persona).unwrap_or_else(|| {
                    Contribution::failed(
                        *persona,
                        "cancelled at deliberation deadline",
                        deadline_ms,
                        0,
                    )
                })
            })
            .collect()
    }

    /// Optional narrative over a disagreement. `None` when disabled, when no
    /// synthesis persona exists, when the call fails or when `deadline`
    /// passes first.
    async fn synthesise(
        &self,
        mode: ConversationMode,
        input: &str,
        contributions: &[Contribution],
        challenges: &[Challenge],
        deadline: Instant,
    ) -> Option<String> {
        if !self.config.synthesiser_enabled {
            return None;
        }
        let persona = self.registry.synthesiser()?;
        let request = ReasoningRequest {
            persona: persona.id,
            mode,
            input: input.to_string(),
            system_prompt: prompts::system_prompt(persona, mode),
            user_prompt: prompts::synthesis_prompt(
                input,
                contributions,
                challenges,
                self.registry,
            ),
            max_tokens: SYNTHESIS_MAX_TOKENS,
        };

        let call = call_with_retry(
            self.reasoning.as_ref(),
            &request,
            CallPolicy::from_config(&self.config),
        );
        let Ok(result) = tokio::time::timeout_at(deadline, call).await else {
            warn!(
                timeout_ms = self.config.deliberation_timeout.as_millis() as u64,
                "Synthesis pass cut off at deliberation deadline"
            );
            return None;
        };
        match result.failure_reason() {
            None if !result.text.trim().is_empty() => Some(result.text),
            None => None,
            Some(reason) => {
                warn!(
                    reason = %reason,
                    "Synthesis pass failed, disclosing disagreement without narrative"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::reasoning::{ReasoningError, ReasoningReply};
    use crate::memory::InMemoryMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails transiently `failures` times per persona, then echoes.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReasoningService for Flaky {
        async fn call(
            &self,
            request: &ReasoningRequest,
        ) -> Result<ReasoningReply, ReasoningError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ReasoningError::Network("connection reset".into()));
            }
            Ok(ReasoningReply::new(format!("{} here", request.persona), 0.7))
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn request(persona: PersonaId) -> ReasoningRequest {
        ReasoningRequest {
            persona,
            mode: ConversationMode::Planning,
            input: "plan".into(),
            system_prompt: String::new(),
            user_prompt: "plan".into(),
            max_tokens: 16,
        }
    }

    fn policy(max_retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(1),
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let service = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let c = call_with_retry(&service, &request(PersonaId::Analyst), policy(2)).await;
        assert!(c.is_success());
        assert_eq!(c.attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let service = Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let c = call_with_retry(&service, &request(PersonaId::Analyst), policy(1)).await;
        assert!(!c.is_success());
        assert_eq!(c.attempts, 2);
        assert!(c.failure_reason().unwrap().contains("connection reset"));
    }

    #[test]
    fn test_backoff_doubles() {
        let p = CallPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(p.delay_before(1), Duration::from_millis(100));
        assert_eq!(p.delay_before(2), Duration::from_millis(200));
        assert_eq!(p.delay_before(3), Duration::from_millis(400));
    }

    #[test]
    fn test_active_personas_adds_sceptic_in_order() {
        let orchestrator = EnsembleOrchestrator::new(
            Arc::new(EnsembleConfig::default()),
            Arc::new(Flaky {
                failures: 0,
                calls: AtomicU32::new(0),
            }),
            InMemoryMemoryStore::new().shared(),
        );
        assert_eq!(
            orchestrator.active_personas(ConversationMode::Planning, false),
            vec![PersonaId::Operator, PersonaId::Analyst, PersonaId::Advocate]
        );
        assert_eq!(
            orchestrator.active_personas(ConversationMode::Planning, true),
            vec![
                PersonaId::Operator,
                PersonaId::Analyst,
                PersonaId::Sceptic,
                PersonaId::Advocate
            ]
        );
        // already mapped: no duplicate
        assert_eq!(
            orchestrator.active_personas(ConversationMode::RiskReview, true),
            vec![PersonaId::Analyst, PersonaId::Sceptic, PersonaId::Historian]
        );
    }
}
