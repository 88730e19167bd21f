//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use copilot::ensemble::{ReasoningError, ReasoningReply, ReasoningRequest, ReasoningService};
use copilot::runtime::{ToolExecutionContext, ToolExecutor, ToolResult};
use copilot::{CopilotRuntime, EnsembleConfig, PersonaId, ToolCall};

#[derive(Clone)]
struct Script {
    reply: Result<ReasoningReply, ReasoningError>,
    delay: Duration,
    transient_failures: u32,
}

/// Reasoning service that answers from a per-persona script.
///
/// Unscripted personas answer with a neutral note at confidence 0.7.
pub struct ScriptedReasoning {
    scripts: Mutex<HashMap<PersonaId, Script>>,
    attempts: Mutex<HashMap<PersonaId, u32>>,
    calls: Mutex<Vec<ReasoningRequest>>,
    available: bool,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            available: true,
        }
    }

    fn script(&self, persona: PersonaId) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(&persona)
            .cloned()
            .unwrap_or_else(|| Script {
                reply: Ok(ReasoningReply::new(format!("{persona} has nothing to add."), 0.7)),
                delay: Duration::ZERO,
                transient_failures: 0,
            })
    }

    fn edit(self, persona: PersonaId, f: impl FnOnce(&mut Script)) -> Self {
        let mut script = self.script(persona);
        f(&mut script);
        self.scripts.lock().unwrap().insert(persona, script);
        self
    }

    pub fn reply(self, persona: PersonaId, reply: ReasoningReply) -> Self {
        self.edit(persona, |s| s.reply = Ok(reply))
    }

    pub fn fail(self, persona: PersonaId, error: ReasoningError) -> Self {
        self.edit(persona, |s| s.reply = Err(error))
    }

    pub fn delay(self, persona: PersonaId, delay: Duration) -> Self {
        self.edit(persona, |s| s.delay = delay)
    }

    /// Fail with a network error `n` times before answering.
    pub fn fail_transiently(self, persona: PersonaId, n: u32) -> Self {
        self.edit(persona, |s| s.transient_failures = n)
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<ReasoningRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts(&self, persona: PersonaId) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&persona)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn call(&self, request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError> {
        self.calls.lock().unwrap().push(request.clone());
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(request.persona).or_insert(0);
            *n += 1;
            *n
        };
        let script = self.script(request.persona);

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if attempt <= script.transient_failures {
            return Err(ReasoningError::Network(format!("attempt {attempt} reset")));
        }
        script.reply
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

/// Executor that records every call and succeeds.
#[derive(Default)]
pub struct CountingExecutor {
    calls: Mutex<Vec<(ToolCall, ToolExecutionContext)>>,
}

impl CountingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(ToolCall, ToolExecutionContext)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, call: &ToolCall, ctx: &ToolExecutionContext) -> ToolResult {
        self.calls.lock().unwrap().push((call.clone(), ctx.clone()));
        ToolResult::ok(json!({ "tool": call.tool_name }))
    }
}

/// Tight timeouts so failure paths finish quickly.
pub fn fast_config() -> EnsembleConfig {
    EnsembleConfig {
        per_call_timeout: Duration::from_millis(500),
        deliberation_timeout: Duration::from_secs(2),
        max_retries: 2,
        retry_backoff: Duration::from_millis(5),
        ..EnsembleConfig::default()
    }
}

pub fn runtime(
    reasoning: Arc<ScriptedReasoning>,
    executor: Arc<CountingExecutor>,
) -> CopilotRuntime {
    CopilotRuntime::builder(reasoning, executor)
        .config(fast_config())
        .build()
        .expect("valid runtime")
}
