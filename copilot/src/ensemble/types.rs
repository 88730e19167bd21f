//! Deliberation data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::persona::PersonaId;
use crate::router::ConversationMode;
use crate::tools::ToolCall;

/// A tool call a persona wants run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub tool_name: String,
    pub input: Value,
    /// Personas that proposed this exact call, in priority order.
    #[serde(default)]
    pub proposed_by: Vec<PersonaId>,
}

impl ProposedAction {
    pub fn new(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            proposed_by: Vec::new(),
        }
    }

    /// The artefact or target the action touches, if it names one.
    pub fn target(&self) -> Option<&str> {
        self.input
            .get("artefact_id")
            .or_else(|| self.input.get("target"))
            .and_then(Value::as_str)
    }

    /// Identity for deduplication: tool plus canonical input.
    pub fn key(&self) -> String {
        format!("{}:{}", self.tool_name, self.input)
    }

    /// Tool call attributed to the first proposer.
    pub fn to_tool_call(&self) -> ToolCall {
        let call = ToolCall::new(self.tool_name.clone(), self.input.clone());
        match self.proposed_by.first() {
            Some(persona) => call.with_persona(*persona),
            None => call,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContributionStatus {
    Succeeded,
    Failed { reason: String },
}

/// One persona's output for one deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub persona: PersonaId,
    pub text: String,
    pub proposed_actions: Vec<ProposedAction>,
    pub confidence: f32,
    pub latency_ms: u64,
    pub attempts: u32,
    pub status: ContributionStatus,
}

impl Contribution {
    pub fn succeeded(
        persona: PersonaId,
        text: String,
        confidence: f32,
        mut proposed_actions: Vec<ProposedAction>,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        for action in &mut proposed_actions {
            action.proposed_by = vec![persona];
        }
        Self {
            persona,
            text,
            proposed_actions,
            confidence: confidence.clamp(0.0, 1.0),
            latency_ms,
            attempts,
            status: ContributionStatus::Succeeded,
        }
    }

    pub fn failed(
        persona: PersonaId,
        reason: impl Into<String>,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            persona,
            text: String::new(),
            proposed_actions: Vec::new(),
            confidence: 0.0,
            latency_ms,
            attempts,
            status: ContributionStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ContributionStatus::Succeeded
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            ContributionStatus::Failed { reason } => Some(reason),
            ContributionStatus::Succeeded => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Different calls proposed against the same target.
    ConflictingActions { target: String },
    /// Confident personas recommend opposite courses.
    OpposingRecommendations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeResolution {
    /// Left to the operator; the conflicting actions are withheld.
    Deferred,
    Resolved { in_favour_of: PersonaId },
    Unresolved,
}

/// A detected disagreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub kind: ChallengeKind,
    pub personas: Vec<PersonaId>,
    pub description: String,
    pub resolution: ChallengeResolution,
}

impl Challenge {
    pub fn new(
        kind: ChallengeKind,
        personas: Vec<PersonaId>,
        description: String,
        resolution: ChallengeResolution,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            personas,
            description,
            resolution,
        }
    }

    /// Still needs an operator decision.
    pub fn is_open(&self) -> bool {
        !matches!(self.resolution, ChallengeResolution::Resolved { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Direct,
    SynthesiserPass,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::SynthesiserPass => write!(f, "synthesiser_pass"),
        }
    }
}

/// Full record of one deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliberation {
    pub id: String,
    pub mode: ConversationMode,
    pub sceptic_activated: bool,
    /// One per active persona, in priority order.
    pub contributions: Vec<Contribution>,
    pub challenges: Vec<Challenge>,
    pub strategy: ResolutionStrategy,
    /// Narrative from the synthesis pass, when it ran and succeeded.
    pub synthesis_note: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Deliberation {
    pub fn succeeded(&self) -> impl Iterator<Item = &Contribution> {
        self.contributions.iter().filter(|c| c.is_success())
    }

    pub fn failed_personas(&self) -> Vec<PersonaId> {
        self.contributions
            .iter()
            .filter(|c| !c.is_success())
            .map(|c| c.persona)
            .collect()
    }
}

/// What the caller sees from a deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotResponse {
    pub deliberation_id: String,
    pub mode: ConversationMode,
    pub text: String,
    pub cited_personas: Vec<PersonaId>,
    pub proposed_actions: Vec<ProposedAction>,
    pub unresolved_challenges: Vec<Challenge>,
    /// Lowest confidence among cited personas.
    pub min_confidence: Option<f32>,
}

impl CopilotResponse {
    pub fn empty(mode: ConversationMode) -> Self {
        Self {
            deliberation_id: String::new(),
            mode,
            text: String::new(),
            cited_personas: Vec::new(),
            proposed_actions: Vec::new(),
            unresolved_challenges: Vec::new(),
            min_confidence: None,
        }
    }
}

/// Deliberation plus the response derived from it.
#[derive(Debug, Clone)]
pub struct DeliberationOutcome {
    pub deliberation: Deliberation,
    pub response: CopilotResponse,
}
