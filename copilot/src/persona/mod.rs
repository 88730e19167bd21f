//! Persona Registry
//!
//! The fixed catalogue of reasoning personas. Personas form a closed set: the
//! enum names them, a static table describes them, and nothing registers new
//! ones at runtime.
//!
//! Priority decides both dispatch and citation order. Lower runs and cites
//! first; ties fall back to declaration order in the table.

pub mod prompts;

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persona identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaId {
    Operator,
    Analyst,
    Sceptic,
    Advocate,
    Historian,
    Synthesiser,
}

impl PersonaId {
    pub fn all() -> &'static [PersonaId] {
        &[
            Self::Operator,
            Self::Analyst,
            Self::Sceptic,
            Self::Advocate,
            Self::Historian,
            Self::Synthesiser,
        ]
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::Analyst => write!(f, "analyst"),
            Self::Sceptic => write!(f, "sceptic"),
            Self::Advocate => write!(f, "advocate"),
            Self::Historian => write!(f, "historian"),
            Self::Synthesiser => write!(f, "synthesiser"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown persona: {0}")]
pub struct UnknownPersona(pub String);

impl std::str::FromStr for PersonaId {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operator" => Ok(Self::Operator),
            "analyst" => Ok(Self::Analyst),
            "sceptic" | "skeptic" => Ok(Self::Sceptic),
            "advocate" => Ok(Self::Advocate),
            "historian" => Ok(Self::Historian),
            "synthesiser" | "synthesizer" => Ok(Self::Synthesiser),
            other => Err(UnknownPersona(other.to_string())),
        }
    }
}

/// When a persona takes part in a deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationRule {
    /// Active when listed for the classified conversation mode.
    ModeMapped,
    /// Mode-mapped, and additionally activated when risk signals are present.
    RiskSignal,
    /// Never contributes directly; only runs the synthesis pass over disagreements.
    SynthesisOnly,
}

impl std::fmt::Display for ActivationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModeMapped => write!(f, "mode_mapped"),
            Self::RiskSignal => write!(f, "risk_signal"),
            Self::SynthesisOnly => write!(f, "synthesis_only"),
        }
    }
}

/// Static description of one persona.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaConfig {
    pub id: PersonaId,
    pub display_name: &'static str,
    /// Role description, used as the body of the persona's system prompt.
    pub role: &'static str,
    pub activation: ActivationRule,
    pub priority: u8,
}

const BUILTIN_PERSONAS: &[PersonaConfig] = &[
    PersonaConfig {
        id: PersonaId::Operator,
        display_name: "Operator",
        role: "You run day-to-day delivery. Focus on concrete next actions, owners, \
               and what can be done with the tools available right now.",
        activation: ActivationRule::ModeMapped,
        priority: 10,
    },
    PersonaConfig {
        id: PersonaId::Analyst,
        display_name: "Analyst",
        role: "You reason from evidence. Break the question down, quantify where you \
               can, and separate what is known from what is assumed.",
        activation: ActivationRule::ModeMapped,
        priority: 20,
    },
    PersonaConfig {
        id: PersonaId::Sceptic,
        display_name: "Sceptic",
        role: "You look for what could go wrong. Challenge irreversible steps, weak \
               evidence and optimistic timelines. Recommend holding when the downside \
               is unclear.",
        activation: ActivationRule::RiskSignal,
        priority: 30,
    },
    PersonaConfig {
        id: PersonaId::Advocate,
        display_name: "Advocate",
        role: "You represent the people affected by the work: customers, stakeholders \
               and the team. Argue for the outcome that serves them best.",
        activation: ActivationRule::ModeMapped,
        priority: 40,
    },
    PersonaConfig {
        id: PersonaId::Historian,
        display_name: "Historian",
        role: "You remember prior decisions and how similar situations played out. \
               Ground the discussion in what has already been agreed.",
        activation: ActivationRule::ModeMapped,
        priority: 50,
    },
    PersonaConfig {
        id: PersonaId::Synthesiser,
        display_name: "Synthesiser",
        role: "You reconcile disagreement between other personas. State each position \
               fairly, name the trade-off, and never hide a conflict.",
        activation: ActivationRule::SynthesisOnly,
        priority: 90,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Persona '{0}' declared more than once")]
    Duplicate(PersonaId),
    #[error("Registry declares no personas")]
    Empty,
}

/// Immutable persona catalogue.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<PersonaConfig>,
}

impl PersonaRegistry {
    /// Build a registry from a table; declaration order breaks priority ties.
    pub fn from_table(personas: Vec<PersonaConfig>) -> Result<Self, RegistryError> {
        if personas.is_empty() {
            return Err(RegistryError::Empty);
        }
        for (i, p) in personas.iter().enumerate() {
            if personas[..i].iter().any(|q| q.id == p.id) {
                return Err(RegistryError::Duplicate(p.id));
            }
        }
        Ok(Self { personas })
    }

    /// The process-wide built-in registry.
    pub fn builtin() -> &'static PersonaRegistry {
        static REGISTRY: OnceLock<PersonaRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| Self {
            personas: BUILTIN_PERSONAS.to_vec(),
        })
    }

    pub fn get(&self, id: PersonaId) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PersonaId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersonaConfig> {
        self.personas.iter()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn display_name(&self, id: PersonaId) -> String {
        self.get(id)
            .map(|p| p.display_name.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// Deduplicate and sort by (priority, declaration index).
    ///
    /// Ids missing from the registry are dropped.
    pub fn ordered(&self, ids: &[PersonaId]) -> Vec<PersonaId> {
        let mut keyed: Vec<(u8, usize, PersonaId)> = self
            .personas
            .iter()
            .enumerate()
            .filter(|(_, p)| ids.contains(&p.id))
            .map(|(index, p)| (p.priority, index, p.id))
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, _, id)| id).collect()
    }

    /// First persona activated by risk signals, if any.
    pub fn risk_persona(&self) -> Option<&PersonaConfig> {
        self.personas
            .iter()
            .find(|p| p.activation == ActivationRule::RiskSignal)
    }

    /// The persona that runs the synthesis pass, if any.
    pub fn synthesiser(&self) -> Option<&PersonaConfig> {
        self.personas
            .iter()
            .find(|p| p.activation == ActivationRule::SynthesisOnly)
    }
}
