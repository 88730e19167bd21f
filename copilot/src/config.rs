//! Ensemble configuration.
//!
//! Loaded once at startup and validated before the runtime is built. Defaults
//! can be overridden from the environment (`COPILOT_*`) or a TOML file whose
//! `[ensemble]` table uses `*_ms` integers for durations:
//!
//! ```toml
//! [ensemble]
//! per_call_timeout_ms = 20000
//! max_concurrency = 4
//!
//! [ensemble.modes]
//! discovery = ["analyst", "historian", "advocate"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::persona::{ActivationRule, PersonaId, PersonaRegistry};
use crate::router::ConversationMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Conversation mode '{0}' has no personas mapped")]
    UnmappedMode(ConversationMode),

    #[error("Persona '{persona}' cannot be mapped to '{mode}': {reason}")]
    InvalidPersona {
        persona: String,
        mode: String,
        reason: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Ensemble tuning and the mode → persona mapping.
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub mode_personas: BTreeMap<ConversationMode, Vec<PersonaId>>,
    /// Deadline for one reasoning call, per attempt.
    pub per_call_timeout: Duration,
    /// Deadline for the whole fan-out.
    pub deliberation_timeout: Duration,
    pub max_concurrency: usize,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub retry_backoff: Duration,
    /// Minimum confidence for a stance to count towards a polarity challenge.
    pub challenge_confidence_threshold: f32,
    /// Confidence gap needed to resolve a polarity challenge.
    pub resolution_margin: f32,
    /// Turns below this min confidence pull the sceptic in next time.
    pub low_confidence_threshold: f32,
    pub memory_lookup_limit: usize,
    /// Recent turns the classifier looks at.
    pub history_window: usize,
    pub draft_ttl: Duration,
    pub synthesiser_enabled: bool,
}

fn default_mode_personas() -> BTreeMap<ConversationMode, Vec<PersonaId>> {
    use PersonaId::*;
    BTreeMap::from([
        (ConversationMode::Discovery, vec![Analyst, Historian, Advocate]),
        (ConversationMode::Planning, vec![Operator, Analyst, Advocate]),
        (ConversationMode::RiskReview, vec![Sceptic, Analyst, Historian]),
        (ConversationMode::StatusReporting, vec![Operator, Historian]),
    ])
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            mode_personas: default_mode_personas(),
            per_call_timeout: Duration::from_millis(env_or("COPILOT_PER_CALL_TIMEOUT_MS", 20_000)),
            deliberation_timeout: Duration::from_millis(env_or(
                "COPILOT_DELIBERATION_TIMEOUT_MS",
                45_000,
            )),
            max_concurrency: env_or("COPILOT_MAX_CONCURRENCY", 4),
            max_retries: env_or("COPILOT_MAX_RETRIES", 2),
            retry_backoff: Duration::from_millis(env_or("COPILOT_RETRY_BACKOFF_MS", 250)),
            challenge_confidence_threshold: 0.5,
            resolution_margin: 0.3,
            low_confidence_threshold: 0.4,
            memory_lookup_limit: 8,
            history_window: 4,
            draft_ttl: Duration::from_secs(env_or("COPILOT_DRAFT_TTL_SECS", 3_600)),
            synthesiser_enabled: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawEnsembleConfig {
    per_call_timeout_ms: Option<u64>,
    deliberation_timeout_ms: Option<u64>,
    max_concurrency: Option<usize>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    challenge_confidence_threshold: Option<f32>,
    resolution_margin: Option<f32>,
    low_confidence_threshold: Option<f32>,
    memory_lookup_limit: Option<usize>,
    history_window: Option<usize>,
    draft_ttl_secs: Option<u64>,
    synthesiser_enabled: Option<bool>,
    modes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    ensemble: RawEnsembleConfig,
}

impl EnsembleConfig {
    /// Parse the `[ensemble]` table of a TOML document over the defaults.
    ///
    /// Modes named in `[ensemble.modes]` replace the default mapping for that
    /// mode only. The result is not validated; call [`Self::validate`].
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = toml::from_str(s)?;
        let raw = raw.ensemble;
        let mut config = Self::default();

        if let Some(ms) = raw.per_call_timeout_ms {
            config.per_call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.deliberation_timeout_ms {
            config.deliberation_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.retry_backoff_ms {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = raw.draft_ttl_secs {
            config.draft_ttl = Duration::from_secs(secs);
        }
        config.max_concurrency = raw.max_concurrency.unwrap_or(config.max_concurrency);
        config.max_retries = raw.max_retries.unwrap_or(config.max_retries);
        config.challenge_confidence_threshold = raw
            .challenge_confidence_threshold
            .unwrap_or(config.challenge_confidence_threshold);
        config.resolution_margin = raw.resolution_margin.unwrap_or(config.resolution_margin);
        config.low_confidence_threshold = raw
            .low_confidence_threshold
            .unwrap_or(config.low_confidence_threshold);
        config.memory_lookup_limit = raw.memory_lookup_limit.unwrap_or(config.memory_lookup_limit);
        config.history_window = raw.history_window.unwrap_or(config.history_window);
        config.synthesiser_enabled = raw.synthesiser_enabled.unwrap_or(config.synthesiser_enabled);

        for (mode_tag, persona_tags) in raw.modes {
            let mode: ConversationMode = mode_tag
                .parse()
                .map_err(|e: String| ConfigError::invalid("ensemble.modes", e))?;
            let mut personas = Vec::with_capacity(persona_tags.len());
            for tag in persona_tags {
                let persona = tag.parse::<PersonaId>().map_err(|e| ConfigError::InvalidPersona {
                    persona: tag.clone(),
                    mode: mode.to_string(),
                    reason: e.to_string(),
                })?;
                personas.push(persona);
            }
            config.mode_personas.insert(mode, personas);
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations the runtime cannot honour.
    pub fn validate(&self, registry: &PersonaRegistry) -> Result<(), ConfigError> {
        for mode in ConversationMode::all() {
            let personas = self
                .mode_personas
                .get(mode)
                .filter(|p| !p.is_empty())
                .ok_or(ConfigError::UnmappedMode(*mode))?;

            for persona in personas {
                let config = registry
                    .get(*persona)
                    .ok_or_else(|| ConfigError::InvalidPersona {
                        persona: persona.to_string(),
                        mode: mode.to_string(),
                        reason: "not in the persona registry".into(),
                    })?;
                if config.activation == ActivationRule::SynthesisOnly {
                    return Err(ConfigError::InvalidPersona {
                        persona: persona.to_string(),
                        mode: mode.to_string(),
                        reason: "synthesis-only personas never contribute directly".into(),
                    });
                }
            }
        }

        if self.per_call_timeout.is_zero() {
            return Err(ConfigError::invalid("per_call_timeout", "must be non-zero"));
        }
        if self.deliberation_timeout.is_zero() {
            return Err(ConfigError::invalid("deliberation_timeout", "must be non-zero"));
        }
        if self.draft_ttl.is_zero() {
            return Err(ConfigError::invalid("draft_ttl", "must be non-zero"));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("max_concurrency", "must be at least 1"));
        }
        for (field, value) in [
            ("challenge_confidence_threshold", self.challenge_confidence_threshold),
            ("resolution_margin", self.resolution_margin),
            ("low_confidence_threshold", self.low_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")));
            }
        }

        Ok(())
    }

    /// Personas mapped to `mode`, empty when unmapped.
    pub fn personas_for(&self, mode: ConversationMode) -> &[PersonaId] {
        self.mode_personas
            .get(&mode)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
