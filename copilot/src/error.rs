//! Error taxonomy for the copilot core.
//!
//! Contribution-level failures are absorbed by the orchestrator and never reach
//! this type. Policy denials are outcomes, not errors. What remains is either
//! surfaced to the caller as-is or is fatal at startup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::ensemble::ReasoningError;
use crate::memory::MemoryError;
use crate::policy::PolicyError;
use crate::session::SessionError;

/// Result alias for runtime-facing operations.
pub type CopilotResult<T> = Result<T, CopilotError>;

/// Coarse classification of a [`CopilotError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts and network blips; safe to retry the same request.
    Transient,
    /// Every active persona failed for this turn.
    EnsembleExhausted,
    /// Malformed request, unknown session or draft. Retrying unchanged will fail again.
    Validation,
    /// Misconfiguration or a broken internal invariant.
    Fatal,
    /// A collaborator (memory store, artefact service) failed.
    Collaborator,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::EnsembleExhausted)
    }

    /// Suggested caller action for this kind.
    pub fn suggested_action(self) -> &'static str {
        match self {
            Self::Transient => "Retry the request after a short delay",
            Self::EnsembleExhausted => "Retry later; the reasoning backend may be degraded",
            Self::Validation => "Fix the request before retrying",
            Self::Fatal => "Check configuration and restart",
            Self::Collaborator => "Check collaborator health via the health endpoint",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::EnsembleExhausted => write!(f, "ensemble_exhausted"),
            Self::Validation => write!(f, "validation"),
            Self::Fatal => write!(f, "fatal"),
            Self::Collaborator => write!(f, "collaborator"),
        }
    }
}

/// Errors surfaced by the copilot runtime.
#[derive(Debug, Error)]
pub enum CopilotError {
    #[error("Ensemble exhausted: all {attempted} personas failed")]
    EnsembleExhausted {
        attempted: usize,
        failures: Vec<String>,
    },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Memory store error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Reasoning service error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

impl CopilotError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EnsembleExhausted { .. } => ErrorKind::EnsembleExhausted,
            Self::Validation { .. } | Self::Session(_) => ErrorKind::Validation,
            Self::Config(_) | Self::Policy(_) => ErrorKind::Fatal,
            Self::Memory(e) if e.is_retryable() => ErrorKind::Transient,
            Self::Memory(_) => ErrorKind::Collaborator,
            Self::Reasoning(e) if e.is_retryable() => ErrorKind::Transient,
            Self::Reasoning(_) => ErrorKind::Collaborator,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EnsembleExhausted { .. } => "ENSEMBLE_EXHAUSTED",
            Self::Validation { .. } => "INVALID_REQUEST",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Session(SessionError::UnknownSession { .. }) => "UNKNOWN_SESSION",
            Self::Session(SessionError::DraftNotFound { .. }) => "DRAFT_NOT_FOUND",
            Self::Session(SessionError::DraftAlreadyResolved { .. }) => "DRAFT_ALREADY_RESOLVED",
            Self::Memory(_) => "MEMORY_ERROR",
            Self::Reasoning(_) => "REASONING_ERROR",
            Self::Policy(_) => "POLICY_ERROR",
        }
    }
}
