//! Copilot Core Library
//!
//! Reasoning and governance core of an AI copilot:
//! - Several persona reasoning agents deliberate over a shared conversation
//! - Their contributions are merged into one response, disagreements disclosed
//! - Every side-effecting tool call they propose passes an autonomy policy
//!   engine before anything runs, and leaves an audit record
//!
//! # Components
//!
//! ## Leaves
//! - `persona`: fixed persona registry and prompt assembly
//! - `router`: conversation mode classifier and sceptic activation
//! - `tools`: frozen tool catalogue with risk tiers and input contracts
//! - `policy`: allow/hold/deny decision table and the append-only audit log
//! - `memory`: session-scoped memory store
//!
//! ## Coordination
//! - `ensemble`: concurrent persona fan-out, challenge detection, synthesis
//! - `session`: per-session serialized state and the draft lifecycle
//! - `runtime`: `invoke`, `confirm_draft`, `reject_draft`, `health`
//!
//! # Usage
//!
//! ```ignore
//! let runtime = CopilotRuntime::builder(reasoning, executor)
//!     .config(EnsembleConfig::load(Path::new("copilot.toml"))?)
//!     .default_autonomy(AutonomyMode::Assisted)
//!     .build()?;
//!
//! let response = runtime.invoke(InvokeRequest::new("Plan the Q3 roadmap")).await?;
//! for draft in &response.held {
//!     runtime.confirm_draft(&response.session_id, &draft.id).await?;
//! }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod ensemble;
pub mod error;
pub mod events;
pub mod memory;
pub mod persona;
pub mod policy;
pub mod router;
pub mod runtime;
pub mod session;
pub mod tools;

// Configuration and errors
pub use config::{ConfigError, EnsembleConfig};
pub use error::{CopilotError, CopilotResult, ErrorKind};

// Personas, modes and tools
pub use persona::{ActivationRule, PersonaConfig, PersonaId, PersonaRegistry};
pub use router::{ClassifierContext, ConversationMode, ModeAnalysis, ModeClassifier, RiskSignal};
pub use tools::{McpToolDefinition, RiskTier, ToolCall, ToolCatalogue};

// Policy
pub use policy::{
    AuditLog, AutonomyCapabilities, AutonomyMode, PolicyDecision, PolicyEngine, PolicyEvaluation,
    ToolCallOutcome, ToolCallRecord,
};

// Memory
pub use memory::{
    InMemoryMemoryStore, MemoryError, MemoryQuery, MemoryRecord, MemoryRecordKind, MemoryStore,
    SharedMemoryStore,
};

// Ensemble
pub use ensemble::{
    Challenge, ChallengeKind, ChallengeResolution, Contribution, CopilotResponse, Deliberation,
    DeliberationOutcome, EnsembleOrchestrator, HttpReasoningConfig, HttpReasoningService,
    ProposedAction, ReasoningError, ReasoningReply, ReasoningRequest, ReasoningService,
    ResolutionStrategy, SharedReasoningService,
};

// Sessions
pub use session::{
    ConversationTurn, DraftResolution, DraftStatus, PendingDraft, SessionError, SessionManager,
    SessionState,
};

// Runtime
pub use runtime::{
    ArtefactDiff, ArtefactService, CopilotRuntime, CopilotRuntimeBuilder, HealthResponse,
    HealthStatus, InMemoryArtefactService, InvokeRequest, InvokeResponse, ToolExecutionContext,
    ToolExecutor, ToolResult,
};

// Events
pub use events::{CopilotEvent, EventBus, EventFilter, FilteredReceiver};
