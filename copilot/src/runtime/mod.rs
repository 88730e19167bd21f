//! Copilot Runtime
//!
//! Entry point for callers. One invocation flows:
//!
//! ```text
//! InvokeRequest
//!   └─► validate ─► SessionManager::acquire (per-session lock held to the end)
//!         └─► EnsembleOrchestrator::deliberate
//!               └─► per proposed action: PolicyEngine::evaluate
//!                     ├─ allow ─► ToolExecutor / ArtefactService ─► record
//!                     ├─ hold  ─► PendingDraft (+ diff preview)  ─► record
//!                     └─ deny  ───────────────────────────────────► record
//!   ◄─ append turn ◄─ InvokeResponse
//! ```

pub mod artefacts;
pub mod copilot;
pub mod executor;
pub mod types;

pub use artefacts::{
    ArtefactDiff, ArtefactEdit, ArtefactError, ArtefactRevision, ArtefactService,
    InMemoryArtefactService, SharedArtefactService,
};
pub use copilot::{CopilotRuntime, CopilotRuntimeBuilder};
pub use executor::{SharedToolExecutor, ToolExecutionContext, ToolExecutor, ToolResult};
pub use types::{
    CollaboratorHealth, DeniedAction, HealthResponse, HealthStatus, InvokeRequest, InvokeResponse,
};
