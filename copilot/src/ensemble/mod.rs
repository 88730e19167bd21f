//! Ensemble deliberation
//!
//! Runs the persona panel for one turn and merges what it says.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     EnsembleOrchestrator                         │
//! │  classify mode ─► active personas ─► memory lookup ─► prompts    │
//! └───────┬─────────────────┬─────────────────┬─────────────────────┘
//!         │ JoinSet task    │ JoinSet task    │ JoinSet task   (bounded by Semaphore)
//!         ▼                 ▼                 ▼
//!   ┌───────────┐     ┌───────────┐     ┌───────────┐
//!   │ Operator  │     │ Analyst   │     │ Advocate  │   ReasoningService::call
//!   └─────┬─────┘     └─────┬─────┘     └─────┬─────┘   (timeout + retry each)
//!         └────────────┬────┴─────────────────┘
//!                      ▼  fan-in keyed by persona, deadline aborts stragglers
//!             ┌──────────────────┐
//!             │ ChallengeDetector│  action collisions, opposing stances
//!             └────────┬─────────┘
//!                      ▼
//!       Direct ◄── none? ──► SynthesiserPass (disclosure + optional narrative)
//!                      ▼
//!               CopilotResponse
//! ```
//!
//! Contribution order is persona priority, never completion order, so the
//! same replies always produce the same response.

pub mod challenge;
pub mod orchestrator;
pub mod reasoning;
pub mod synthesis;
pub mod types;

pub use challenge::{stance_of, ChallengeDetector, Stance};
pub use orchestrator::EnsembleOrchestrator;
pub use reasoning::{
    parse_reply, HttpReasoningConfig, HttpReasoningService, ReasoningError, ReasoningReply,
    ReasoningRequest, ReasoningService, SharedReasoningService,
};
pub use types::{
    Challenge, ChallengeKind, ChallengeResolution, Contribution, ContributionStatus,
    CopilotResponse, Deliberation, DeliberationOutcome, ProposedAction, ResolutionStrategy,
};
