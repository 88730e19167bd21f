//! Tool executor collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::persona::PersonaId;
use crate::policy::{AutonomyMode, ToolCallOutcome};
use crate::tools::ToolCall;

/// Who asked for the call and under what authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionContext {
    pub session_id: String,
    pub persona: Option<PersonaId>,
    pub autonomy_mode: AutonomyMode,
    /// Set when the call runs because an operator confirmed a draft.
    pub draft_id: Option<String>,
}

/// Result reported by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(message.into()),
        }
    }

    pub fn into_outcome(self) -> ToolCallOutcome {
        ToolCallOutcome::executed(self.success, self.payload, self.error)
    }
}

/// Runs allowed tool calls. Failures are reported in the result, never
/// raised, so every dispatched call ends in an audit record.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall, ctx: &ToolExecutionContext) -> ToolResult;
}

pub type SharedToolExecutor = Arc<dyn ToolExecutor>;
