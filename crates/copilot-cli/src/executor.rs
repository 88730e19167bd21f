use async_trait::async_trait;
use copilot::{ToolCall, ToolExecutionContext, ToolExecutor, ToolResult};
use serde_json::json;
use tracing::info;

/// Executor that performs nothing and echoes what would have run.
#[derive(Debug, Default)]
pub struct DryRunToolExecutor;

#[async_trait]
impl ToolExecutor for DryRunToolExecutor {
    async fn execute(&self, call: &ToolCall, ctx: &ToolExecutionContext) -> ToolResult {
        info!(
            session_id = %ctx.session_id,
            tool = %call.tool_name,
            persona = ?ctx.persona,
            draft_id = ?ctx.draft_id,
            "Dry run: tool not executed"
        );
        ToolResult::ok(json!({
            "dry_run": true,
            "tool": call.tool_name,
            "input": call.input,
        }))
    }
}
