//! Prompt assembly for persona and synthesis calls.

use crate::ensemble::{Challenge, Contribution};
use crate::memory::MemoryRecord;
use crate::persona::{PersonaConfig, PersonaRegistry};
use crate::router::ConversationMode;
use crate::tools::McpToolDefinition;

const REPLY_FORMAT: &str = r#"Reply in plain prose. To have a tool run, add one line per call:
[action: tool_name {"field": "value"}]
Every required input field must be present.
State your position on the proposed course with [stance: proceed] or [stance: hold].
End your response with your confidence (0.0-1.0) in brackets like [confidence: 0.85]."#;

/// System prompt for one persona in one conversation mode.
pub fn system_prompt(persona: &PersonaConfig, mode: ConversationMode) -> String {
    format!(
        "You are the {name} on a copilot advisory panel.\n{role}\n\n\
         The conversation is in {mode} mode: {focus}\n\
         You may propose tool calls but never execute them yourself.\n\n{REPLY_FORMAT}",
        name = persona.display_name,
        role = persona.role,
        mode = mode,
        focus = mode.focus(),
    )
}

/// User prompt: memory context, tool summary, then the input itself.
pub fn build_user_prompt(
    input: &str,
    memory: &[MemoryRecord],
    tools: &[&McpToolDefinition],
) -> String {
    let mut prompt = String::new();

    if !memory.is_empty() {
        prompt.push_str("## Relevant memory\n");
        for record in memory {
            prompt.push_str(&format!("- ({}) {}\n", record.kind, record.content));
        }
        prompt.push_str("\n---\n\n");
    }

    if !tools.is_empty() {
        prompt.push_str("## Available tools\n");
        for tool in tools {
            prompt.push_str(&format!(
                "- `{}` [{} risk]: {}\n",
                tool.name, tool.risk_tier, tool.description
            ));
            let fields = tool.input_summary();
            if !fields.is_empty() {
                prompt.push_str(&format!("  input: {{{fields}}}\n"));
            }
        }
        prompt.push_str("\n---\n\n");
    }

    prompt.push_str(input);
    prompt
}

/// Prompt for the synthesis pass over a disagreement.
pub fn synthesis_prompt(
    input: &str,
    contributions: &[Contribution],
    challenges: &[Challenge],
    registry: &PersonaRegistry,
) -> String {
    let mut prompt = format!("## Request\n{input}\n\n## Positions\n");
    for c in contributions.iter().filter(|c| c.is_success()) {
        prompt.push_str(&format!(
            "### {} (confidence {:.2})\n{}\n\n",
            registry.display_name(c.persona),
            c.confidence,
            c.text.trim()
        ));
    }
    prompt.push_str("## Disagreements\n");
    for challenge in challenges {
        prompt.push_str(&format!("- {}\n", challenge.description));
    }
    prompt.push_str(
        "\nSummarise each position and the trade-off between them in a short paragraph. \
         Do not pick a winner where the panel did not.",
    );
    prompt
}
