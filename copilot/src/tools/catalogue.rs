//! Built-in tool definitions and the frozen catalogue.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use super::{McpToolDefinition, RiskTier};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCatalogueError {
    #[error("Tool '{0}' defined more than once")]
    Duplicate(String),
    #[error("Tool definition has an empty name")]
    EmptyName,
}

// ── Built-in tool inputs ──────────────────────────────────────────────

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
pub struct CreateNoteInput {
    #[schemars(description = "Short note title")]
    pub title: String,
    #[schemars(description = "Note body in markdown")]
    pub body: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
pub struct CreateTicketInput {
    pub title: String,
    pub description: String,
    #[schemars(description = "low, normal or urgent (default: normal)")]
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
pub struct UpdateArtefactInput {
    #[schemars(description = "Artefact to update")]
    pub artefact_id: String,
    #[schemars(description = "Full replacement content")]
    pub content: String,
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
pub struct ScheduleMeetingInput {
    pub title: String,
    pub attendees: Vec<String>,
    #[schemars(description = "RFC 3339 start time")]
    pub start: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
pub struct SendEmailInput {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
pub struct DeleteArtefactInput {
    pub artefact_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
pub struct PublishReportInput {
    #[schemars(description = "Report artefact to publish")]
    pub artefact_id: String,
    #[schemars(description = "Distribution list or channel")]
    pub audience: String,
}

/// Frozen, name-indexed tool catalogue.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalogue {
    tools: BTreeMap<String, McpToolDefinition>,
}

impl ToolCatalogue {
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = McpToolDefinition>,
    ) -> Result<Self, ToolCatalogueError> {
        let mut tools = BTreeMap::new();
        for def in definitions {
            if def.name.trim().is_empty() {
                return Err(ToolCatalogueError::EmptyName);
            }
            if tools.contains_key(&def.name) {
                return Err(ToolCatalogueError::Duplicate(def.name));
            }
            tools.insert(def.name.clone(), def);
        }
        Ok(Self { tools })
    }

    /// The default catalogue shipped with the runtime.
    pub fn builtin() -> Self {
        let definitions = vec![
            McpToolDefinition::new("create_note", "Record a note in the workspace", RiskTier::Low)
                .with_input::<CreateNoteInput>(),
            McpToolDefinition::new(
                "create_ticket",
                "Open a ticket in the team tracker",
                RiskTier::Medium,
            )
            .with_input::<CreateTicketInput>(),
            McpToolDefinition::new(
                "update_artefact",
                "Replace the content of a planning artefact",
                RiskTier::Medium,
            )
            .with_input::<UpdateArtefactInput>()
            .mutating_artefact(),
            McpToolDefinition::new(
                "schedule_meeting",
                "Put a meeting in attendees' calendars",
                RiskTier::Medium,
            )
            .with_input::<ScheduleMeetingInput>(),
            McpToolDefinition::new(
                "send_email",
                "Send an email on the user's behalf",
                RiskTier::High,
            )
            .with_input::<SendEmailInput>(),
            McpToolDefinition::new(
                "delete_artefact",
                "Permanently delete an artefact",
                RiskTier::High,
            )
            .with_input::<DeleteArtefactInput>(),
            McpToolDefinition::new(
                "publish_report",
                "Publish a status report to its audience",
                RiskTier::High,
            )
            .with_input::<PublishReportInput>()
            .allow_full_auto(),
        ];

        let mut tools = BTreeMap::new();
        for def in definitions {
            tools.insert(def.name.clone(), def);
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&McpToolDefinition> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &McpToolDefinition> {
        self.tools.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
