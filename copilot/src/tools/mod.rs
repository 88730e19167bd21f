//! Tool Catalogue
//!
//! Static registry of the side-effecting tools personas may propose. Each
//! definition carries its input contract and risk tier; the policy engine reads
//! both. The catalogue is frozen once the runtime is built.

pub mod catalogue;

pub use catalogue::{ToolCatalogue, ToolCatalogueError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::persona::PersonaId;

/// Risk tier of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    /// Any tier this build does not understand. Always denied.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Definition of one catalogue tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool input.
    pub input_schema: Value,
    pub risk_tier: RiskTier,
    /// High-risk tools run unattended in full-auto mode only when this is set.
    #[serde(default)]
    pub full_auto_allowed: bool,
    /// Execution merges into an artefact; previews are artefact diffs.
    #[serde(default)]
    pub mutates_artefact: bool,
}

impl McpToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        risk_tier: RiskTier,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object" }),
            risk_tier,
            full_auto_allowed: false,
            mutates_artefact: false,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Derive the input schema from a typed input struct.
    pub fn with_input<T: schemars::JsonSchema>(self) -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
        self.with_schema(schema)
    }

    pub fn allow_full_auto(mut self) -> Self {
        self.full_auto_allowed = true;
        self
    }

    pub fn mutating_artefact(mut self) -> Self {
        self.mutates_artefact = true;
        self
    }

    /// One-line rendering of the top-level input fields, required ones
    /// marked, e.g. `title: string (required), points: integer|null`.
    pub fn input_summary(&self) -> String {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let Some(properties) = self.input_schema.get("properties").and_then(Value::as_object)
        else {
            return String::new();
        };

        properties
            .iter()
            .map(|(field, prop)| {
                let ty = match prop.get("type") {
                    Some(Value::String(t)) => t.clone(),
                    Some(Value::Array(types)) => types
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("|"),
                    _ => "any".to_string(),
                };
                if required.contains(&field.as_str()) {
                    format!("{field}: {ty} (required)")
                } else {
                    format!("{field}: {ty}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check `input` against the top-level shape of the input schema:
    /// the root type, required properties, and declared property types.
    pub fn validate_input(&self, input: &Value) -> Result<(), String> {
        let schema = &self.input_schema;
        if !type_admits(schema.get("type"), input) {
            return Err(format!(
                "input for '{}' must be of type {}",
                self.name,
                schema.get("type").map(Value::to_string).unwrap_or_default()
            ));
        }

        let Some(object) = input.as_object() else {
            return Ok(());
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                match object.get(field) {
                    Some(v) if !v.is_null() => {}
                    _ => return Err(format!("missing required field '{field}'")),
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (field, value) in object {
                if let Some(prop) = properties.get(field) {
                    if !type_admits(prop.get("type"), value) {
                        return Err(format!(
                            "field '{field}' must be of type {}",
                            prop.get("type").map(Value::to_string).unwrap_or_default()
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

fn type_admits(declared: Option<&Value>, value: &Value) -> bool {
    match declared {
        None => true,
        Some(Value::String(t)) => json_type_matches(t, value),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| json_type_matches(t, value)),
        Some(_) => true,
    }
}

fn json_type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

/// A concrete request to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub input: Value,
    /// Persona that proposed the call, when it came from deliberation.
    pub persona: Option<PersonaId>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            input,
            persona: None,
        }
    }

    pub fn with_persona(mut self, persona: PersonaId) -> Self {
        self.persona = Some(persona);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticket_tool() -> McpToolDefinition {
        McpToolDefinition::new("create_ticket", "Create a ticket", RiskTier::Medium).with_schema(
            json!({
                "type": "object",
                "required": ["title"],
                "properties": {
                    "title": { "type": "string" },
                    "points": { "type": ["integer", "null"] }
                }
            }),
        )
    }

    #[test]
    fn test_unknown_risk_tier_deserializes() {
        let def: McpToolDefinition = serde_json::from_value(json!({
            "name": "launch_rocket",
            "description": "",
            "input_schema": {},
            "risk_tier": "catastrophic"
        }))
        .unwrap();
        assert_eq!(def.risk_tier, RiskTier::Unknown);
        assert!(!def.full_auto_allowed);
        assert!(!def.mutates_artefact);
    }

    #[test]
    fn test_validate_accepts_well_formed_input() {
        let tool = ticket_tool();
        assert!(tool.validate_input(&json!({ "title": "Fix login" })).is_ok());
        assert!(tool
            .validate_input(&json!({ "title": "Fix login", "points": 3 }))
            .is_ok());
        assert!(tool
            .validate_input(&json!({ "title": "Fix login", "points": null }))
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = ticket_tool().validate_input(&json!({})).unwrap_err();
        assert!(err.contains("title"));
        let err = ticket_tool()
            .validate_input(&json!({ "title": null }))
            .unwrap_err();
        assert!(err.contains("title"));
    }

    #[test]
    fn test_validate_rejects_wrong_types() {
        assert!(ticket_tool().validate_input(&json!("just a string")).is_err());
        assert!(ticket_tool()
            .validate_input(&json!({ "title": 42 }))
            .is_err());
        assert!(ticket_tool()
            .validate_input(&json!({ "title": "x", "points": 2.5 }))
            .is_err());
    }

    #[test]
    fn test_input_summary_marks_required() {
        assert_eq!(
            ticket_tool().input_summary(),
            "points: integer|null, title: string (required)"
        );
        let bare = McpToolDefinition::new("ping", "Ping", RiskTier::Low);
        assert_eq!(bare.input_summary(), "");
    }

    #[test]
    fn test_tool_call_ids_unique() {
        let a = ToolCall::new("create_ticket", json!({}));
        let b = ToolCall::new("create_ticket", json!({})).with_persona(PersonaId::Operator);
        assert_ne!(a.id, b.id);
        assert_eq!(b.persona, Some(PersonaId::Operator));
    }
}
