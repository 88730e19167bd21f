//! Reasoning service contract and the OpenAI-compatible HTTP client.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::ProposedAction;
use crate::persona::PersonaId;
use crate::router::ConversationMode;

/// One reasoning call on behalf of a persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub persona: PersonaId,
    pub mode: ConversationMode,
    /// The operator's raw input, before prompt assembly.
    pub input: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

/// Parsed reply from the reasoning backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningReply {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub proposed_actions: Vec<ProposedAction>,
}

impl ReasoningReply {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            proposed_actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ProposedAction) -> Self {
        self.proposed_actions.push(action);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasoningError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ReasoningError {
    /// Network failures, rate limits and server errors may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::Unavailable(_) => false,
        }
    }
}

/// Reasoning backend collaborator.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn call(&self, request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError>;

    /// Reachability check for health reporting. Must not consume a completion.
    async fn is_available(&self) -> bool;
}

pub type SharedReasoningService = Arc<dyn ReasoningService>;

// ============================================================================
// Reply parsing
// ============================================================================

fn confidence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[confidence:\s*([0-9]*\.?[0-9]+)\s*\]").expect("confidence marker regex")
    })
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*\[action:\s*([A-Za-z0-9_\-]+)\s*(\{.*\})\s*\]\s*$")
            .expect("action marker regex")
    })
}

/// Pull `[confidence: x]` and `[action: tool {json}]` markers out of a reply.
///
/// Markers are stripped from the text. Confidence is clamped to [0, 1] and
/// falls back to `default_confidence`. Actions with malformed JSON are dropped.
pub fn parse_reply(raw: &str, default_confidence: f32) -> ReasoningReply {
    let confidence = confidence_re()
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(default_confidence);

    let mut proposed_actions = Vec::new();
    for caps in action_re().captures_iter(raw) {
        let (Some(tool), Some(json)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        match serde_json::from_str::<serde_json::Value>(json.as_str()) {
            Ok(input) => proposed_actions.push(ProposedAction::new(tool.as_str(), input)),
            Err(e) => debug!(tool = tool.as_str(), error = %e, "Dropping malformed action marker"),
        }
    }

    let text = action_re().replace_all(raw, "");
    let text = confidence_re().replace_all(&text, "");

    ReasoningReply {
        text: text.trim().to_string(),
        confidence,
        proposed_actions,
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpReasoningConfig {
    /// Full `/chat/completions` URL.
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout: Duration,
    /// Used when a reply carries no confidence marker.
    pub default_confidence: f32,
}

impl Default for HttpReasoningConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("COPILOT_REASONING_URL")
                .unwrap_or_else(|_| "http://localhost:8000/v1/chat/completions".to_string()),
            model: std::env::var("COPILOT_REASONING_MODEL")
                .unwrap_or_else(|_| "default".to_string()),
            api_key: std::env::var("COPILOT_REASONING_API_KEY").ok(),
            temperature: 0.3,
            request_timeout: Duration::from_secs(120),
            default_confidence: 0.6,
        }
    }
}

/// `ReasoningService` over HTTP.
pub struct HttpReasoningService {
    http: reqwest::Client,
    config: HttpReasoningConfig,
}

impl HttpReasoningService {
    pub fn new(config: HttpReasoningConfig) -> Result<Self, ReasoningError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ReasoningError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Models listing URL derived from the completions URL.
    fn models_url(&self) -> String {
        match self.config.url.rfind("/chat/completions") {
            Some(idx) => format!("{}/models", &self.config.url[..idx]),
            None => self.config.url.clone(),
        }
    }

    fn authorised(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn call(&self, request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError> {
        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            max_tokens: u32,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: Option<String>,
        }

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .authorised(self.http.post(&self.config.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasoningError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Http { status, body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::InvalidResponse(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ReasoningError::InvalidResponse("no choices in response".into()))?;

        Ok(parse_reply(&content, self.config.default_confidence))
    }

    async fn is_available(&self) -> bool {
        match self.authorised(self.http.get(self.models_url())).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Reasoning endpoint unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_confidence() {
        let reply = parse_reply("Looks fine.\n[confidence: 0.82]", 0.5);
        assert!((reply.confidence - 0.82).abs() < f32::EPSILON);
        assert_eq!(reply.text, "Looks fine.");
    }

    #[test]
    fn test_parse_confidence_default_and_clamp() {
        assert_eq!(parse_reply("no marker", 0.5).confidence, 0.5);
        assert_eq!(parse_reply("[confidence: 7]", 0.5).confidence, 1.0);
    }

    #[test]
    fn test_parse_actions() {
        let raw = "Update the roadmap.\n\
                   [action: update_artefact {\"artefact_id\": \"roadmap\", \"content\": \"v2\"}]\n\
                   [action: create_note {not json}]\n\
                   [confidence: 0.7]";
        let reply = parse_reply(raw, 0.5);
        assert_eq!(reply.proposed_actions.len(), 1);
        assert_eq!(reply.proposed_actions[0].tool_name, "update_artefact");
        assert_eq!(
            reply.proposed_actions[0].input,
            json!({ "artefact_id": "roadmap", "content": "v2" })
        );
        // malformed markers are still stripped
        assert_eq!(reply.text, "Update the roadmap.");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ReasoningError::Network("reset".into()).is_retryable());
        assert!(ReasoningError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(ReasoningError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(!ReasoningError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!ReasoningError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_models_url() {
        let service = HttpReasoningService::new(HttpReasoningConfig {
            url: "http://router:8000/v1/chat/completions".into(),
            ..HttpReasoningConfig::default()
        })
        .unwrap();
        assert_eq!(service.models_url(), "http://router:8000/v1/models");
    }
}
