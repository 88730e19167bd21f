use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use copilot::{AutonomyMode, EnsembleConfig, HttpReasoningConfig};
use serde::Deserialize;

/// `[reasoning]` table of the CLI config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReasoning {
    url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    temperature: Option<f32>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCliDocument {
    #[serde(default)]
    reasoning: RawReasoning,
    default_autonomy: Option<String>,
}

/// Top-level CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// OpenAI-compatible chat completions endpoint
    pub reasoning: HttpReasoningConfig,
    /// Mode for sessions that don't name one
    pub default_autonomy: AutonomyMode,
    pub ensemble: EnsembleConfig,
    /// File the settings were read from, if any
    pub source: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            reasoning: HttpReasoningConfig::default(),
            default_autonomy: std::env::var("COPILOT_DEFAULT_AUTONOMY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            ensemble: EnsembleConfig::default(),
            source: None,
        }
    }
}

impl CliConfig {
    /// Environment defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        let Some(path) = path else {
            return Ok(config);
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        config.apply_toml(&text)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str) -> Result<()> {
        let raw: RawCliDocument = toml::from_str(text).context("Invalid CLI config")?;
        self.ensemble = EnsembleConfig::from_toml_str(text).context("Invalid [ensemble] table")?;

        let reasoning = raw.reasoning;
        if let Some(url) = reasoning.url {
            self.reasoning.url = url;
        }
        if let Some(model) = reasoning.model {
            self.reasoning.model = model;
        }
        if reasoning.api_key.is_some() {
            self.reasoning.api_key = reasoning.api_key;
        }
        if let Some(temperature) = reasoning.temperature {
            self.reasoning.temperature = temperature;
        }
        if let Some(secs) = reasoning.request_timeout_secs {
            self.reasoning.request_timeout = Duration::from_secs(secs);
        }
        if let Some(tag) = raw.default_autonomy {
            self.default_autonomy = tag
                .parse()
                .with_context(|| format!("Invalid default_autonomy '{tag}'"))?;
        }
        Ok(())
    }
}
