//! Mode classifier.
//!
//! Pure keyword scoring over the current input and a bounded window of recent
//! turns. The same context always yields the same mode. Failures never
//! escape: they resolve to the conservative mode, and the sceptic defaults on.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EnsembleConfig;
use crate::session::ConversationTurn;

/// Conversation mode of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Discovery,
    Planning,
    RiskReview,
    StatusReporting,
}

impl ConversationMode {
    pub fn all() -> &'static [ConversationMode] {
        &[
            Self::Discovery,
            Self::Planning,
            Self::RiskReview,
            Self::StatusReporting,
        ]
    }

    /// Mode used when classification cannot be trusted.
    pub fn conservative() -> Self {
        Self::RiskReview
    }

    /// One-line brief included in persona prompts.
    pub fn focus(self) -> &'static str {
        match self {
            Self::Discovery => "explore the problem space and surface options.",
            Self::Planning => "turn intent into concrete, sequenced steps.",
            Self::RiskReview => "examine what could go wrong before anything is committed.",
            Self::StatusReporting => "report progress against what was agreed.",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Discovery => &[
                "what", "why", "explore", "understand", "research", "idea", "learn",
                "discover", "background", "options", "brainstorm",
            ],
            Self::Planning => &[
                "plan", "schedule", "roadmap", "milestone", "next step", "prioritise",
                "prioritize", "estimate", "timeline", "sequence", "allocate",
            ],
            Self::RiskReview => &[
                "risk", "concern", "blocker", "threat", "compliance", "security",
                "irreversible", "rollback", "incident", "failure", "danger",
            ],
            Self::StatusReporting => &[
                "status", "progress", "update on", "report", "summary", "summarise",
                "summarize", "how far", "so far", "standup",
            ],
        }
    }
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Planning => write!(f, "planning"),
            Self::RiskReview => write!(f, "risk_review"),
            Self::StatusReporting => write!(f, "status_reporting"),
        }
    }
}

impl std::str::FromStr for ConversationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "discovery" => Ok(Self::Discovery),
            "planning" => Ok(Self::Planning),
            "risk_review" => Ok(Self::RiskReview),
            "status_reporting" => Ok(Self::StatusReporting),
            other => Err(format!("unknown conversation mode: {other}")),
        }
    }
}

/// Tie-break order: earlier wins. Biased towards caution.
const TIE_BREAK_ORDER: [ConversationMode; 4] = [
    ConversationMode::RiskReview,
    ConversationMode::Planning,
    ConversationMode::StatusReporting,
    ConversationMode::Discovery,
];

const IRREVERSIBLE_KEYWORDS: &[&str] = &[
    "delete", "remove", "drop", "send", "publish", "deploy", "cancel", "terminate",
    "irreversible", "permanent", "wipe", "purge",
];

const CURRENT_WEIGHT: u32 = 2;
const HISTORY_WEIGHT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("input is empty")]
    EmptyInput,
}

/// Why the risk persona was pulled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskSignal {
    IrreversibleAction { keyword: String },
    LowConfidenceHistory { turn_seq: u64, confidence: f32 },
    UnresolvedChallenges { turn_seq: u64, count: usize },
    RiskReviewMode,
}

/// What the classifier sees: the current input plus recent turns.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierContext<'a> {
    pub input: &'a str,
    pub history: &'a [ConversationTurn],
}

impl<'a> ClassifierContext<'a> {
    pub fn new(input: &'a str, history: &'a [ConversationTurn]) -> Self {
        Self { input, history }
    }
}

/// Full classifier output, for logging and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeAnalysis {
    pub mode: ConversationMode,
    pub sceptic: bool,
    pub scores: Vec<(ConversationMode, u32)>,
    pub risk_signals: Vec<RiskSignal>,
}

impl ModeAnalysis {
    pub fn summary(&self) -> String {
        let scores: Vec<String> = self
            .scores
            .iter()
            .map(|(mode, score)| format!("{mode}={score}"))
            .collect();
        format!(
            "mode={} sceptic={} scores[{}] signals={}",
            self.mode,
            self.sceptic,
            scores.join(","),
            self.risk_signals.len()
        )
    }
}

/// Stateless mode classifier.
#[derive(Debug, Clone)]
pub struct ModeClassifier {
    history_window: usize,
    low_confidence_threshold: f32,
}

impl ModeClassifier {
    pub fn new(history_window: usize, low_confidence_threshold: f32) -> Self {
        Self {
            history_window,
            low_confidence_threshold,
        }
    }

    pub fn from_config(config: &EnsembleConfig) -> Self {
        Self::new(config.history_window, config.low_confidence_threshold)
    }

    /// Classify the turn's mode. Errors resolve to [`ConversationMode::conservative`].
    pub fn classify_mode(&self, ctx: &ClassifierContext<'_>) -> ConversationMode {
        match self.try_classify(ctx) {
            Ok(mode) => mode,
            Err(e) => {
                warn!(error = %e, "Mode classification failed, using conservative mode");
                ConversationMode::conservative()
            }
        }
    }

    /// Whether the risk persona joins. Errors resolve to `true`.
    pub fn should_activate_sceptic(
        &self,
        ctx: &ClassifierContext<'_>,
        mode: ConversationMode,
    ) -> bool {
        match self.risk_signals(ctx, mode) {
            Ok(signals) => !signals.is_empty(),
            Err(e) => {
                warn!(error = %e, "Risk signal detection failed, activating sceptic");
                true
            }
        }
    }

    pub fn analyze(&self, ctx: &ClassifierContext<'_>) -> ModeAnalysis {
        let mode = self.classify_mode(ctx);
        let (sceptic, risk_signals) = match self.risk_signals(ctx, mode) {
            Ok(signals) => (!signals.is_empty(), signals),
            Err(_) => (true, Vec::new()),
        };
        let analysis = ModeAnalysis {
            mode,
            sceptic,
            scores: self.scores(ctx),
            risk_signals,
        };
        debug!(analysis = %analysis.summary(), "Classified turn");
        analysis
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    fn try_classify(
        &self,
        ctx: &ClassifierContext<'_>,
    ) -> Result<ConversationMode, ClassifierError> {
        if ctx.input.trim().is_empty() {
            return Err(ClassifierError::EmptyInput);
        }

        let scores = self.scores(ctx);
        let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if best == 0 {
            return Ok(ConversationMode::Discovery);
        }

        Ok(TIE_BREAK_ORDER
            .iter()
            .copied()
            .find(|mode| scores.iter().any(|(m, s)| m == mode && *s == best))
            .unwrap_or_else(ConversationMode::conservative))
    }

    fn scores(&self, ctx: &ClassifierContext<'_>) -> Vec<(ConversationMode, u32)> {
        let current = normalise(ctx.input);
        let history: Vec<String> = self
            .recent(ctx.history)
            .iter()
            .map(|turn| normalise(&turn.input))
            .collect();

        ConversationMode::all()
            .iter()
            .map(|mode| {
                let mut score = count_hits(&current, mode.keywords()) * CURRENT_WEIGHT;
                for text in &history {
                    score += count_hits(text, mode.keywords()) * HISTORY_WEIGHT;
                }
                (*mode, score)
            })
            .collect()
    }

    fn risk_signals(
        &self,
        ctx: &ClassifierContext<'_>,
        mode: ConversationMode,
    ) -> Result<Vec<RiskSignal>, ClassifierError> {
        if ctx.input.trim().is_empty() {
            return Err(ClassifierError::EmptyInput);
        }

        let mut signals = Vec::new();
        if mode == ConversationMode::RiskReview {
            signals.push(RiskSignal::RiskReviewMode);
        }

        let current = normalise(ctx.input);
        for keyword in IRREVERSIBLE_KEYWORDS {
            if count_hits(&current, &[*keyword]) > 0 {
                signals.push(RiskSignal::IrreversibleAction {
                    keyword: keyword.to_string(),
                });
            }
        }

        let recent = self.recent(ctx.history);
        for turn in recent {
            if let Some(confidence) = turn.response.min_confidence {
                if confidence < self.low_confidence_threshold {
                    signals.push(RiskSignal::LowConfidenceHistory {
                        turn_seq: turn.seq,
                        confidence,
                    });
                }
            }
        }
        if let Some(last) = recent.last() {
            let count = last.response.unresolved_challenges.len();
            if count > 0 {
                signals.push(RiskSignal::UnresolvedChallenges {
                    turn_seq: last.seq,
                    count,
                });
            }
        }

        Ok(signals)
    }

    fn recent<'h>(&self, history: &'h [ConversationTurn]) -> &'h [ConversationTurn] {
        let start = history.len().saturating_sub(self.history_window);
        &history[start..]
    }
}

fn normalise(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Whole-word pattern admitting common inflections: "deploying" and
/// "dropped" hit, "dropdown" and "whatever" do not.
fn keyword_pattern(keyword: &str) -> String {
    match keyword.strip_suffix('e') {
        Some(stem) => format!(r"\b{}(?:e|es|ed|ing)\b", regex::escape(stem)),
        None => format!(
            r"\b{}(?:s|es|ed|ing|[a-z]ed|[a-z]ing)?\b",
            regex::escape(keyword)
        ),
    }
}

fn keyword_res() -> &'static HashMap<&'static str, Regex> {
    static RES: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        ConversationMode::all()
            .iter()
            .flat_map(|mode| mode.keywords().iter())
            .chain(IRREVERSIBLE_KEYWORDS.iter())
            .filter_map(|kw| Regex::new(&keyword_pattern(kw)).ok().map(|re| (*kw, re)))
            .collect()
    })
}

/// Count keywords present as whole words.
fn count_hits(normalised: &str, keywords: &[&'static str]) -> u32 {
    let res = keyword_res();
    keywords
        .iter()
        .filter(|kw| res.get(*kw).is_some_and(|re| re.is_match(normalised)))
        .count() as u32
}
