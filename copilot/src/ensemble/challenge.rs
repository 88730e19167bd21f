//! Challenge detection.
//!
//! Two kinds of disagreement are recognised:
//!
//! - **Action collisions**: successful contributions propose different calls
//!   (tool or input) against the same target, whether from several personas
//!   or from one. One challenge per target.
//! - **Opposing recommendations**: confident personas take opposite stances on
//!   whether to go ahead. One challenge per deliberation.
//!
//! Both are deterministic over the contribution list, which arrives in
//! priority order; challenge persona lists keep that order.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::{
    Challenge, ChallengeKind, ChallengeResolution, Contribution, ProposedAction,
};
use crate::config::EnsembleConfig;
use crate::persona::{PersonaId, PersonaRegistry};

/// A persona's position on going ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Proceed,
    Hold,
    Neutral,
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[stance:\s*(proceed|hold)\s*\]").expect("stance marker regex")
    })
}

const HOLD_PHRASES: &[&str] = &[
    "do not proceed",
    "don't proceed",
    "recommend against",
    "advise against",
    "should not go ahead",
    "hold off",
    "too risky",
    "not ready",
];

const PROCEED_PHRASES: &[&str] = &[
    "recommend proceeding",
    "safe to proceed",
    "should proceed",
    "go ahead",
    "ready to ship",
];

/// Stance from an explicit marker, else from phrasing. Hold phrasing wins over
/// proceed phrasing.
pub fn stance_of(text: &str) -> Stance {
    if let Some(marker) = marker_re().captures(text).and_then(|c| c.get(1)) {
        return if marker.as_str().eq_ignore_ascii_case("hold") {
            Stance::Hold
        } else {
            Stance::Proceed
        };
    }
    let lower = text.to_lowercase();
    if HOLD_PHRASES.iter().any(|p| lower.contains(p)) {
        return Stance::Hold;
    }
    if PROCEED_PHRASES.iter().any(|p| lower.contains(p)) {
        return Stance::Proceed;
    }
    Stance::Neutral
}

/// Text with stance markers removed, for display.
pub fn strip_stance_markers(text: &str) -> String {
    marker_re().replace_all(text, "").trim().to_string()
}

#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    confidence_threshold: f32,
    resolution_margin: f32,
}

impl ChallengeDetector {
    pub fn new(confidence_threshold: f32, resolution_margin: f32) -> Self {
        Self {
            confidence_threshold,
            resolution_margin,
        }
    }

    pub fn from_config(config: &EnsembleConfig) -> Self {
        Self::new(
            config.challenge_confidence_threshold,
            config.resolution_margin,
        )
    }

    pub fn detect(
        &self,
        contributions: &[Contribution],
        registry: &PersonaRegistry,
    ) -> Vec<Challenge> {
        let mut challenges = self.action_collisions(contributions, registry);
        if let Some(challenge) = self.opposing_recommendations(contributions, registry) {
            challenges.push(challenge);
        }
        challenges
    }

    fn action_collisions(
        &self,
        contributions: &[Contribution],
        registry: &PersonaRegistry,
    ) -> Vec<Challenge> {
        let mut by_target: BTreeMap<&str, Vec<(PersonaId, &ProposedAction)>> = BTreeMap::new();
        for contribution in contributions.iter().filter(|c| c.is_success()) {
            for action in &contribution.proposed_actions {
                if let Some(target) = action.target() {
                    by_target
                        .entry(target)
                        .or_default()
                        .push((contribution.persona, action));
                }
            }
        }

        let mut challenges = Vec::new();
        for (target, proposals) in by_target {
            // distinct proposals in first-seen order, with their proposers
            let mut distinct: Vec<(String, &ProposedAction, Vec<PersonaId>)> = Vec::new();
            for (persona, action) in &proposals {
                let key = action.key();
                match distinct.iter_mut().find(|(k, _, _)| *k == key) {
                    Some((_, _, personas)) => {
                        if !personas.contains(persona) {
                            personas.push(*persona);
                        }
                    }
                    None => distinct.push((key, *action, vec![*persona])),
                }
            }
            if distinct.len() < 2 {
                continue;
            }

            let mut personas: Vec<PersonaId> = Vec::new();
            for (persona, _) in &proposals {
                if !personas.contains(persona) {
                    personas.push(*persona);
                }
            }

            let positions: Vec<String> = distinct
                .iter()
                .map(|(_, action, by)| {
                    format!(
                        "{} {} {} with {}",
                        join_names(by, registry),
                        if by.len() == 1 { "proposes" } else { "propose" },
                        action.tool_name,
                        action.input
                    )
                })
                .collect();

            challenges.push(Challenge::new(
                ChallengeKind::ConflictingActions {
                    target: target.to_string(),
                },
                personas,
                format!(
                    "Conflicting proposals for '{target}': {}. Deferred to the operator.",
                    positions.join("; ")
                ),
                ChallengeResolution::Deferred,
            ));
        }
        challenges
    }

    fn opposing_recommendations(
        &self,
        contributions: &[Contribution],
        registry: &PersonaRegistry,
    ) -> Option<Challenge> {
        let confident = |stance: Stance| {
            contributions
                .iter()
                .filter(|c| c.is_success())
                .filter(|c| c.confidence >= self.confidence_threshold)
                .filter(|c| stance_of(&c.text) == stance)
                .collect::<Vec<&Contribution>>()
        };
        let proceed = confident(Stance::Proceed);
        let hold = confident(Stance::Hold);
        if proceed.is_empty() || hold.is_empty() {
            return None;
        }

        // strongest voice per side; earlier (higher priority) wins ties
        let strongest = |side: &[&Contribution]| -> (PersonaId, f32) {
            side.iter().fold((side[0].persona, side[0].confidence), |best, c| {
                if c.confidence > best.1 {
                    (c.persona, c.confidence)
                } else {
                    best
                }
            })
        };
        let (proceed_lead, proceed_conf) = strongest(&proceed);
        let (hold_lead, hold_conf) = strongest(&hold);

        let resolution = if (proceed_conf - hold_conf).abs() >= self.resolution_margin {
            ChallengeResolution::Resolved {
                in_favour_of: if proceed_conf > hold_conf {
                    proceed_lead
                } else {
                    hold_lead
                },
            }
        } else {
            ChallengeResolution::Unresolved
        };

        let personas: Vec<PersonaId> = contributions
            .iter()
            .map(|c| c.persona)
            .filter(|p| proceed.iter().chain(hold.iter()).any(|c| c.persona == *p))
            .collect();
        let proceed_ids: Vec<PersonaId> = proceed.iter().map(|c| c.persona).collect();
        let hold_ids: Vec<PersonaId> = hold.iter().map(|c| c.persona).collect();

        let outcome = match &resolution {
            ChallengeResolution::Resolved { in_favour_of } => format!(
                "Resolved in favour of {} on confidence ({:.2} vs {:.2}).",
                registry.display_name(*in_favour_of),
                proceed_conf.max(hold_conf),
                proceed_conf.min(hold_conf)
            ),
            _ => format!(
                "Unresolved: confidence is too close to call ({proceed_conf:.2} vs {hold_conf:.2})."
            ),
        };

        Some(Challenge::new(
            ChallengeKind::OpposingRecommendations,
            personas,
            format!(
                "{} recommend{} proceeding while {} recommend{} holding. {outcome}",
                join_names(&proceed_ids, registry),
                if proceed_ids.len() == 1 { "s" } else { "" },
                join_names(&hold_ids, registry),
                if hold_ids.len() == 1 { "s" } else { "" },
            ),
            resolution,
        ))
    }
}

fn join_names(personas: &[PersonaId], registry: &PersonaRegistry) -> String {
    let names: Vec<String> = personas.iter().map(|p| registry.display_name(*p)).collect();
    match names.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
