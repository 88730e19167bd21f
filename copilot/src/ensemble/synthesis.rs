//! Turns a deliberation into the caller-facing response.
//!
//! Composition is deterministic: contributions render in priority order,
//! challenges in detection order, and proposed actions are deduplicated with
//! merged provenance. Conflicting actions under a deferred challenge are
//! withheld.

use std::collections::BTreeSet;

use super::challenge::strip_stance_markers;
use super::types::{
    ChallengeKind, ChallengeResolution, Contribution, CopilotResponse, Deliberation,
    ProposedAction,
};
use crate::persona::PersonaRegistry;

pub fn compose(deliberation: &Deliberation, registry: &PersonaRegistry) -> CopilotResponse {
    let succeeded: Vec<&Contribution> = deliberation.succeeded().collect();

    let deferred_targets: BTreeSet<&str> = deliberation
        .challenges
        .iter()
        .filter(|c| c.resolution == ChallengeResolution::Deferred)
        .filter_map(|c| match &c.kind {
            ChallengeKind::ConflictingActions { target } => Some(target.as_str()),
            ChallengeKind::OpposingRecommendations => None,
        })
        .collect();

    let mut text = render_contributions(&succeeded, registry);

    if !deliberation.challenges.is_empty() {
        text.push_str("\n---\n\n**Disagreement**\n");
        for challenge in &deliberation.challenges {
            text.push_str(&format!("- {}\n", challenge.description));
        }
        if let Some(note) = &deliberation.synthesis_note {
            text.push_str("\n**Synthesis**\n");
            text.push_str(note.trim());
            text.push('\n');
        }
    }

    let silent: Vec<String> = deliberation
        .contributions
        .iter()
        .filter_map(|c| {
            c.failure_reason()
                .map(|reason| format!("{} ({reason})", registry.display_name(c.persona)))
        })
        .collect();
    if !silent.is_empty() {
        text.push_str(&format!("\n_Not heard from: {}._\n", silent.join(", ")));
    }

    CopilotResponse {
        deliberation_id: deliberation.id.clone(),
        mode: deliberation.mode,
        text: text.trim_end().to_string(),
        cited_personas: succeeded.iter().map(|c| c.persona).collect(),
        proposed_actions: merge_actions(&succeeded, &deferred_targets),
        unresolved_challenges: deliberation
            .challenges
            .iter()
            .filter(|c| c.is_open())
            .cloned()
            .collect(),
        min_confidence: succeeded
            .iter()
            .map(|c| c.confidence)
            .fold(None, |min: Option<f32>, c| Some(min.map_or(c, |m| m.min(c)))),
    }
}

fn render_contributions(succeeded: &[&Contribution], registry: &PersonaRegistry) -> String {
    let mut text = String::new();
    for contribution in succeeded {
        text.push_str(&format!(
            "### {}\n{}\n\n",
            registry.display_name(contribution.persona),
            strip_stance_markers(&contribution.text)
        ));
    }
    text
}

/// Deduplicate by (tool, input), merging proposers in priority order.
pub fn merge_actions(
    succeeded: &[&Contribution],
    withheld_targets: &BTreeSet<&str>,
) -> Vec<ProposedAction> {
    let mut merged: Vec<ProposedAction> = Vec::new();
    for contribution in succeeded {
        for action in &contribution.proposed_actions {
            if action
                .target()
                .is_some_and(|t| withheld_targets.contains(t))
            {
                continue;
            }
            let key = action.key();
            match merged.iter_mut().find(|m| m.key() == key) {
                Some(existing) => {
                    for persona in &action.proposed_by {
                        if !existing.proposed_by.contains(persona) {
                            existing.proposed_by.push(*persona);
                        }
                    }
                }
                None => merged.push(action.clone()),
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::types::{Challenge, ResolutionStrategy};
    use crate::persona::PersonaId;
    use crate::router::ConversationMode;
    use chrono::Utc;
    use serde_json::json;

    fn deliberation(contributions: Vec<Contribution>, challenges: Vec<Challenge>) -> Deliberation {
        Deliberation {
            id: "d-1".into(),
            mode: ConversationMode::Planning,
            sceptic_activated: false,
            strategy: if challenges.is_empty() {
                ResolutionStrategy::Direct
            } else {
                ResolutionStrategy::SynthesiserPass
            },
            contributions,
            challenges,
            synthesis_note: None,
            started_at: Utc::now(),
            duration_ms: 5,
        }
    }

    fn note(
        persona: PersonaId,
        text: &str,
        confidence: f32,
        actions: Vec<ProposedAction>,
    ) -> Contribution {
        Contribution::succeeded(persona, text.into(), confidence, actions, 1, 1)
    }

    #[test]
    fn test_direct_composition() {
        let d = deliberation(
            vec![
                note(PersonaId::Operator, "Do A.", 0.8, vec![]),
                note(PersonaId::Analyst, "A is cheap. [stance: proceed]", 0.6, vec![]),
            ],
            vec![],
        );
        let response = compose(&d, PersonaRegistry::builtin());
        assert_eq!(response.cited_personas, vec![PersonaId::Operator, PersonaId::Analyst]);
        assert_eq!(response.min_confidence, Some(0.6));
        assert!(response.text.starts_with("### Operator\nDo A."));
        assert!(response.text.contains("### Analyst\nA is cheap."));
        assert!(!response.text.contains("[stance"));
        assert!(!response.text.contains("Disagreement"));
    }

    #[test]
    fn test_failed_personas_disclosed_not_cited() {
        let d = deliberation(
            vec![
                note(PersonaId::Operator, "Do A.", 0.8, vec![]),
                Contribution::failed(PersonaId::Historian, "timed out after 20ms", 20, 1),
            ],
            vec![],
        );
        let response = compose(&d, PersonaRegistry::builtin());
        assert_eq!(response.cited_personas, vec![PersonaId::Operator]);
        assert!(response.text.contains("Not heard from: Historian (timed out after 20ms)"));
    }

    #[test]
    fn test_actions_merged_with_provenance() {
        let action = ProposedAction::new("create_note", json!({ "title": "t", "body": "b" }));
        let d = deliberation(
            vec![
                note(PersonaId::Operator, "x", 0.8, vec![action.clone()]),
                note(PersonaId::Advocate, "y", 0.8, vec![action]),
            ],
            vec![],
        );
        let response = compose(&d, PersonaRegistry::builtin());
        assert_eq!(response.proposed_actions.len(), 1);
        assert_eq!(
            response.proposed_actions[0].proposed_by,
            vec![PersonaId::Operator, PersonaId::Advocate]
        );
    }

    #[test]
    fn test_deferred_targets_withheld() {
        let edit = |content: &str| {
            ProposedAction::new(
                "update_artefact",
                json!({ "artefact_id": "roadmap", "content": content }),
            )
        };
        let (a, b) = (edit("A"), edit("B"));
        let other = ProposedAction::new("create_note", json!({ "title": "t", "body": "b" }));
        let challenge = Challenge::new(
            ChallengeKind::ConflictingActions {
                target: "roadmap".into(),
            },
            vec![PersonaId::Operator, PersonaId::Analyst],
            "Conflicting proposals for 'roadmap'".into(),
            ChallengeResolution::Deferred,
        );
        let d = deliberation(
            vec![
                note(PersonaId::Operator, "x", 0.8, vec![a, other]),
                note(PersonaId::Analyst, "y", 0.8, vec![b]),
            ],
            vec![challenge],
        );
        let response = compose(&d, PersonaRegistry::builtin());
        assert_eq!(response.proposed_actions.len(), 1);
        assert_eq!(response.proposed_actions[0].tool_name, "create_note");
        assert_eq!(response.unresolved_challenges.len(), 1);
        assert!(response.text.contains("**Disagreement**"));
        assert!(response.text.contains("Conflicting proposals for 'roadmap'"));
    }
}
