//! Artefact collaborator: versioned documents the copilot may edit.
//!
//! Held artefact edits carry a diff preview computed here, so the operator
//! sees exactly what a confirmation would change.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::persona::PersonaId;
use crate::tools::catalogue::UpdateArtefactInput;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtefactError {
    #[error("artefact not found: {0}")]
    NotFound(String),

    #[error("invalid artefact edit: {0}")]
    InvalidEdit(String),

    #[error("artefact service unavailable: {0}")]
    Unavailable(String),
}

/// Line diff between an artefact's head and proposed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtefactDiff {
    pub artefact_id: String,
    /// Revision the diff was computed against; `None` for a new artefact
    pub base_revision: Option<u32>,
    pub added_lines: usize,
    pub removed_lines: usize,
    /// `+`/`-`/space prefixed lines
    pub diff: String,
}

impl ArtefactDiff {
    /// Compute the diff of `proposed` against `base`.
    pub fn between(
        artefact_id: &str,
        base_revision: Option<u32>,
        base: &str,
        proposed: &str,
    ) -> Self {
        let text_diff = TextDiff::from_lines(base, proposed);
        let mut diff = String::new();
        let mut added_lines = 0;
        let mut removed_lines = 0;

        for change in text_diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => {
                    removed_lines += 1;
                    "-"
                }
                ChangeTag::Insert => {
                    added_lines += 1;
                    "+"
                }
                ChangeTag::Equal => " ",
            };
            diff.push_str(sign);
            diff.push_str(change.value().trim_end_matches('\n'));
            diff.push('\n');
        }

        Self {
            artefact_id: artefact_id.to_string(),
            base_revision,
            added_lines,
            removed_lines,
            diff,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_lines == 0 && self.removed_lines == 0
    }
}

/// One stored version of an artefact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtefactRevision {
    pub artefact_id: String,
    /// Starts at 1
    pub revision: u32,
    pub content: String,
    pub summary: Option<String>,
    pub author: Option<PersonaId>,
    pub created_at: DateTime<Utc>,
}

/// An edit extracted from an artefact-mutating tool input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtefactEdit {
    pub artefact_id: String,
    pub content: String,
    pub summary: Option<String>,
}

impl ArtefactEdit {
    pub fn from_input(input: &serde_json::Value) -> Result<Self, ArtefactError> {
        let parsed: UpdateArtefactInput = serde_json::from_value(input.clone())
            .map_err(|e| ArtefactError::InvalidEdit(e.to_string()))?;
        if parsed.artefact_id.trim().is_empty() {
            return Err(ArtefactError::InvalidEdit("artefact_id is empty".into()));
        }
        Ok(Self {
            artefact_id: parsed.artefact_id,
            content: parsed.content,
            summary: parsed.summary,
        })
    }
}

/// Artefact store collaborator.
#[async_trait]
pub trait ArtefactService: Send + Sync {
    /// Diff proposed content against the current head. Unknown artefacts
    /// diff against empty content.
    async fn calculate_diff(
        &self,
        artefact_id: &str,
        proposed: &str,
    ) -> Result<ArtefactDiff, ArtefactError>;

    /// Store `edit` as the new head, creating the artefact if needed.
    async fn merge_artefact(
        &self,
        edit: &ArtefactEdit,
        author: Option<PersonaId>,
    ) -> Result<ArtefactRevision, ArtefactError>;

    /// Restore the content of `revision` as a new head. History is never
    /// rewritten.
    async fn revert_artefact(
        &self,
        artefact_id: &str,
        revision: u32,
    ) -> Result<ArtefactRevision, ArtefactError>;
}

pub type SharedArtefactService = Arc<dyn ArtefactService>;

/// Keeps every revision in memory.
#[derive(Default)]
pub struct InMemoryArtefactService {
    artefacts: RwLock<HashMap<String, Vec<ArtefactRevision>>>,
}

impl InMemoryArtefactService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedArtefactService {
        Arc::new(self)
    }

    /// Store an initial revision.
    pub async fn seed(&self, artefact_id: &str, content: &str) -> ArtefactRevision {
        let edit = ArtefactEdit {
            artefact_id: artefact_id.to_string(),
            content: content.to_string(),
            summary: Some("seed".into()),
        };
        self.store(&edit, None).await
    }

    pub async fn head(&self, artefact_id: &str) -> Option<ArtefactRevision> {
        self.artefacts
            .read()
            .await
            .get(artefact_id)
            .and_then(|revisions| revisions.last().cloned())
    }

    pub async fn history(&self, artefact_id: &str) -> Result<Vec<ArtefactRevision>, ArtefactError> {
        self.artefacts
            .read()
            .await
            .get(artefact_id)
            .cloned()
            .ok_or_else(|| ArtefactError::NotFound(artefact_id.to_string()))
    }

    async fn store(&self, edit: &ArtefactEdit, author: Option<PersonaId>) -> ArtefactRevision {
        let mut artefacts = self.artefacts.write().await;
        let revisions = artefacts.entry(edit.artefact_id.clone()).or_default();
        let revision = ArtefactRevision {
            artefact_id: edit.artefact_id.clone(),
            revision: revisions.len() as u32 + 1,
            content: edit.content.clone(),
            summary: edit.summary.clone(),
            author,
            created_at: Utc::now(),
        };
        revisions.push(revision.clone());
        revision
    }
}

#[async_trait]
impl ArtefactService for InMemoryArtefactService {
    async fn calculate_diff(
        &self,
        artefact_id: &str,
        proposed: &str,
    ) -> Result<ArtefactDiff, ArtefactError> {
        let head = self.head(artefact_id).await;
        let (base_revision, base) = match &head {
            Some(rev) => (Some(rev.revision), rev.content.as_str()),
            None => (None, ""),
        };
        Ok(ArtefactDiff::between(artefact_id, base_revision, base, proposed))
    }

    async fn merge_artefact(
        &self,
        edit: &ArtefactEdit,
        author: Option<PersonaId>,
    ) -> Result<ArtefactRevision, ArtefactError> {
        let revision = self.store(edit, author).await;
        debug!(
            artefact_id = %revision.artefact_id,
            revision = revision.revision,
            "Artefact merged"
        );
        Ok(revision)
    }

    async fn revert_artefact(
        &self,
        artefact_id: &str,
        revision: u32,
    ) -> Result<ArtefactRevision, ArtefactError> {
        let target = self
            .history(artefact_id)
            .await?
            .into_iter()
            .find(|r| r.revision == revision)
            .ok_or_else(|| {
                ArtefactError::InvalidEdit(format!("{artefact_id} has no revision {revision}"))
            })?;
        let edit = ArtefactEdit {
            artefact_id: artefact_id.to_string(),
            content: target.content,
            summary: Some(format!("revert to revision {revision}")),
        };
        let reverted = self.store(&edit, None).await;
        debug!(artefact_id, from = revision, revision = reverted.revision, "Artefact reverted");
        Ok(reverted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_counts_lines() {
        let diff = ArtefactDiff::between("roadmap", Some(1), "a\nb\nc\n", "a\nB\nc\nd\n");
        assert_eq!(diff.added_lines, 2);
        assert_eq!(diff.removed_lines, 1);
        assert!(diff.diff.contains("-b\n"));
        assert!(diff.diff.contains("+B\n"));
        assert!(diff.diff.contains("+d\n"));
        assert!(diff.diff.starts_with(" a\n"));
    }

    #[test]
    fn test_edit_from_input() {
        let edit = ArtefactEdit::from_input(&json!({
            "artefact_id": "roadmap",
            "content": "v2"
        }))
        .unwrap();
        assert_eq!(edit.artefact_id, "roadmap");
        assert_eq!(edit.summary, None);

        assert!(ArtefactEdit::from_input(&json!({ "content": "v2" })).is_err());
        assert!(ArtefactEdit::from_input(&json!({ "artefact_id": " ", "content": "v2" })).is_err());
    }

    #[tokio::test]
    async fn test_merge_creates_revisions() {
        let service = InMemoryArtefactService::new();
        service.seed("roadmap", "Q1: search\n").await;

        let diff = service
            .calculate_diff("roadmap", "Q1: search\nQ2: billing\n")
            .await
            .unwrap();
        assert_eq!(diff.base_revision, Some(1));
        assert_eq!(diff.added_lines, 1);

        let edit = ArtefactEdit {
            artefact_id: "roadmap".into(),
            content: "Q1: search\nQ2: billing\n".into(),
            summary: Some("add billing".into()),
        };
        let rev = service
            .merge_artefact(&edit, Some(PersonaId::Operator))
            .await
            .unwrap();
        assert_eq!(rev.revision, 2);
        assert_eq!(service.history("roadmap").await.unwrap().len(), 2);
        assert!(service.history("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_revert_appends_revision() {
        let service = InMemoryArtefactService::new();
        service.seed("roadmap", "v1\n").await;
        let edit = ArtefactEdit {
            artefact_id: "roadmap".into(),
            content: "v2\n".into(),
            summary: None,
        };
        service.merge_artefact(&edit, None).await.unwrap();

        let reverted = service.revert_artefact("roadmap", 1).await.unwrap();
        assert_eq!(reverted.revision, 3);
        assert_eq!(reverted.content, "v1\n");
        assert_eq!(service.history("roadmap").await.unwrap().len(), 3);

        assert!(matches!(
            service.revert_artefact("roadmap", 9).await,
            Err(ArtefactError::InvalidEdit(_))
        ));
        assert!(matches!(
            service.revert_artefact("missing", 1).await,
            Err(ArtefactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_diff_against_new_artefact() {
        let service = InMemoryArtefactService::new();
        let diff = service.calculate_diff("fresh", "line\n").await.unwrap();
        assert_eq!(diff.base_revision, None);
        assert_eq!(diff.added_lines, 1);
        assert!(!diff.is_empty());
    }
}
