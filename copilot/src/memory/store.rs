//! Memory record types, the store trait and the in-process store.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::MemoryError;

/// Kind of memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRecordKind {
    /// Something learned about the world.
    Fact,
    /// Something the operator decided.
    Decision,
    /// Condensed record of one conversation turn.
    Summary,
}

impl std::fmt::Display for MemoryRecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fact => write!(f, "fact"),
            Self::Decision => write!(f, "decision"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// A single memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    /// Session id the record belongs to.
    pub scope: String,
    pub kind: MemoryRecordKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Filled in on lookup.
    #[serde(default)]
    pub relevance: f32,
}

impl MemoryRecord {
    pub fn new(scope: &str, kind: MemoryRecordKind, content: &str) -> Self {
        Self {
            key: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            kind,
            content: content.to_string(),
            created_at: Utc::now(),
            relevance: 0.0,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

/// Lookup parameters.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub scope: String,
    pub text: String,
    pub limit: usize,
}

impl MemoryQuery {
    pub fn new(scope: &str, text: &str, limit: usize) -> Self {
        Self {
            scope: scope.to_string(),
            text: text.to_string(),
            limit,
        }
    }
}

/// Snapshot of the store for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub scopes: usize,
    pub total_records: usize,
    /// Records dropped by the per-scope cap since start.
    pub evicted: u64,
}

/// Memory store collaborator.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a record. A record with an existing key in the same scope replaces it.
    async fn append(&self, record: MemoryRecord) -> Result<(), MemoryError>;

    /// Up to `query.limit` records from `query.scope`, most relevant first.
    async fn lookup(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), MemoryError>;
}

pub type SharedMemoryStore = Arc<dyn MemoryStore>;

pub const DEFAULT_SCOPE_CAPACITY: usize = 512;

/// In-process store with a per-scope cap; the oldest records go first.
pub struct InMemoryMemoryStore {
    scopes: RwLock<HashMap<String, VecDeque<MemoryRecord>>>,
    capacity_per_scope: usize,
    evicted: AtomicU64,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SCOPE_CAPACITY)
    }

    pub fn with_capacity(capacity_per_scope: usize) -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            capacity_per_scope: capacity_per_scope.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    pub async fn snapshot(&self) -> MemorySnapshot {
        let scopes = self.scopes.read().await;
        MemorySnapshot {
            scopes: scopes.len(),
            total_records: scopes.values().map(VecDeque::len).sum(),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// All records in a scope, oldest first.
    pub async fn records(&self, scope: &str) -> Vec<MemoryRecord> {
        self.scopes
            .read()
            .await
            .get(scope)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        if record.scope.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("scope is empty".into()));
        }

        let mut scopes = self.scopes.write().await;
        let records = scopes.entry(record.scope.clone()).or_default();
        records.retain(|r| r.key != record.key);
        records.push_back(record);
        while records.len() > self.capacity_per_scope {
            records.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn lookup(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        let scopes = self.scopes.read().await;
        let Some(records) = scopes.get(&query.scope) else {
            return Ok(Vec::new());
        };

        let terms = tokens(&query.text);
        let total = records.len().max(1) as f32;
        let mut scored: Vec<(usize, MemoryRecord)> = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let mut record = record.clone();
                record.relevance = relevance(&terms, &record.content, index as f32 / total);
                (index, record)
            })
            .collect();

        // Most relevant first, newest first on ties.
        scored.sort_by(|(ia, a), (ib, b)| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| ib.cmp(ia))
        });

        Ok(scored
            .into_iter()
            .take(query.limit)
            .map(|(_, record)| record)
            .collect())
    }

    async fn ping(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Word overlap in [0, 0.9] plus a recency bonus of up to 0.1.
fn relevance(terms: &HashSet<String>, content: &str, recency: f32) -> f32 {
    let overlap = if terms.is_empty() {
        0.0
    } else {
        let content_terms = tokens(content);
        terms.intersection(&content_terms).count() as f32 / terms.len() as f32
    };
    overlap * 0.9 + recency * 0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_ranks_by_overlap() {
        let store = InMemoryMemoryStore::new();
        store
            .append(MemoryRecord::new("s-1", MemoryRecordKind::Fact, "Budget approved for Q3"))
            .await
            .unwrap();
        store
            .append(MemoryRecord::new(
                "s-1",
                MemoryRecordKind::Decision,
                "Launch date moved to March after vendor delay",
            ))
            .await
            .unwrap();

        let hits = store
            .lookup(&MemoryQuery::new("s-1", "when is the launch date?", 5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("Launch date"));
        assert!(hits[0].relevance > hits[1].relevance);
    }

    #[tokio::test]
    async fn test_lookup_is_scoped() {
        let store = InMemoryMemoryStore::new();
        store
            .append(MemoryRecord::new("s-1", MemoryRecordKind::Fact, "alpha"))
            .await
            .unwrap();
        let hits = store
            .lookup(&MemoryQuery::new("s-2", "alpha", 5))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_respects_limit_and_recency() {
        let store = InMemoryMemoryStore::new();
        for i in 0..5 {
            store
                .append(MemoryRecord::new("s", MemoryRecordKind::Summary, &format!("turn {i}")))
                .await
                .unwrap();
        }
        let hits = store.lookup(&MemoryQuery::new("s", "", 2)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "turn 4");
        assert_eq!(hits[1].content, "turn 3");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = InMemoryMemoryStore::with_capacity(2);
        for i in 0..3 {
            store
                .append(MemoryRecord::new("s", MemoryRecordKind::Fact, &format!("fact {i}")))
                .await
                .unwrap();
        }
        let records = store.records("s").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "fact 1");

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.total_records, 2);
        assert_eq!(snapshot.evicted, 1);
    }

    #[tokio::test]
    async fn test_same_key_replaces() {
        let store = InMemoryMemoryStore::new();
        store
            .append(MemoryRecord::new("s", MemoryRecordKind::Fact, "v1").with_key("owner"))
            .await
            .unwrap();
        store
            .append(MemoryRecord::new("s", MemoryRecordKind::Fact, "v2").with_key("owner"))
            .await
            .unwrap();
        let records = store.records("s").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "v2");
    }

    #[tokio::test]
    async fn test_empty_scope_rejected() {
        let store = InMemoryMemoryStore::new();
        let err = store
            .append(MemoryRecord::new(" ", MemoryRecordKind::Fact, "x"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(store.ping().await.is_ok());
    }
}
